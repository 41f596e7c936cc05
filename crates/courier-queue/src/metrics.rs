//! Transport counters behind [`MessageQueue::health`](courier_core::MessageQueue::health).

use courier_core::{HealthCheck, QueueCounters};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between a queue handle and its consumer stream.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    published: AtomicU64,
    received: AtomicU64,
    publish_failures: AtomicU64,
    ack_failures: AtomicU64,
    bytes_published: AtomicU64,
    bytes_received: AtomicU64,
}

impl QueueMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_publish(&self, bytes: u64) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive(&self, bytes: u64) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueCounters {
        QueueCounters {
            messages_published: self.published.load(Ordering::Relaxed),
            messages_received: self.received.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Assess `queue` from the current counters.
    pub fn health(&self, queue: &str, system: &'static str, connected: bool) -> HealthCheck {
        HealthCheck::assess(queue, system, connected, self.snapshot())
    }
}
