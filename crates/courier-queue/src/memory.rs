//! In-process queue.

use async_trait::async_trait;
use courier_core::{
    CarrierPlacement, DEFAULT_QUEUE_NAME, Delivery, DeliveryStream, Envelope, Error,
    HealthCheck, MessageQueue, Result, TransportMessage,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::metrics::QueueMetrics;

struct Shared {
    messages: Mutex<VecDeque<TransportMessage>>,
    ready: Notify,
    closed: AtomicBool,
    consumer_attached: AtomicBool,
    sequence: AtomicU64,
}

impl Shared {
    /// Remove the head of the queue. Removal is the acknowledgement.
    fn pop(&self) -> Option<TransportMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }
}

/// FIFO queue living in process memory.
///
/// Nothing survives a restart. One consumer may be attached at a time; a
/// message is gone from the queue the moment it is yielded to it.
#[derive(Clone)]
pub struct MemoryQueue {
    name: String,
    placement: CarrierPlacement,
    shared: Arc<Shared>,
    metrics: Arc<QueueMetrics>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_NAME)
    }
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            placement: CarrierPlacement::Headers,
            shared: Arc::new(Shared {
                messages: Mutex::new(VecDeque::new()),
                ready: Notify::new(),
                closed: AtomicBool::new(false),
                consumer_attached: AtomicBool::new(false),
                sequence: AtomicU64::new(0),
            }),
            metrics: QueueMetrics::new(),
        }
    }

    pub fn with_placement(mut self, placement: CarrierPlacement) -> Self {
        self.placement = placement;
        self
    }

    pub fn placement(&self) -> CarrierPlacement {
        self.placement
    }

    /// Messages waiting to be consumed.
    pub fn len(&self) -> usize {
        self.shared
            .messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }

    /// Enqueue an already serialized message.
    pub fn push(&self, message: TransportMessage) -> Result<()> {
        let len = message.body.len() as u64;
        {
            // `close` flips the flag under this lock, so nothing lands after it.
            let mut messages = self
                .shared
                .messages
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if self.is_closed() {
                self.metrics.record_publish_failure();
                return Err(Error::Transport(format!("Queue {} is closed", self.name)));
            }
            messages.push_back(message);
        }
        self.shared.ready.notify_one();
        self.metrics.record_publish(len);
        Ok(())
    }
}

/// Detaches the consumer when its stream is dropped.
struct ConsumerGuard(Arc<Shared>);

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        self.0.consumer_attached.store(false, Ordering::SeqCst);
    }
}

struct ConsumerState {
    guard: ConsumerGuard,
    metrics: Arc<QueueMetrics>,
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    fn system(&self) -> &'static str {
        "memory"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        let message = envelope.encode(self.placement)?;
        debug!(queue = %self.name, "Publishing message");
        self.push(message)
    }

    async fn consume(&self) -> Result<DeliveryStream> {
        if self.shared.consumer_attached.swap(true, Ordering::SeqCst) {
            return Err(Error::Transport(format!(
                "Queue {} already has a consumer",
                self.name
            )));
        }

        let state = ConsumerState {
            guard: ConsumerGuard(self.shared.clone()),
            metrics: self.metrics.clone(),
        };

        let stream = futures::stream::unfold(state, |state| async move {
            let shared = state.guard.0.clone();
            loop {
                if let Some(message) = shared.pop() {
                    let sequence = shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                    state.metrics.record_receive(message.body.len() as u64);
                    let delivery = Delivery::from_message(sequence, message);
                    return Some((Ok::<_, Error>(delivery), state));
                }
                if shared.closed.load(Ordering::SeqCst) {
                    return None;
                }
                shared.ready.notified().await;
            }
        });

        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<()> {
        let already_closed = {
            let _messages = self
                .shared
                .messages
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            self.shared.closed.swap(true, Ordering::SeqCst)
        };
        if already_closed {
            return Ok(());
        }
        // Wake a waiting consumer so it can drain and finish.
        self.shared.ready.notify_one();
        info!(queue = %self.name, "Queue closed");
        Ok(())
    }

    fn health(&self) -> HealthCheck {
        self.metrics.health(&self.name, self.system(), !self.is_closed())
    }
}
