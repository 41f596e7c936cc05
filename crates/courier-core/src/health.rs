//! Queue health reports.

use serde::Serialize;

/// Health of a queue connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Still accepting messages, but something has gone wrong since start.
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Healthy or degraded.
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded { .. })
    }
}

/// Transport counters since the queue was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounters {
    pub messages_published: u64,
    pub messages_received: u64,
    pub publish_failures: u64,
    /// Acknowledgements the broker did not confirm.
    pub ack_failures: u64,
    pub bytes_published: u64,
    pub bytes_received: u64,
}

/// What `/ready` reports about the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    #[serde(flatten)]
    pub status: HealthStatus,
    pub queue: String,
    pub system: &'static str,
    pub connected: bool,
    pub counters: QueueCounters,
}

impl HealthCheck {
    /// Disconnected is unhealthy; any recorded publish or ack failure
    /// degrades an otherwise connected queue.
    pub fn assess(
        queue: impl Into<String>,
        system: &'static str,
        connected: bool,
        counters: QueueCounters,
    ) -> Self {
        let queue = queue.into();
        let status = if !connected {
            HealthStatus::Unhealthy {
                reason: format!("Queue {} is not connected", queue),
            }
        } else if counters.publish_failures > 0 || counters.ack_failures > 0 {
            HealthStatus::Degraded {
                reason: format!(
                    "{} publish failures, {} ack failures recorded",
                    counters.publish_failures, counters.ack_failures
                ),
            }
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            queue,
            system,
            connected,
            counters,
        }
    }
}
