//! Port traits implemented by queue adapters.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::Result;
use crate::envelope::{Delivery, Envelope};
use crate::health::HealthCheck;

/// Stream of deliveries from a queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// A single named, point-to-point queue.
///
/// Deliveries are acknowledged as they are handed to the consumer, before
/// any processing. A consumer that fails or crashes mid-way loses the
/// message: delivery is at-most-once and there is no redelivery or
/// dead-letter path.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Queue name.
    fn name(&self) -> &str;

    /// Messaging system, as recorded in `messaging.system`.
    fn system(&self) -> &'static str;

    /// Serialize and enqueue an envelope. Safe to call concurrently.
    /// Failures are returned as-is; no retry happens here.
    async fn publish(&self, envelope: &Envelope) -> Result<()>;

    /// Open the delivery stream. Yields in FIFO order for a single producer
    /// and waits while the queue is empty.
    async fn consume(&self) -> Result<DeliveryStream>;

    /// Release the connection. Calling it again does nothing.
    async fn close(&self) -> Result<()>;

    /// Connection state and transport counters.
    fn health(&self) -> HealthCheck;

    /// Whether the queue can currently accept messages.
    fn is_healthy(&self) -> bool {
        self.health().status.is_operational()
    }
}
