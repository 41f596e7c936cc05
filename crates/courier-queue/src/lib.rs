//! Queue transports for Courier.
//!
//! Both adapters implement [`courier_core::MessageQueue`]: a single named,
//! non-durable, point-to-point queue that acknowledges each message as it is
//! handed to the consumer.

pub mod config;
mod memory;
pub mod metrics;
mod nats;

pub use config::{QueueBackend, QueueConfig};
pub use memory::MemoryQueue;
pub use metrics::QueueMetrics;
pub use nats::NatsQueue;
