//! Courier Core
//!
//! Shared vocabulary for the reset-password pipeline: the message envelope
//! that crosses the queue, the propagation carrier it holds, request
//! validation, the error taxonomy and the queue port implemented by the
//! transport adapters.

pub mod carrier;
pub mod envelope;
pub mod error;
pub mod health;
pub mod ports;
pub mod validation;

pub use carrier::{Carrier, HeaderTable, coerce_header_value};
pub use envelope::{
    CarrierPlacement, DEFAULT_QUEUE_NAME, Delivery, Envelope, ResetPasswordPayload,
    TransportMessage,
};
pub use error::{Error, Result};
pub use health::{HealthCheck, HealthStatus, QueueCounters};
pub use ports::{DeliveryStream, MessageQueue};
