//! Mail worker for Courier.
//!
//! Pulls reset-password envelopes off the queue one at a time, continues
//! the producer's trace and hands the payload to a [`MailSender`].

pub mod consumer;
pub mod sender;

pub use consumer::{Consumer, ConsumerStats, DeliveryState, Outcome};
pub use sender::{MailError, MailSender, MailerConfig, SimulatedMailSender};
