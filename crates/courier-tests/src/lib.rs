//! End-to-end test infrastructure for Courier.
//!
//! Wires the API, an in-memory queue and the mail worker together so a
//! request can be followed from HTTP to the sent email. With the
//! `integration` feature, [`NatsContainer`] starts a JetStream broker in
//! Docker for the NATS tests.
//!
//! # Usage
//!
//! ```ignore
//! use courier_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new();
//!     let (status, body) = ctx.post_reset(r#"{"email":"a@b.com"}"#, &[]).await;
//! }
//! ```

#[cfg(feature = "integration")]
pub mod containers;
pub mod context;
pub mod helpers;

#[cfg(feature = "integration")]
pub use containers::{NatsContainer, unique_queue};
pub use context::TestContext;
pub use helpers::*;
