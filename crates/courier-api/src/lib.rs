//! HTTP API server for Courier.
//!
//! Accepts reset-password requests and hands them to the mail worker through
//! the queue, carrying the request's trace context along.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, serve};
pub use state::AppState;
