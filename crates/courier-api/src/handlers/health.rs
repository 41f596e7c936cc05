//! Health check handlers.

use axum::{Json, extract::State, http::StatusCode};
use courier_core::HealthCheck;
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Ready while the queue accepts messages. The body is the queue's
/// [`HealthCheck`], so a degraded queue is visible while still serving 200.
pub async fn ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthCheck>) {
    let check = state.queue.health();
    let status = if check.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(check))
}
