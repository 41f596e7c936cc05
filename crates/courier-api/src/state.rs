//! Application state shared across handlers.

use courier_core::MessageQueue;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn MessageQueue>,
}

impl AppState {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }
}
