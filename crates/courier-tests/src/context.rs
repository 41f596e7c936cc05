//! Test context wiring producer, queue and consumer.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use courier_api::{AppState, create_router};
use courier_core::{CarrierPlacement, MessageQueue};
use courier_mailer::{Consumer, MailSender};
use courier_queue::MemoryQueue;
use courier_trace::testing::SpanCapture;
use opentelemetry_sdk::export::trace::SpanData;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// One in-memory deployment: the API publishes to `publisher`, the worker
/// consumes from `queue`. Every span finished on the test's thread lands
/// in `spans`.
pub struct TestContext {
    pub queue: MemoryQueue,
    pub publisher: Arc<dyn MessageQueue>,
    pub spans: SpanCapture,
    router: Router,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_queue(MemoryQueue::default())
    }

    pub fn with_placement(placement: CarrierPlacement) -> Self {
        Self::with_queue(MemoryQueue::default().with_placement(placement))
    }

    pub fn with_queue(queue: MemoryQueue) -> Self {
        let publisher: Arc<dyn MessageQueue> = Arc::new(queue.clone());
        let router = build_router(publisher.clone());

        Self {
            queue,
            publisher,
            spans: SpanCapture::install(),
            router,
        }
    }

    /// Route API publishes through `publisher` instead of the queue itself.
    pub fn with_publisher(mut self, publisher: Arc<dyn MessageQueue>) -> Self {
        self.router = build_router(publisher.clone());
        self.publisher = publisher;
        self
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Worker over this context's queue.
    pub fn consumer(&self, sender: Arc<dyn MailSender>) -> Consumer {
        Consumer::new(Arc::new(self.queue.clone()), sender)
            .with_placement(self.queue.placement())
    }

    /// `GET` request against the router.
    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("valid request");
        self.send(request).await
    }

    /// `POST /users/reset-password` with extra request headers.
    pub async fn post_reset(&self, body: &str, headers: &[(&str, &str)]) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/users/reset-password")
            .header("content-type", "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let request = request
            .body(Body::from(body.to_string()))
            .expect("valid request");

        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.expect("infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    /// Finished spans with the given name, in the order they ended.
    pub fn spans_named(&self, name: &str) -> Vec<SpanData> {
        self.spans.spans_named(name)
    }
}

fn build_router(queue: Arc<dyn MessageQueue>) -> Router {
    create_router(Arc::new(AppState::new(queue)))
}
