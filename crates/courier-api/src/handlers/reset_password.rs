//! Reset-password handler: the producer side of the mail pipeline.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use courier_core::{Envelope, Error, validation::parse_reset_request};
use courier_trace::{
    Context, MessagingAttributes, MessagingOperation, OpenTelemetrySpanExt, SpanId, SpanIds,
    Status, TraceId, end_span, extract_from, inject, messaging_span, request_span,
    spans::HTTP_STATUS_CODE, start_span,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, info, warn};

use crate::error::ApiError;
use crate::middleware::HeaderExtractor;
use crate::state::AppState;

pub const RESET_PASSWORD_ROUTE: &str = "/users/reset-password";
pub const RESET_PASSWORD_SPAN: &str = "POST /users/reset-password";
pub const RESET_EMAIL_SENT: &str = "Password reset email sent";

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// `POST /users/reset-password`
///
/// Continues a trace started by the caller when the request carries one.
/// The request span is closed on every path, including rejected bodies.
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    let incoming = extract_from(&HeaderExtractor(&headers));
    let (request_cx, span) = start_span(request_span("POST", RESET_PASSWORD_ROUTE), &incoming);

    let result = handle_reset_request(&state, &request_cx, &body)
        .instrument(span.clone())
        .await;

    let status = match &result {
        Ok(()) => {
            span.set_status(Status::Ok);
            StatusCode::OK
        }
        Err(err) => {
            span.set_status(Status::error(err.to_string()));
            ApiError::status_code_for(err)
        }
    };
    span.record(HTTP_STATUS_CODE, status.as_u16());

    let ids = SpanIds::of(&request_cx);
    span.in_scope(|| {
        info!(
            trace_id = %ids.map_or(TraceId::INVALID, |ids| ids.trace_id),
            span_id = %ids.map_or(SpanId::INVALID, |ids| ids.span_id),
            status = status.as_u16(),
            "Reset password request handled"
        );
    });
    end_span(span);

    result.map_err(ApiError::from)?;
    Ok(Json(MessageResponse {
        message: RESET_EMAIL_SENT.to_string(),
    }))
}

/// Validate the body and publish the envelope under a child publish span.
/// Nothing reaches the queue when validation fails.
async fn handle_reset_request(
    state: &AppState,
    parent: &Context,
    body: &[u8],
) -> Result<(), Error> {
    let payload = parse_reset_request(body)?;

    let attributes = MessagingAttributes::new(state.queue.system(), MessagingOperation::Publish)
        .destination(state.queue.name());
    let (publish_cx, publish_span) = start_span(messaging_span(&attributes), parent);

    let envelope = Envelope::new(inject(&publish_cx), payload);

    let result = state
        .queue
        .publish(&envelope)
        .instrument(publish_span.clone())
        .await;
    match &result {
        Ok(()) => publish_span.set_status(Status::Ok),
        Err(err) => {
            publish_span.in_scope(|| {
                warn!(error = %err, queue = state.queue.name(), "Failed to enqueue reset email");
            });
            publish_span.set_status(Status::error(err.to_string()));
        }
    }
    end_span(publish_span);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::create_router;
    use axum::{body::Body, http::Request};
    use courier_core::{CarrierPlacement, MessageQueue};
    use courier_queue::MemoryQueue;
    use courier_trace::TraceContextExt;
    use courier_trace::testing::{SpanCapture, attribute, parent_id, remote_context};
    use futures::StreamExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn setup() -> (axum::Router, MemoryQueue, SpanCapture) {
        let capture = SpanCapture::install();
        let queue = MemoryQueue::default();
        let state = AppState::new(Arc::new(queue.clone()));
        (create_router(Arc::new(state)), queue, capture)
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(RESET_PASSWORD_ROUTE)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_valid_request_publishes_one_envelope() {
        let (app, queue, spans) = setup();

        let response = app.oneshot(post(r#"{"email":"a@b.com"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"message": "Password reset email sent"})
        );
        assert_eq!(queue.len(), 1);

        let request_span = spans.span(RESET_PASSWORD_SPAN).unwrap();
        let publish_span = spans.span("email_queue publish").unwrap();
        assert_eq!(
            parent_id(&publish_span),
            Some(request_span.span_context.span_id())
        );
        assert_eq!(
            publish_span.span_context.trace_id(),
            request_span.span_context.trace_id()
        );
        assert_eq!(
            attribute(&publish_span, "messaging.operation").as_deref(),
            Some("publish")
        );
        assert_eq!(
            attribute(&publish_span, "messaging.system").as_deref(),
            Some("memory")
        );
        assert_eq!(request_span.status, Status::Ok);
        assert_eq!(
            attribute(&request_span, HTTP_STATUS_CODE).as_deref(),
            Some("200")
        );

        let mut stream = queue.consume().await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.payload().unwrap().email, "a@b.com");

        let carried = courier_trace::extract(&delivery.carrier(CarrierPlacement::Headers));
        let carried = SpanIds::of(&carried).unwrap();
        assert_eq!(carried.trace_id, publish_span.span_context.trace_id());
        assert_eq!(carried.span_id, publish_span.span_context.span_id());
    }

    #[tokio::test]
    async fn test_invalid_bodies_are_rejected_without_publishing() {
        let cases = [
            ("{}", "Bad Request: email is required"),
            (r#"{"email":"not-an-email"}"#, "Bad Request: email is not a valid address"),
            (r#"{"email":42}"#, "Bad Request: email must be a string"),
            ("not json", "Bad Request: body is not valid JSON"),
            ("[]", "Bad Request: body must be a JSON object"),
        ];

        for (body, expected) in cases {
            let (app, queue, spans) = setup();
            let response = app.oneshot(post(body)).await.unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
            assert_eq!(json_body(response).await["error"], expected);
            assert!(queue.is_empty());

            let span = spans.span(RESET_PASSWORD_SPAN).unwrap();
            assert!(matches!(span.status, Status::Error { .. }));
            assert_eq!(attribute(&span, HTTP_STATUS_CODE).as_deref(), Some("400"));
            assert!(spans.span("email_queue publish").is_none());
        }
    }

    #[tokio::test]
    async fn test_publish_failure_is_server_error() {
        let (app, queue, spans) = setup();
        queue.close().await.unwrap();

        let response = app.oneshot(post(r#"{"email":"a@b.com"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("closed"));
        assert!(queue.is_empty());

        let publish_span = spans.span("email_queue publish").unwrap();
        assert!(matches!(publish_span.status, Status::Error { .. }));
        let request_span = spans.span(RESET_PASSWORD_SPAN).unwrap();
        assert_eq!(
            attribute(&request_span, HTTP_STATUS_CODE).as_deref(),
            Some("500")
        );
    }

    #[tokio::test]
    async fn test_incoming_trace_is_continued() {
        let (app, _queue, spans) = setup();
        let caller = remote_context();
        let caller_ids = SpanIds::of(&caller).unwrap();

        let request = Request::builder()
            .method("POST")
            .uri(RESET_PASSWORD_ROUTE)
            .header(
                "sentry-trace",
                courier_trace::format_sentry_trace(caller.span().span_context()),
            )
            .body(Body::from(r#"{"email":"a@b.com"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let span = spans.span(RESET_PASSWORD_SPAN).unwrap();
        assert_eq!(span.span_context.trace_id(), caller_ids.trace_id);
        assert_eq!(parent_id(&span), Some(caller_ids.span_id));
    }

    #[tokio::test]
    async fn test_request_without_trace_starts_root() {
        let (app, _queue, spans) = setup();

        let response = app.oneshot(post(r#"{"email":"a@b.com"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let span = spans.span(RESET_PASSWORD_SPAN).unwrap();
        assert_eq!(parent_id(&span), None);
    }
}
