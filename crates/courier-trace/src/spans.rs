//! Span creation for HTTP and messaging operations.
//!
//! Spans are plain `tracing` spans. The OpenTelemetry layer installed by
//! [`init_tracing`](crate::init_tracing) turns each one into an SDK span,
//! which is exported when the last handle to it is dropped.

use opentelemetry::Context;
use tracing::field::{Empty, display};
use tracing::{Level, Span, span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::context::SpanIds;

pub const SERVICE_NAME: &str = "service.name";
pub const MESSAGING_SYSTEM: &str = "messaging.system";
pub const MESSAGING_OPERATION: &str = "messaging.operation";
pub const MESSAGING_DESTINATION: &str = "messaging.destination.name";
pub const MESSAGING_MESSAGE_ID: &str = "messaging.message.id";
pub const HTTP_METHOD: &str = "http.request.method";
pub const HTTP_ROUTE: &str = "http.route";
pub const HTTP_STATUS_CODE: &str = "http.response.status_code";

/// Messaging operation recorded on queue spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagingOperation {
    Publish,
    Process,
}

impl MessagingOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagingOperation::Publish => "publish",
            MessagingOperation::Process => "process",
        }
    }

    /// `otel.kind` of spans for this operation.
    pub fn span_kind(&self) -> &'static str {
        match self {
            MessagingOperation::Publish => "producer",
            MessagingOperation::Process => "consumer",
        }
    }
}

/// Messaging span attributes following OpenTelemetry semantic conventions.
#[derive(Debug, Clone)]
pub struct MessagingAttributes {
    pub system: String,
    pub operation: MessagingOperation,
    pub destination: Option<String>,
    pub message_id: Option<String>,
}

impl MessagingAttributes {
    pub fn new(system: impl Into<String>, operation: MessagingOperation) -> Self {
        Self {
            system: system.into(),
            operation,
            destination: None,
            message_id: None,
        }
    }

    pub fn destination(mut self, name: impl Into<String>) -> Self {
        self.destination = Some(name.into());
        self
    }

    pub fn message_id(mut self, id: impl ToString) -> Self {
        self.message_id = Some(id.to_string());
        self
    }

    /// Span name in the `<destination> <operation>` form.
    pub fn span_name(&self) -> String {
        match &self.destination {
            Some(destination) => format!("{} {}", destination, self.operation.as_str()),
            None => self.operation.as_str().to_string(),
        }
    }
}

/// Server span for one HTTP request, named `<METHOD> <route>`.
pub fn request_span(method: &str, route: &str) -> Span {
    span!(
        target: "courier",
        parent: None,
        Level::INFO,
        "http.request",
        otel.name = %format!("{} {}", method, route),
        otel.kind = "server",
        http.request.method = method,
        http.route = route,
        http.response.status_code = Empty,
        trace_id = Empty,
        span_id = Empty,
        parent_span_id = Empty,
    )
}

/// Producer or consumer span for one queue operation.
pub fn messaging_span(attrs: &MessagingAttributes) -> Span {
    let span = span!(
        target: "courier",
        parent: None,
        Level::INFO,
        "messaging",
        otel.name = %attrs.span_name(),
        otel.kind = attrs.operation.span_kind(),
        messaging.system = %attrs.system,
        messaging.operation = attrs.operation.as_str(),
        messaging.destination.name = Empty,
        messaging.message.id = Empty,
        trace_id = Empty,
        span_id = Empty,
        parent_span_id = Empty,
    );
    if let Some(destination) = &attrs.destination {
        span.record(MESSAGING_DESTINATION, destination.as_str());
    }
    if let Some(id) = &attrs.message_id {
        span.record(MESSAGING_MESSAGE_ID, id.as_str());
    }
    span
}

/// Open `span` as a child of the span current in `parent`.
///
/// The span joins `parent`'s trace, or starts a new one when `parent` has
/// no span. Returns the context that carries the new span as current; that
/// is the context to propagate further. The span ends when its last handle
/// is dropped, so every exit path closes it once.
pub fn start_span(span: Span, parent: &Context) -> (Context, Span) {
    span.set_parent(parent.clone());
    let cx = span.context();

    if let Some(ids) = SpanIds::of(&cx) {
        span.record("trace_id", display(ids.trace_id));
        span.record("span_id", display(ids.span_id));
    }
    if let Some(parent) = SpanIds::of(parent) {
        span.record("parent_span_id", display(parent.span_id));
    }

    (cx, span)
}

/// Close a span opened with [`start_span`].
pub fn end_span(span: Span) {
    drop(span);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SpanCapture, attribute, parent_id, remote_context};
    use opentelemetry::trace::{SpanKind, Status, TraceContextExt};

    #[test]
    fn test_root_span_has_no_parent() {
        let capture = SpanCapture::install();

        let (cx, span) = start_span(request_span("POST", "/x"), &Context::new());
        let ids = SpanIds::of(&cx).unwrap();
        end_span(span);

        let exported = capture.span("POST /x").unwrap();
        assert_eq!(parent_id(&exported), None);
        assert_eq!(exported.span_context.trace_id(), ids.trace_id);
        assert_eq!(exported.span_context.span_id(), ids.span_id);
        assert_eq!(exported.span_kind, SpanKind::Server);
        assert_eq!(attribute(&exported, "trace_id"), Some(ids.trace_id.to_string()));
    }

    #[test]
    fn test_child_span_parenting() {
        let capture = SpanCapture::install();
        let (parent_cx, parent) = start_span(request_span("POST", "/x"), &Context::new());
        let attrs = MessagingAttributes::new("memory", MessagingOperation::Publish)
            .destination("email_queue");
        let (child_cx, child) = start_span(messaging_span(&attrs), &parent_cx);
        end_span(child);
        end_span(parent);

        let parent_ids = SpanIds::of(&parent_cx).unwrap();
        let child_ids = SpanIds::of(&child_cx).unwrap();
        assert_eq!(child_ids.trace_id, parent_ids.trace_id);
        assert_ne!(child_ids.span_id, parent_ids.span_id);

        let exported = capture.span("email_queue publish").unwrap();
        assert_eq!(parent_id(&exported), Some(parent_ids.span_id));
        assert_eq!(exported.span_kind, SpanKind::Producer);
    }

    #[test]
    fn test_remote_parent() {
        let capture = SpanCapture::install();
        let remote = remote_context();
        let remote_ids = SpanIds::of(&remote).unwrap();

        let attrs = MessagingAttributes::new("nats", MessagingOperation::Process)
            .destination("email_queue")
            .message_id(7);
        let (cx, span) = start_span(messaging_span(&attrs), &remote);
        assert!(!cx.span().span_context().is_remote());
        end_span(span);

        let exported = capture.span("email_queue process").unwrap();
        assert_eq!(exported.span_context.trace_id(), remote_ids.trace_id);
        assert_eq!(parent_id(&exported), Some(remote_ids.span_id));
        assert_eq!(exported.span_kind, SpanKind::Consumer);
        assert_eq!(
            attribute(&exported, "parent_span_id"),
            Some(remote_ids.span_id.to_string())
        );
    }

    #[test]
    fn test_messaging_attributes() {
        let capture = SpanCapture::install();
        let attrs = MessagingAttributes::new("nats", MessagingOperation::Process)
            .destination("email_queue")
            .message_id(42);
        let (_, span) = start_span(messaging_span(&attrs), &Context::new());
        end_span(span);

        let exported = capture.span("email_queue process").unwrap();
        assert_eq!(attribute(&exported, MESSAGING_SYSTEM).as_deref(), Some("nats"));
        assert_eq!(
            attribute(&exported, MESSAGING_OPERATION).as_deref(),
            Some("process")
        );
        assert_eq!(
            attribute(&exported, MESSAGING_DESTINATION).as_deref(),
            Some("email_queue")
        );
        assert_eq!(attribute(&exported, MESSAGING_MESSAGE_ID).as_deref(), Some("42"));
    }

    #[test]
    fn test_span_ends_once_when_last_handle_drops() {
        let capture = SpanCapture::install();
        let (_, span) = start_span(request_span("GET", "/once"), &Context::new());
        let held = span.clone();
        span.set_status(Status::Ok);

        end_span(span);
        assert!(capture.span("GET /once").is_none());

        end_span(held);
        assert_eq!(capture.spans_named("GET /once").len(), 1);
        assert_eq!(capture.span("GET /once").unwrap().status, Status::Ok);
    }

    #[test]
    fn test_span_without_subscriber_still_usable() {
        let (cx, span) = start_span(request_span("GET", "/"), &Context::new());
        assert_eq!(SpanIds::of(&cx), None);
        end_span(span);
    }

    #[test]
    fn test_messaging_span_name() {
        let attrs = MessagingAttributes::new("nats", MessagingOperation::Process)
            .destination("email_queue");
        assert_eq!(attrs.span_name(), "email_queue process");
        assert_eq!(
            MessagingAttributes::new("nats", MessagingOperation::Publish).span_name(),
            "publish"
        );
    }
}
