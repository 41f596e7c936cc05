//! Distributed tracing for Courier.
//!
//! Carries a trace context across the queue boundary: the producer injects
//! its context into a [`Carrier`](courier_core::Carrier) and the consumer
//! extracts it and opens a child span, so the HTTP request and the mail
//! delivery land in one trace. Spans are `tracing` spans exported through
//! an OpenTelemetry SDK tracer provider.

pub mod context;
pub mod propagation;
pub mod spans;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use context::{CarrierError, SpanIds, format_sentry_trace, is_remote, parse_sentry_trace};
pub use propagation::{
    CarrierExtractor, CarrierInjector, SentryTracePropagator, composite_propagator, extract,
    extract_from, inject, inject_into,
};
pub use spans::{
    MessagingAttributes, MessagingOperation, end_span, messaging_span, request_span, start_span,
};
pub use telemetry::{
    LogFormat, LogSpanExporter, TelemetryConfig, TelemetryError, init_tracing, shutdown_tracing,
    tracer_provider,
};

pub use opentelemetry::Context;
pub use opentelemetry::propagation::{Extractor, Injector};
pub use opentelemetry::trace::{SpanId, Status, TraceContextExt, TraceFlags, TraceId};
pub use tracing_opentelemetry::OpenTelemetrySpanExt;
