//! Span capture for tests.
//!
//! [`SpanCapture::install`] sets a thread-local subscriber that exports every
//! finished span to an in-memory exporter. Use it from single-threaded tests
//! (plain `#[test]` or the default `#[tokio::test]` runtime) so spawned tasks
//! see the same subscriber.

use opentelemetry::trace::{
    SpanContext, SpanId, TraceContextExt, TraceFlags, TraceState, TracerProvider as _,
};
use opentelemetry::Context;
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator, TracerProvider};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;

pub struct SpanCapture {
    exporter: InMemorySpanExporter,
    _provider: TracerProvider,
    _guard: DefaultGuard,
}

impl SpanCapture {
    pub fn install() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("courier-test")));

        Self {
            exporter,
            _provider: provider,
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }

    /// Every span finished so far, in end order.
    pub fn finished(&self) -> Vec<SpanData> {
        self.exporter.get_finished_spans().unwrap_or_default()
    }

    /// First finished span with the given name.
    pub fn span(&self, name: &str) -> Option<SpanData> {
        self.finished().into_iter().find(|span| span.name == name)
    }

    pub fn spans_named(&self, name: &str) -> Vec<SpanData> {
        self.finished()
            .into_iter()
            .filter(|span| span.name == name)
            .collect()
    }

    pub fn reset(&self) {
        self.exporter.reset();
    }
}

/// Attribute value as text.
pub fn attribute(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.as_str().into_owned())
}

/// `None` for a root span.
pub fn parent_id(span: &SpanData) -> Option<SpanId> {
    (span.parent_span_id != SpanId::INVALID).then_some(span.parent_span_id)
}

/// A sampled span context as if received from another service.
pub fn remote_context() -> Context {
    let ids = RandomIdGenerator::default();
    Context::new().with_remote_span_context(SpanContext::new(
        ids.new_trace_id(),
        ids.new_span_id(),
        TraceFlags::SAMPLED,
        true,
        TraceState::NONE,
    ))
}
