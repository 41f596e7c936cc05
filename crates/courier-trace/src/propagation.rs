//! Inject a trace context into a carrier and extract it back out.
//!
//! `traceparent` is the canonical header. `sentry-trace` is written next to
//! it and read as a fallback, so either propagator on the other side of the
//! queue can continue the trace. `tracestate` and `baggage` pass through.

use std::sync::LazyLock;

use courier_core::Carrier;
use opentelemetry::Context;
use opentelemetry::propagation::text_map_propagator::FieldIter;
use opentelemetry::propagation::{
    Extractor, Injector, TextMapCompositePropagator, TextMapPropagator,
};
use opentelemetry::trace::{SpanId, TraceContextExt, TraceId};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use tracing::debug;

use crate::context::{format_sentry_trace, is_remote, parse_sentry_trace};

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";
pub const SENTRY_TRACE_HEADER: &str = "sentry-trace";
pub const BAGGAGE_HEADER: &str = "baggage";

/// All keys this module reads or writes.
pub const FIELDS: [&str; 4] = [
    TRACEPARENT_HEADER,
    TRACESTATE_HEADER,
    SENTRY_TRACE_HEADER,
    BAGGAGE_HEADER,
];

/// [`Injector`] over a [`Carrier`].
pub struct CarrierInjector<'a>(pub &'a mut Carrier);

impl Injector for CarrierInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key, value);
    }
}

/// [`Extractor`] over a [`Carrier`].
pub struct CarrierExtractor<'a>(pub &'a Carrier);

impl Extractor for CarrierExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().collect()
    }
}

/// Propagates the span context in the `sentry-trace` header.
///
/// On extraction it only fills in a context that `traceparent` left empty.
#[derive(Debug)]
pub struct SentryTracePropagator {
    fields: [String; 1],
}

impl SentryTracePropagator {
    pub fn new() -> Self {
        Self {
            fields: [SENTRY_TRACE_HEADER.to_string()],
        }
    }
}

impl Default for SentryTracePropagator {
    fn default() -> Self {
        Self::new()
    }
}

impl TextMapPropagator for SentryTracePropagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let span = cx.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            injector.set(SENTRY_TRACE_HEADER, format_sentry_trace(span_context));
        }
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        if cx.span().span_context().is_valid() {
            return cx.clone();
        }
        let Some(header) = extractor.get(SENTRY_TRACE_HEADER) else {
            return cx.clone();
        };
        match parse_sentry_trace(header) {
            Ok(span_context) => cx.with_remote_span_context(span_context),
            Err(err) => {
                debug!(error = %err, "Ignoring sentry-trace header");
                cx.clone()
            }
        }
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(&self.fields)
    }
}

/// `traceparent`, then `sentry-trace`, then `baggage`.
pub fn composite_propagator() -> TextMapCompositePropagator {
    TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(SentryTracePropagator::new()),
        Box::new(BaggagePropagator::new()),
    ])
}

static PROPAGATOR: LazyLock<TextMapCompositePropagator> = LazyLock::new(composite_propagator);

/// Skips empty values, so an absent `tracestate` is not written as `""`.
struct NonEmpty<'a>(&'a mut dyn Injector);

impl Injector for NonEmpty<'_> {
    fn set(&mut self, key: &str, value: String) {
        if !value.is_empty() {
            self.0.set(key, value);
        }
    }
}

/// Serialize `cx` into a new carrier.
///
/// Pure with respect to `cx`. A context without a current span still
/// produces `traceparent` and `sentry-trace`, with zeroed ids and the
/// sampled flag cleared.
pub fn inject(cx: &Context) -> Carrier {
    let mut carrier = Carrier::new();
    inject_into(cx, &mut CarrierInjector(&mut carrier));
    carrier
}

/// Write `cx` through any injector (carrier, HTTP headers, ...).
pub fn inject_into(cx: &Context, injector: &mut dyn Injector) {
    let mut injector = NonEmpty(injector);
    if cx.span().span_context().is_valid() {
        PROPAGATOR.inject_context(cx, &mut injector);
        return;
    }

    injector.set(
        TRACEPARENT_HEADER,
        format!("00-{}-{}-00", TraceId::INVALID, SpanId::INVALID),
    );
    injector.set(
        SENTRY_TRACE_HEADER,
        format!("{}-{}-0", TraceId::INVALID, SpanId::INVALID),
    );
    BaggagePropagator::new().inject_context(cx, &mut injector);
}

/// Rebuild the remote context from a carrier.
///
/// Propagation is best-effort: a missing or malformed carrier yields a
/// context with no span, so the next span opened on it starts a new trace.
/// Unknown keys are ignored.
pub fn extract(carrier: &Carrier) -> Context {
    extract_from(&CarrierExtractor(carrier))
}

/// Like [`extract`], for any extractor.
pub fn extract_from(extractor: &dyn Extractor) -> Context {
    let cx = PROPAGATOR.extract_with_context(&Context::new(), extractor);
    if !is_remote(&cx) {
        debug!(
            keys = ?extractor.keys(),
            "No usable trace headers, starting a new trace"
        );
    }
    cx
}
