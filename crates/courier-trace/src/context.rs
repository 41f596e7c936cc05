//! Span context helpers and the `sentry-trace` header encoding.
//!
//! W3C `traceparent` is handled by the SDK's `TraceContextPropagator`;
//! `sentry-trace` has no upstream codec, so it lives here.

use opentelemetry::Context;
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use thiserror::Error;

/// Why a propagation header could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CarrierError {
    #[error("malformed {header} header: {reason}")]
    Malformed {
        header: &'static str,
        reason: String,
    },
}

impl CarrierError {
    fn malformed(header: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            header,
            reason: reason.into(),
        }
    }
}

impl From<CarrierError> for courier_core::Error {
    fn from(err: CarrierError) -> Self {
        courier_core::Error::Carrier(err.to_string())
    }
}

const SENTRY_TRACE: &str = "sentry-trace";

/// Parse a `sentry-trace` value (`trace-span[-sampled]`) into a remote span context.
///
/// A missing sampled flag means sampled.
pub fn parse_sentry_trace(header: &str) -> Result<SpanContext, CarrierError> {
    let parts: Vec<&str> = header.trim().split('-').collect();
    let (trace, span, sampled) = match parts.as_slice() {
        [trace, span] => (*trace, *span, None),
        [trace, span, sampled] => (*trace, *span, Some(*sampled)),
        _ => {
            return Err(CarrierError::malformed(
                SENTRY_TRACE,
                "expected 2 or 3 fields",
            ));
        }
    };

    let trace_flags = match sampled {
        None | Some("1") => TraceFlags::SAMPLED,
        Some("0") => TraceFlags::NOT_SAMPLED,
        Some(other) => {
            return Err(CarrierError::malformed(
                SENTRY_TRACE,
                format!("bad sampled flag {:?}", other),
            ));
        }
    };

    Ok(SpanContext::new(
        parse_trace_id(trace)?,
        parse_span_id(span)?,
        trace_flags,
        true,
        TraceState::NONE,
    ))
}

/// Encode a span context as a `sentry-trace` value.
pub fn format_sentry_trace(span_context: &SpanContext) -> String {
    format!(
        "{}-{}-{}",
        span_context.trace_id(),
        span_context.span_id(),
        if span_context.is_sampled() { "1" } else { "0" }
    )
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn parse_trace_id(s: &str) -> Result<TraceId, CarrierError> {
    if s.len() != 32 || !is_lower_hex(s) {
        return Err(CarrierError::malformed(
            SENTRY_TRACE,
            "trace id must be 32 lowercase hex chars",
        ));
    }
    let id = TraceId::from_hex(s).map_err(|e| CarrierError::malformed(SENTRY_TRACE, e.to_string()))?;
    if id == TraceId::INVALID {
        return Err(CarrierError::malformed(SENTRY_TRACE, "trace id is all zeros"));
    }
    Ok(id)
}

fn parse_span_id(s: &str) -> Result<SpanId, CarrierError> {
    if s.len() != 16 || !is_lower_hex(s) {
        return Err(CarrierError::malformed(
            SENTRY_TRACE,
            "span id must be 16 lowercase hex chars",
        ));
    }
    let id = SpanId::from_hex(s).map_err(|e| CarrierError::malformed(SENTRY_TRACE, e.to_string()))?;
    if id == SpanId::INVALID {
        return Err(CarrierError::malformed(SENTRY_TRACE, "span id is all zeros"));
    }
    Ok(id)
}

/// Identifiers of the span a context currently points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanIds {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

impl SpanIds {
    /// `None` when the context holds no valid span.
    pub fn of(cx: &Context) -> Option<Self> {
        let span = cx.span();
        let span_context = span.span_context();
        span_context.is_valid().then(|| Self {
            trace_id: span_context.trace_id(),
            span_id: span_context.span_id(),
        })
    }
}

/// Whether `cx` continues a trace received from another process.
pub fn is_remote(cx: &Context) -> bool {
    let span = cx.span();
    let span_context = span.span_context();
    span_context.is_valid() && span_context.is_remote()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const SPAN: &str = "00f067aa0ba902b7";

    #[test]
    fn test_sentry_trace_roundtrip() {
        let header = format!("{}-{}-1", TRACE, SPAN);
        let parsed = parse_sentry_trace(&header).unwrap();

        assert_eq!(parsed.trace_id(), TraceId::from_hex(TRACE).unwrap());
        assert_eq!(parsed.span_id(), SpanId::from_hex(SPAN).unwrap());
        assert!(parsed.is_sampled());
        assert!(parsed.is_remote());
        assert_eq!(format_sentry_trace(&parsed), header);
    }

    #[test]
    fn test_sentry_trace_sampled_flag() {
        let implicit = parse_sentry_trace(&format!("{}-{}", TRACE, SPAN)).unwrap();
        assert!(implicit.is_sampled());

        let unsampled = parse_sentry_trace(&format!("{}-{}-0", TRACE, SPAN)).unwrap();
        assert!(!unsampled.is_sampled());
        assert!(format_sentry_trace(&unsampled).ends_with("-0"));
    }

    #[test]
    fn test_sentry_trace_rejects_malformed() {
        let cases = vec![
            String::new(),
            "garbage".to_string(),
            format!("{}-{}-2", TRACE, SPAN),
            format!("{}-{}-1-extra", TRACE, SPAN),
            format!("abc-{}", SPAN),
            format!("{}-abc", TRACE),
            format!("{}-{}", TRACE.to_uppercase(), SPAN),
            format!("{}-{}", "0".repeat(32), SPAN),
            format!("{}-{}", TRACE, "0".repeat(16)),
        ];
        for header in &cases {
            assert!(parse_sentry_trace(header).is_err(), "accepted {:?}", header);
        }
    }

    #[test]
    fn test_span_ids_of_empty_context() {
        assert_eq!(SpanIds::of(&Context::new()), None);
        assert!(!is_remote(&Context::new()));
    }

    #[test]
    fn test_span_ids_of_remote_context() {
        let sc = parse_sentry_trace(&format!("{}-{}", TRACE, SPAN)).unwrap();
        let cx = Context::new().with_remote_span_context(sc);

        let ids = SpanIds::of(&cx).unwrap();
        assert_eq!(ids.trace_id.to_string(), TRACE);
        assert_eq!(ids.span_id.to_string(), SPAN);
        assert!(is_remote(&cx));
    }
}
