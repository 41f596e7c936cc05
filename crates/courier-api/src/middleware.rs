//! HTTP middleware for the API server.

use axum::http::{HeaderMap, HeaderName, Method, header};
use courier_trace::Extractor;
use tower_http::cors::{Any, CorsLayer};

/// Create CORS middleware layer.
///
/// Browsers that start a trace send it along in `sentry-trace`/`baggage` or
/// `traceparent`, so those headers must be allowed cross-origin.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("baggage"),
            HeaderName::from_static("sentry-trace"),
            HeaderName::from_static("traceparent"),
        ])
        .allow_origin(Any)
}

/// [`Extractor`] over inbound request headers. Values that are not visible
/// ASCII are treated as absent.
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}
