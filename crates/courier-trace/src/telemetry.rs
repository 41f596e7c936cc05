//! Tracer provider and subscriber initialization.

use futures::future::{BoxFuture, ready};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, TracerProvider};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::propagation::composite_propagator;
use crate::spans::SERVICE_NAME;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),
    #[error("Failed to initialize subscriber: {0}")]
    Init(String),
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
    /// Filter directives, used when `RUST_LOG` is not set.
    pub filter: String,
    /// Log every finished span.
    pub export_spans: bool,
    /// Fraction of new traces to sample. Continued traces follow the caller.
    pub sample_rate: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            filter: "info".to_string(),
            export_spans: true,
            sample_rate: 1.0,
        }
    }
}

impl TelemetryConfig {
    pub fn sampler(&self) -> Sampler {
        let root = if self.sample_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if self.sample_rate <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(self.sample_rate)
        };
        Sampler::ParentBased(Box::new(root))
    }
}

/// Emits one structured log event per finished span.
#[derive(Debug, Default, Clone)]
pub struct LogSpanExporter {
    resource: Option<Resource>,
}

impl LogSpanExporter {
    fn service_name(&self) -> String {
        self.resource
            .as_ref()
            .and_then(|resource| resource.get(SERVICE_NAME.into()))
            .map(|value| value.to_string())
            .unwrap_or_default()
    }
}

impl SpanExporter for LogSpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let service = self.service_name();
        for span in batch {
            let attributes = span
                .attributes
                .iter()
                .map(|kv| format!("{}={}", kv.key.as_str(), kv.value.as_str()))
                .collect::<Vec<_>>()
                .join(",");
            let duration = span
                .end_time
                .duration_since(span.start_time)
                .unwrap_or(Duration::ZERO);

            info!(
                target: "courier::span",
                service = %service,
                trace_id = %span.span_context.trace_id(),
                span_id = %span.span_context.span_id(),
                parent_span_id = %span.parent_span_id,
                span_name = %span.name,
                span_kind = ?span.span_kind,
                duration_ms = duration.as_millis() as u64,
                status = ?span.status,
                attributes = %attributes,
                "Span finished"
            );
        }
        Box::pin(ready(Ok(())))
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.resource = Some(resource.clone());
    }
}

/// Build the SDK tracer provider for `service_name`.
///
/// Finished spans go to [`LogSpanExporter`] when `export_spans` is set.
pub fn tracer_provider(service_name: &str, config: &TelemetryConfig) -> TracerProvider {
    let resource = Resource::new(vec![
        KeyValue::new(SERVICE_NAME, service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let builder = TracerProvider::builder()
        .with_sampler(config.sampler())
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource);

    if config.export_spans {
        builder
            .with_simple_exporter(LogSpanExporter::default())
            .build()
    } else {
        builder.build()
    }
}

/// Install the process-wide subscriber. Call once at startup.
///
/// Returns the tracer provider so the caller can flush it on shutdown.
pub fn init_tracing(
    service_name: &str,
    config: &TelemetryConfig,
) -> Result<TracerProvider, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| TelemetryError::Filter(e.to_string()))?;

    let provider = tracer_provider(service_name, config);
    let tracer = provider.tracer("courier");
    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(composite_propagator());

    // Span export does not depend on the log filter.
    let telemetry_layer = tracing_opentelemetry::layer()
        .with_tracer(tracer)
        .with_filter(LevelFilter::INFO);

    let registry = tracing_subscriber::registry().with(telemetry_layer);

    let result = match config.log_format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_filter(env_filter),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_filter(env_filter),
            )
            .try_init(),
    };

    result.map_err(|e| TelemetryError::Init(e.to_string()))?;
    Ok(provider)
}

/// Flush and shut down the tracer provider.
pub fn shutdown_tracing(provider: &TracerProvider) {
    if let Err(err) = provider.shutdown() {
        tracing::warn!(error = %err, "Tracer provider shutdown failed");
    }
}
