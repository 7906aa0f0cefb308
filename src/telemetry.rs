//! Tracing and OpenTelemetry initialization.
//!
//! Structured logs always go through `tracing` with an environment filter.
//! When enabled, spans are additionally exported to an OTLP-compatible
//! collector.
//!
//! # Environment Variables
//!
//! - `VOLLEY_OTEL_ENABLED`: "true" to enable OTLP export (default: false)
//! - `VOLLEY_OTEL_ENDPOINT`: collector URL (default: http://localhost:4317)
//! - `VOLLEY_OTEL_SERVICE_NAME`: service name for traces (default: volley)
//! - `VOLLEY_OTEL_SAMPLE_RATE`: sampling rate 0.0-1.0 (default: 1.0)

use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Configuration for trace export.
#[derive(Debug, Clone)]
pub struct OtelConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub service_name: String,
    pub sample_rate: f64,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: std::env::var("VOLLEY_OTEL_ENABLED")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            endpoint: std::env::var("VOLLEY_OTEL_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            service_name: std::env::var("VOLLEY_OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "volley".to_string()),
            sample_rate: std::env::var("VOLLEY_OTEL_SAMPLE_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
        }
    }
}

impl OtelConfig {
    fn sampler(&self) -> Sampler {
        if self.sample_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if self.sample_rate <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(self.sample_rate)
        }
    }
}

/// Initialize tracing, optionally with OTLP span export.
///
/// Returns the tracer provider when export is enabled so the caller can shut
/// it down cleanly.
pub fn init_telemetry(
    config: &OtelConfig,
) -> Result<Option<SdkTracerProvider>, Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(tracing_subscriber::EnvFilter::from_default_env());

    if !config.enabled {
        tracing_subscriber::registry().with(fmt_layer).init();
        return Ok(None);
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(config.sampler())
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(Resource::new(vec![
            KeyValue::new("service.name", config.service_name.clone()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]))
        .build();

    let tracer = provider.tracer("volley");
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    info!(
        endpoint = %config.endpoint,
        service_name = %config.service_name,
        sample_rate = config.sample_rate,
        "OpenTelemetry tracing initialized"
    );

    Ok(Some(provider))
}

/// Shut down trace export, flushing pending spans.
pub fn shutdown_telemetry(provider: Option<SdkTracerProvider>) {
    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            tracing::error!("Failed to shutdown OpenTelemetry provider: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OtelConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.endpoint, "http://localhost:4317");
        assert_eq!(config.service_name, "volley");
        assert_eq!(config.sample_rate, 1.0);
    }

    #[test]
    fn test_sampler_bounds() {
        let mut config = OtelConfig::default();

        config.sample_rate = 1.5;
        assert!(matches!(config.sampler(), Sampler::AlwaysOn));

        config.sample_rate = -0.5;
        assert!(matches!(config.sampler(), Sampler::AlwaysOff));

        config.sample_rate = 0.25;
        assert!(matches!(config.sampler(), Sampler::TraceIdRatioBased(_)));
    }
}
