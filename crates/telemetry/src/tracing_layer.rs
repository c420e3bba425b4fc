//! Distributed tracing configuration.

use codebox_core::config::TelemetrySettings;
use codebox_core::{Error, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "info,codebox=debug";

/// Pick the filter directives: `RUST_LOG`, then the configured filter, then
/// the default.
fn resolve_filter(env: Option<String>, configured: Option<&str>) -> String {
    env.filter(|v| !v.trim().is_empty())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}

/// Configure logging to stdout and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is
/// set, span export over OTLP.
pub fn configure_tracing(settings: &TelemetrySettings) -> Result<()> {
    let directives = resolve_filter(std::env::var("RUST_LOG").ok(), settings.log_filter.as_deref());
    let env_filter = EnvFilter::try_new(&directives)
        .map_err(|e| Error::configuration(format!("Invalid log filter '{}': {}", directives, e)))?;

    // Exactly one of these is Some
    let text_layer = (!settings.json_logs).then(tracing_subscriber::fmt::layer);
    let json_layer = settings
        .json_logs
        .then(|| tracing_subscriber::fmt::layer().json());

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(text_layer)
        .with(json_layer);

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let provider = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint.clone()),
            )
            .with_trace_config(
                sdktrace::Config::default().with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    "codebox",
                )])),
            )
            .install_batch(runtime::Tokio)
            .map_err(|e| Error::internal(format!("Failed to install OTLP pipeline: {}", e)))?;

        let tracer = provider.tracer("codebox");
        opentelemetry::global::set_tracer_provider(provider);

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()
            .map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))?;
        tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled");
    } else {
        registry
            .try_init()
            .map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))?;
    }

    Ok(())
}
