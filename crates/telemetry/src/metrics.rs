//! Metrics implementation using Prometheus.

use codebox_core::{Error, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder and serve `/metrics` on `listen`.
///
/// Must be called from within a tokio runtime.
pub fn setup_metrics_recorder(listen: &str) -> Result<SocketAddr> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| Error::configuration(format!("Invalid metrics listen address '{}': {}", listen, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::internal(format!("Failed to install Prometheus recorder: {}", e)))?;

    describe_metrics();
    tracing::info!(listen = %addr, "Prometheus metrics exporter started");
    Ok(addr)
}

fn describe_metrics() {
    metrics::describe_counter!(
        "codebox_sandbox_runs_total",
        "Sandboxed runs by outcome (success, failure, timeout, fault)"
    );
    metrics::describe_histogram!(
        "codebox_sandbox_run_duration_ms",
        metrics::Unit::Milliseconds,
        "Wall-clock duration of sandboxed runs"
    );
    metrics::describe_counter!("codebox_image_builds_total", "Image builds by result");
    metrics::describe_counter!(
        "codebox_containers_cleaned_total",
        "Stopped containers removed by cleanup"
    );
}
