#![deny(unused)]
//! Observability setup for Codebox.
//!
//! Installs the process-wide `tracing` subscriber (text or JSON logs plus an
//! optional OTLP exporter) and the Prometheus metrics recorder that the
//! sandbox engine's counters and histograms report to.

pub mod metrics;
pub mod tracing_layer;

pub use crate::metrics::setup_metrics_recorder;
pub use tracing_layer::{configure_tracing, DEFAULT_LOG_FILTER};
