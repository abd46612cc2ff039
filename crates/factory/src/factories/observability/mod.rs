pub mod error;
pub mod implementation;

use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::SdkTracerProvider};
use serde::Deserialize;

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ObservabilityConfig {
    /// OTLP collector endpoint; stdout logging only when absent.
    pub otel_exporter_otlp_endpoint: Option<String>,
    /// Full filter directive, takes precedence over `tracing_level`.
    pub rust_log: Option<String>,
    #[serde(default)]
    pub log_format: LogFormat,
    pub tracing_level: Option<String>,
    #[serde(default = "true_default")]
    pub with_file: bool,
    #[serde(default = "true_default")]
    pub with_line_number: bool,
    /// Fraction of root spans exported, 1.0 keeps everything.
    #[serde(default = "trace_sample_ratio_default")]
    pub trace_sample_ratio: f64,
    #[serde(default = "metrics_interval_secs_default")]
    pub metrics_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otel_exporter_otlp_endpoint: None,
            rust_log: None,
            log_format: LogFormat::default(),
            tracing_level: None,
            with_file: true,
            with_line_number: true,
            trace_sample_ratio: trace_sample_ratio_default(),
            metrics_interval_secs: metrics_interval_secs_default(),
        }
    }
}

fn true_default() -> bool {
    true
}

fn trace_sample_ratio_default() -> f64 {
    1.0
}

fn metrics_interval_secs_default() -> u64 {
    30
}

/// Keeps the OTLP providers alive; dropping it flushes and shuts them down.
pub struct Observability {
    pub tracer_provider: Option<SdkTracerProvider>,
    pub meter_provider: Option<SdkMeterProvider>,
}
