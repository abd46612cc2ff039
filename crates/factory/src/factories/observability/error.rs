use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObservabilityError {
    #[error("OTLP exporter error, {0}")]
    ExporterBuildError(#[from] opentelemetry_otlp::ExporterBuildError),
    #[error("invalid log filter {directive}: {reason}")]
    InvalidFilter { directive: String, reason: String },
    #[error("failed to install subscriber, {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}
