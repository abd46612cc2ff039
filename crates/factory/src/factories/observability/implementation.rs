use std::{str::FromStr, time::Duration};

use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_otlp::{
    Compression, MetricExporter, SpanExporter, WithExportConfig, WithTonicConfig,
};
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::{SCHEMA_URL, attribute::SERVICE_VERSION};
use time::macros::format_description;
use tonic::transport::ClientTlsConfig;
use tracing::{Level, Subscriber, info};
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};
use tracing_subscriber::{
    EnvFilter, Layer, fmt::time::LocalTime, layer::SubscriberExt, registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::factories::observability::{
    LogFormat, Observability, ObservabilityConfig, error::ObservabilityError,
};

impl Drop for Observability {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(err) = provider.shutdown()
        {
            eprintln!("tracer provider shutdown: {err:?}");
        }
        if let Some(provider) = self.meter_provider.take()
            && let Err(err) = provider.shutdown()
        {
            eprintln!("meter provider shutdown: {err:?}");
        }
    }
}

impl Observability {
    /// Installs the global subscriber. OTLP export is wired only when an
    /// endpoint is configured.
    pub async fn init(
        cargo_crate_name: &str,
        cargo_pkg_version: &str,
        cfg: &ObservabilityConfig,
    ) -> Result<Observability, ObservabilityError> {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let mut observability = Observability {
            tracer_provider: None,
            meter_provider: None,
        };
        if let Some(endpoint) = &cfg.otel_exporter_otlp_endpoint {
            let resource = resource(cargo_crate_name, cargo_pkg_version);
            observability.tracer_provider =
                Some(tracer_provider(resource.clone(), endpoint, cfg.trace_sample_ratio)?);
            observability.meter_provider = Some(meter_provider(
                resource,
                endpoint,
                Duration::from_secs(cfg.metrics_interval_secs.max(1)),
            )?);
        }

        let otel_layer = observability
            .tracer_provider
            .as_ref()
            .map(|provider| OpenTelemetryLayer::new(provider.tracer(cargo_crate_name.to_string())));
        let metrics_layer = observability
            .meter_provider
            .as_ref()
            .map(|provider| MetricsLayer::new(provider.clone()));

        tracing_subscriber::registry()
            .with(env_filter(cfg)?)
            .with(fmt_layer(cfg))
            .with(metrics_layer)
            .with(otel_layer)
            .try_init()?;

        info!(
            otlp = cfg.otel_exporter_otlp_endpoint.is_some(),
            format = ?cfg.log_format,
            "📡 Observability initialized"
        );
        Ok(observability)
    }
}

fn env_filter(cfg: &ObservabilityConfig) -> Result<EnvFilter, ObservabilityError> {
    if let Some(directive) = cfg.rust_log.as_deref() {
        return EnvFilter::try_new(directive).map_err(|e| ObservabilityError::InvalidFilter {
            directive: directive.to_string(),
            reason: e.to_string(),
        });
    }

    let level = cfg
        .tracing_level
        .as_deref()
        .and_then(|l| Level::from_str(l).ok())
        .unwrap_or(Level::INFO);

    Ok(EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase())))
}

fn fmt_layer<S>(cfg: &ObservabilityConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ));
    let layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(false)
        .with_file(cfg.with_file)
        .with_line_number(cfg.with_line_number);

    match cfg.log_format {
        LogFormat::Pretty => layer.with_ansi(true).compact().boxed(),
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_span_list(false)
            .boxed(),
    }
}

fn resource(cargo_crate_name: &str, cargo_pkg_version: &str) -> Resource {
    Resource::builder()
        .with_service_name(cargo_crate_name.to_string())
        .with_schema_url(
            [KeyValue::new(SERVICE_VERSION, cargo_pkg_version.to_string())],
            SCHEMA_URL,
        )
        .build()
}

/// Native roots for `https://` collectors, plaintext otherwise.
fn tls_for(endpoint: &str) -> Option<ClientTlsConfig> {
    endpoint
        .starts_with("https://")
        .then(|| ClientTlsConfig::new().with_native_roots())
}

fn tracer_provider(
    resource: Resource,
    endpoint: &str,
    sample_ratio: f64,
) -> Result<SdkTracerProvider, ObservabilityError> {
    let mut builder = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_compression(Compression::Gzip);
    if let Some(tls) = tls_for(endpoint) {
        builder = builder.with_tls_config(tls);
    }

    let sampler = if sample_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else {
        Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(sample_ratio)))
    };

    let provider = SdkTracerProvider::builder()
        .with_id_generator(RandomIdGenerator::default())
        .with_batch_exporter(builder.build()?)
        .with_sampler(sampler)
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());
    Ok(provider)
}

fn meter_provider(
    resource: Resource,
    endpoint: &str,
    interval: Duration,
) -> Result<SdkMeterProvider, ObservabilityError> {
    let mut builder = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_compression(Compression::Gzip);
    if let Some(tls) = tls_for(endpoint) {
        builder = builder.with_tls_config(tls);
    }

    let reader = PeriodicReader::builder(builder.build()?)
        .with_interval(interval)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    global::set_meter_provider(provider.clone());
    Ok(provider)
}
