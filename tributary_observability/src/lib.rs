//! Logging, tracing and metrics setup shared by the tributary binaries.
//!
//! Logs go to stdout, either in a compact colored format or as JSON when
//! `RUST_LOG_FORMAT=json`. Traces and metrics are exported over OTLP only
//! when `OTEL_SDK_DISABLED=false`.
use std::borrow::Cow;
use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{InstrumentationScope, global};
use opentelemetry_otlp::{ExporterBuildError, MetricExporter, SpanExporter};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use snafu::{ResultExt, Snafu};
use tracing::Subscriber;
use tracing_opentelemetry::MetricsLayer;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::{prelude::*, registry::LookupSpan};

pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

use crate::format::TributaryFormat;

mod format;

const OTEL_SDK_DISABLED: &str = "OTEL_SDK_DISABLED";
const RUST_LOG_FORMAT: &str = "RUST_LOG_FORMAT";
const DEFAULT_LOG_LEVEL: &str = "info";

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum ObservabilityError {
    #[snafu(display("failed to build otlp exporter"))]
    Exporter { source: ExporterBuildError },
    #[snafu(display("a global tracing subscriber is already installed"))]
    AlreadyInitialized {
        source: tracing_subscriber::util::TryInitError,
    },
}

/// How log events are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Single-line colored output for terminals.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Settings of the global subscriber and meter provider.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub service_name: Cow<'static, str>,
    pub service_version: Cow<'static, str>,
    pub log_format: LogFormat,
    /// Whether spans and metrics are exported over OTLP.
    pub export_enabled: bool,
    pub metrics_export_interval: Duration,
}

impl ObservabilityConfig {
    pub fn new(
        service_name: impl Into<Cow<'static, str>>,
        service_version: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            log_format: LogFormat::default(),
            export_enabled: false,
            metrics_export_interval: Duration::from_secs(10),
        }
    }

    /// Reads the log format and export switch from the environment.
    pub fn from_env(
        service_name: impl Into<Cow<'static, str>>,
        service_version: impl Into<Cow<'static, str>>,
    ) -> Self {
        let log_format = std::env::var(RUST_LOG_FORMAT).ok();
        let sdk_disabled = std::env::var(OTEL_SDK_DISABLED).ok();

        Self::new(service_name, service_version)
            .with_log_format(LogFormat::from_env_value(log_format.as_deref()))
            .with_export_enabled(export_enabled(sdk_disabled.as_deref()))
    }

    pub fn with_log_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = log_format;
        self
    }

    pub fn with_export_enabled(mut self, export_enabled: bool) -> Self {
        self.export_enabled = export_enabled;
        self
    }

    pub fn with_metrics_export_interval(mut self, interval: Duration) -> Self {
        self.metrics_export_interval = interval;
        self
    }
}

/// The otel sdk ignores `OTEL_SDK_DISABLED`, so it's interpreted here.
/// Exports stay off unless explicitly enabled.
fn export_enabled(sdk_disabled: Option<&str>) -> bool {
    sdk_disabled.is_some_and(|value| value.eq_ignore_ascii_case("false"))
}

/// Returns a meter from the global meter provider.
///
/// Instruments created before [`init_observability`] record into a no-op
/// provider.
pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

/// Installs the global subscriber using settings from the environment.
pub fn init_observability(
    service_name: impl Into<Cow<'static, str>>,
    service_version: impl Into<Cow<'static, str>>,
) -> Result<(), ObservabilityError> {
    init_observability_with_config(ObservabilityConfig::from_env(
        service_name,
        service_version,
    ))
}

/// Installs the global tracing subscriber and meter provider.
pub fn init_observability_with_config(
    config: ObservabilityConfig,
) -> Result<(), ObservabilityError> {
    let layers = vec![stdout_layer(config.log_format), otel_layer(&config)?];

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context(AlreadyInitializedSnafu {})
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

fn stdout_layer<S>(log_format: LogFormat) -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    match log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(env_filter())
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .event_format(TributaryFormat::default())
            .fmt_fields(TributaryFormat::default())
            .with_filter(env_filter())
            .boxed(),
    }
}

fn otel_layer<S>(config: &ObservabilityConfig) -> Result<BoxedLayer<S>, ObservabilityError>
where
    S: Subscriber + Send + Sync,
    for<'a> S: LookupSpan<'a>,
{
    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();

    let tracer_provider = tracer_provider(config, resource.clone())?;
    let meter_provider = meter_provider(config, resource)?;

    let scope = InstrumentationScope::builder(config.service_name.clone())
        .with_version(config.service_version.clone())
        .build();
    let tracer = tracer_provider.tracer_with_scope(scope);

    global::set_meter_provider(meter_provider.clone());
    global::set_tracer_provider(tracer_provider);

    Ok(env_filter()
        .and_then(MetricsLayer::new(meter_provider))
        .and_then(tracing_opentelemetry::layer().with_tracer(tracer))
        .boxed())
}

fn tracer_provider(
    config: &ObservabilityConfig,
    resource: Resource,
) -> Result<SdkTracerProvider, ObservabilityError> {
    let builder = SdkTracerProvider::builder().with_resource(resource);
    if !config.export_enabled {
        return Ok(builder.build());
    }

    let exporter = SpanExporter::builder()
        .with_tonic()
        .build()
        .context(ExporterSnafu {})?;

    Ok(builder.with_batch_exporter(exporter).build())
}

fn meter_provider(
    config: &ObservabilityConfig,
    resource: Resource,
) -> Result<SdkMeterProvider, ObservabilityError> {
    let builder = SdkMeterProvider::builder().with_resource(resource);
    if !config.export_enabled {
        return Ok(builder.build());
    }

    let exporter = MetricExporter::builder()
        .with_tonic()
        .build()
        .context(ExporterSnafu {})?;
    let reader = PeriodicReader::builder(exporter)
        .with_interval(config.metrics_export_interval)
        .build();

    Ok(builder.with_reader(reader).build())
}
