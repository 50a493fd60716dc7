//! Logging and OpenTelemetry initialization.
//!
//! Always installs a fmt layer. When an OTLP endpoint is configured, traces,
//! logs and metrics are also exported over gRPC.

use std::time::Duration;

use anyhow::{Context, Result};
use myoconf::TelemetryConfig;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_FILTER: &str = "info,myocast=debug,myocapture=debug";

/// Keeps exporter providers alive until [`Telemetry::shutdown`].
#[derive(Default)]
pub struct Telemetry {
    tracer: Option<SdkTracerProvider>,
    logger: Option<SdkLoggerProvider>,
    meter: Option<SdkMeterProvider>,
}

/// Filter directives for a configured log level. Plain `info` gets the
/// crate-level debug defaults.
pub fn filter_directives(log_level: &str) -> String {
    match log_level.trim() {
        "" | "info" => DEFAULT_FILTER.to_string(),
        other => other.to_string(),
    }
}

/// Initialize tracing, with OTLP export when an endpoint is configured.
pub fn init(config: &TelemetryConfig) -> Result<Telemetry> {
    let env_filter = EnvFilter::try_new(filter_directives(&config.log_level))
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("Failed to build log filter")?;

    let Some(otlp_endpoint) = config.otlp_endpoint.as_deref() else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(Telemetry::default());
    };

    // Create resource with service metadata (shared across all signals)
    let resource = Resource::builder_empty()
        .with_service_name("myocast")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let endpoint = if otlp_endpoint.contains("://") {
        otlp_endpoint.to_string()
    } else {
        format!("http://{otlp_endpoint}")
    };

    // 1. Traces
    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_span_processor(
            opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build(),
        )
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let tracer = tracer_provider.tracer("myocast");
    global::set_tracer_provider(tracer_provider.clone());

    // 2. Logs
    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let logger_provider = SdkLoggerProvider::builder()
        .with_log_processor(
            opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build(),
        )
        .with_resource(resource.clone())
        .build();

    // 3. Metrics
    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let meter_provider = SdkMeterProvider::builder()
        .with_reader(opentelemetry_sdk::metrics::PeriodicReader::builder(metric_exporter).build())
        .with_resource(resource)
        .build();

    global::set_meter_provider(meter_provider.clone());

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let log_appender =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .with(log_appender)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!("🔭 OpenTelemetry exporting to {}", otlp_endpoint);

    Ok(Telemetry {
        tracer: Some(tracer_provider),
        logger: Some(logger_provider),
        meter: Some(meter_provider),
    })
}

impl Telemetry {
    pub fn is_exporting(&self) -> bool {
        self.tracer.is_some()
    }

    /// Flush and stop exporters. Failures are logged, not returned.
    pub fn shutdown(self) {
        if !self.is_exporting() {
            return;
        }
        tracing::info!("🔭 Shutting down OpenTelemetry...");

        if let Some(tracer) = self.tracer {
            if let Err(e) = tracer.shutdown() {
                tracing::warn!("trace exporter shutdown failed: {e}");
            }
        }
        if let Some(meter) = self.meter {
            if let Err(e) = meter.shutdown() {
                tracing::warn!("metric exporter shutdown failed: {e}");
            }
        }
        // last, so the warnings above can still be exported
        if let Some(logger) = self.logger {
            if let Err(e) = logger.shutdown() {
                eprintln!("log exporter shutdown failed: {e}");
            }
        }
    }
}
