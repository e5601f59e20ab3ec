// Tracing initialization with a reloadable log level, optional rolling file
// output and optional OTLP span export.
use std::sync::OnceLock;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::Layered;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*, reload};

use crate::config::{LogFormat, LoggingConfig, OtelConfig};

type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync + 'static>;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Keeps the non-blocking file writer alive. Drop it last.
#[must_use = "dropping the guard stops the file log writer"]
pub struct TracingGuard {
    _file: Option<WorkerGuard>,
}

/// Installs the global subscriber. `RUST_LOG` wins over `logging.level`.
///
/// Calling it twice keeps the first subscriber; the second call only returns
/// a guard.
pub fn init_tracing(logging: &LoggingConfig, otel: &OtelConfig) -> anyhow::Result<TracingGuard> {
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(&logging.level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(match logging.format {
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Text => fmt::layer().boxed(),
    });

    let mut file_guard = None;
    if logging.file_enabled {
        let appender = RollingFileAppender::new(
            rotation(&logging.file_rotation),
            &logging.file_directory,
            &logging.file_prefix,
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
    }

    if otel.enabled {
        let provider = build_tracer_provider(otel)?;
        let tracer = provider.tracer("medgate");
        layers.push(tracing_opentelemetry::layer().with_tracer(tracer).boxed());
        opentelemetry::global::set_tracer_provider(provider.clone());
        let _ = TRACER_PROVIDER.set(provider);
    }

    if tracing_subscriber::registry()
        .with(reload_layer)
        .with(layers)
        .try_init()
        .is_ok()
    {
        let _ = LOG_RELOAD_HANDLE.set(handle);
        if otel.enabled {
            tracing::info!(
                endpoint = otel.endpoint.as_deref().unwrap_or(""),
                sample_ratio = ?otel.sample_ratio,
                "OTLP trace export enabled"
            );
        }
    }

    Ok(TracingGuard { _file: file_guard })
}

fn rotation(name: &str) -> Rotation {
    match name {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

fn build_tracer_provider(otel: &OtelConfig) -> anyhow::Result<SdkTracerProvider> {
    let endpoint = otel
        .endpoint
        .as_deref()
        .filter(|e| !e.is_empty())
        .ok_or_else(|| anyhow::anyhow!("otel.enabled=true requires otel.endpoint"))?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()?;

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".into());
    let mut attributes = vec![KeyValue::new("host.name", host)];
    if let Some(env) = &otel.environment {
        attributes.push(KeyValue::new("deployment.environment", env.clone()));
    }
    let resource = Resource::builder()
        .with_service_name(otel.service_name.clone())
        .with_attributes(attributes)
        .build();

    let ratio = otel.sample_ratio.unwrap_or(1.0);
    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
            ratio,
        ))))
        .with_resource(resource)
        .build())
}

/// Apply a new logging level at runtime if reload handle is configured.
pub fn apply_logging_level(level: &str) {
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|f| {
            *f = EnvFilter::new(level);
        });
    }
}

/// Flushes exported spans, then the file writer. Call before exiting the
/// process; `std::process::exit` skips destructors.
pub fn finish_tracing(guard: TracingGuard) {
    shutdown_tracing();
    drop(guard);
}

/// Flushes pending spans. Safe to call when export was never enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(e) = provider.shutdown()
    {
        eprintln!("Failed to shut down tracer provider: {e}");
    }
}
