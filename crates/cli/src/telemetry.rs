//! Tracing subscriber and OpenTelemetry exporter wiring.
//!
//! Every crate in the workspace emits `tracing` spans and events; this module
//! installs the single subscriber they flow into. A formatted log layer is
//! always present. An OTLP span exporter is added when
//! `telemetry.otlp_endpoint` is configured.

use anyhow::Context;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::settings::{LogFormat, TelemetrySettings};

const SERVICE_NAME: &str = "changesync";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Flushes and shuts down the span exporter when dropped.
#[must_use = "dropping the guard shuts down span export"]
pub struct TelemetryGuard {
    provider: Option<TracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("failed to shut down span exporter: {err}");
            }
        }
    }
}

/// `RUST_LOG` when set, `info` otherwise.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn log_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Json => fmt::layer().json().with_filter(env_filter()).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_filter(env_filter()).boxed(),
    }
}

fn otlp_provider(endpoint: &str) -> anyhow::Result<TracerProvider> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .with_context(|| format!("failed to build OTLP exporter for {endpoint}"))?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            SERVICE_NAME,
        )]))
        .build())
}

/// Installs the global subscriber. Must be called once, inside the Tokio
/// runtime, before any other component starts.
pub fn init(settings: &TelemetrySettings) -> anyhow::Result<TelemetryGuard> {
    let mut layers: Vec<BoxedLayer> = vec![log_layer(settings.format)];

    let provider = match settings.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let provider = otlp_provider(endpoint)?;
            layers.push(
                tracing_opentelemetry::layer()
                    .with_tracer(provider.tracer(SERVICE_NAME))
                    .with_filter(env_filter())
                    .boxed(),
            );
            global::set_tracer_provider(provider.clone());
            Some(provider)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(TelemetryGuard { provider })
}
