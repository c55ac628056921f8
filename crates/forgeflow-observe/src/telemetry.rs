//! Tracing subscriber setup for processes embedding the engine.
//!
//! Installs a structured `fmt` layer filtered by `RUST_LOG` (falling back
//! to a forgeflow-scoped default directive), optionally bridged to
//! OpenTelemetry through a stdout span exporter for local development.
//! The returned guard flushes and shuts the exporter down when dropped.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// How a process wants its telemetry wired.
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    /// Bridge tracing spans to OpenTelemetry with a stdout exporter.
    /// Suitable for local development; swap the exporter for OTLP in
    /// production deployments.
    pub otel_stdout: bool,
    /// Filter directive applied when `RUST_LOG` is not set.
    pub default_directive: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            otel_stdout: false,
            default_directive: "forgeflow=info,warn".to_string(),
        }
    }
}

/// Keeps the tracer provider alive; dropping it flushes buffered spans
/// and shuts the exporter down.
#[must_use = "dropping the guard shuts telemetry down"]
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("telemetry shutdown error: {e}");
            }
        }
    }
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error when a global subscriber is already set.
pub fn init(
    settings: &TelemetrySettings,
) -> Result<TelemetryGuard, Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.default_directive));

    if settings.otel_stdout {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("forgeflow");
        opentelemetry::global::set_tracer_provider(provider.clone());

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
        Ok(TelemetryGuard {
            provider: Some(provider),
        })
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
        Ok(TelemetryGuard { provider: None })
    }
}
