//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! The server installs this once at startup; one-shot CLI commands pass a
//! quieter filter. `RUST_LOG` overrides whatever filter the caller picked.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use std::sync::OnceLock;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// How the subscriber should be configured.
pub struct TracingOptions<'a> {
    /// Base filter directive, e.g. `"info,sagaflow=debug"`. `RUST_LOG`
    /// takes precedence when set.
    pub filter: &'a str,
    /// Bridge spans to OpenTelemetry with a stdout exporter. Suitable for
    /// local development; swap the exporter for OTLP in production.
    pub enable_otel: bool,
    /// Include span close timing in the fmt output. Useful for the server,
    /// noise for one-shot CLI commands.
    pub span_timing: bool,
}

impl Default for TracingOptions<'_> {
    fn default() -> Self {
        Self {
            filter: "info,sagaflow=debug",
            enable_otel: false,
            span_timing: true,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set.
pub fn init_tracing(options: TracingOptions<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let span_events = if options.span_timing {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(span_events);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.filter));

    if options.enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("sagaflow");
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// Call this before process exit so buffered spans are exported. No-op when
/// OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}
