//! Tracer setup and management

use bridge_core::config::ObservabilityConfig;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::{SimpleSpanProcessor, TracerProvider};
use std::sync::{Arc, Mutex, OnceLock};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Global tracer provider holder
static TRACER_PROVIDER: OnceLock<Arc<TracerProvider>> = OnceLock::new();

/// Span processor builders registered before initialization
type ProcessorBuilder = Box<dyn FnOnce() -> SimpleSpanProcessor + Send>;
static SPAN_PROCESSOR_BUILDERS: Mutex<Option<Vec<ProcessorBuilder>>> = Mutex::new(Some(Vec::new()));

const DEFAULT_FILTER: &str = "info";

/// Register a span processor (for an exporter such as Jaeger or an OTLP
/// collector) to be installed by [`init_telemetry`].
///
/// Must be called before `init_telemetry`; later registrations are ignored.
pub fn register_span_processor(builder: ProcessorBuilder) {
    let mut builders = SPAN_PROCESSOR_BUILDERS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(ref mut vec) = *builders {
        vec.push(builder);
    } else {
        tracing::warn!("Attempted to register span processor after telemetry initialization");
    }
}

/// Initialize logging and tracing for the process.
///
/// Installs a tracer provider with the registered span processors, an
/// OpenTelemetry layer, and a text or JSON fmt layer depending on
/// `config.json_logs`. The level filter comes from `RUST_LOG` and defaults to
/// `info`.
///
/// Returns `false` when a global subscriber was already installed, which
/// happens when several tests initialize telemetry in one process.
///
/// ```rust,no_run
/// use bridge_core::config::ObservabilityConfig;
/// use bridge_telemetry::init_telemetry;
///
/// init_telemetry(&ObservabilityConfig::default());
/// ```
pub fn init_telemetry(config: &ObservabilityConfig) -> bool {
    // Can only initialize once
    let builders = SPAN_PROCESSOR_BUILDERS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
        .unwrap_or_default();

    let mut provider_builder = TracerProvider::builder();
    for builder in builders {
        provider_builder = provider_builder.with_span_processor(builder());
    }
    let tracer_provider = provider_builder.build();
    let tracer = tracer_provider.tracer(config.service_name.clone());
    let _ = TRACER_PROVIDER.set(Arc::new(tracer_provider));

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json_layer = config.json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
    });
    let text_layer = (!config.json_logs).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(json_layer)
        .with(text_layer)
        .with(filter)
        .try_init()
        .is_ok()
}

/// Get the global tracer provider if initialized
pub fn tracer_provider() -> Option<Arc<TracerProvider>> {
    TRACER_PROVIDER.get().cloned()
}
