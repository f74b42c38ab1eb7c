use crate::error::TelemetryError;
use opentelemetry::global;
use opentelemetry_sdk::metrics::MeterProvider;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub struct TelemetryConfig {
    pub enable_metrics: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
        }
    }
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))
}

// Convenience function to initialize telemetry with default configuration
pub fn init_telemetry() {
    init_telemetry_with_config(TelemetryConfig::default())
}

pub fn init_telemetry_with_config(config: TelemetryConfig) {
    if !config.enable_metrics {
        info!("Metrics collection disabled");
        return;
    }

    // Initialize OpenTelemetry with default SDK for push-based metrics
    let provider = MeterProvider::builder().build();
    global::set_meter_provider(provider);

    crate::metrics::Metrics::init();
    info!("OpenTelemetry metrics initialized");
}
