//! # Capability Telemetry
//!
//! Observability for the capability control plane.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with env filter, JSON or compact output
//! - **Tracing**: optional OTLP span export (feature `otlp`)
//! - **Metrics**: Prometheus counters for the launcher's call contract
//!
//! ## Usage
//!
//! ```rust,ignore
//! use capability_telemetry::{TelemetryConfig, init_telemetry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(&config).expect("Failed to init telemetry");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CAP_SERVICE_NAME` | `capability-node` | Service name in logs and traces |
//! | `CAP_LOG_LEVEL` | `info` | Log filter (falls back to `RUST_LOG`) |
//! | `CAP_JSON_LOGS` | `false` | JSON log lines |
//! | `CAP_METRICS_PORT` | unset | Prometheus text endpoint |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | unset | OTLP collector (`otlp` feature) |

mod config;
mod logging;
pub mod metrics;
#[cfg(feature = "otlp")]
mod tracing_setup;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging, LoggingGuard};
pub use metrics::{
    encode_metrics, register_metrics, serve_metrics, COMPLETED_UPDATES,
    LOCAL_CAPABILITY_EXPOSED, REMOTE_CAPABILITY_ADDED,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize OpenTelemetry tracer: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Metrics endpoint failed: {0}")]
    MetricsServer(String),
}

/// Initialize logging and register metrics.
///
/// Returns a guard that must be held for the lifetime of the application.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    register_metrics()?;
    let logging = init_logging(config)?;
    Ok(TelemetryGuard { _logging: logging })
}

/// Guard that keeps telemetry active. Drop to flush and shutdown.
pub struct TelemetryGuard {
    _logging: LoggingGuard,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("shutting down telemetry");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
