//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber with:
//! - an `EnvFilter` built from [`TelemetryConfig::log_level`]
//! - JSON lines (containers, log shippers) or compact human output
//! - an OpenTelemetry layer when the `otlp` feature is enabled and an
//!   endpoint is configured

use crate::{TelemetryConfig, TelemetryError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Keeps exporters alive; dropping it flushes pending spans.
pub struct LoggingGuard {
    #[cfg(feature = "otlp")]
    _tracing: Option<crate::tracing_setup::TracingGuard>,
}

/// Build the filter for `config`. Falls back to `info` on a bad directive.
pub fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Fails if a global subscriber was already set.
pub fn init_logging(config: &TelemetryConfig) -> Result<LoggingGuard, TelemetryError> {
    let fmt_layer = if !config.console_output {
        None
    } else if config.json_logs {
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .boxed(),
        )
    } else {
        Some(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true)
                .with_ansi(true)
                .boxed(),
        )
    };

    let registry = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(config));

    #[cfg(feature = "otlp")]
    {
        let (otel_layer, guard) = match &config.otlp_endpoint {
            Some(endpoint) => {
                let (layer, guard) = crate::tracing_setup::otel_layer(config, endpoint)?;
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };
        registry
            .with(otel_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

        tracing::info!(
            service = %config.service_name,
            json_logs = config.json_logs,
            otlp = config.otlp_endpoint.is_some(),
            "logging initialized"
        );
        Ok(LoggingGuard { _tracing: guard })
    }

    #[cfg(not(feature = "otlp"))]
    {
        registry
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

        tracing::info!(
            service = %config.service_name,
            json_logs = config.json_logs,
            "logging initialized"
        );
        Ok(LoggingGuard {})
    }
}
