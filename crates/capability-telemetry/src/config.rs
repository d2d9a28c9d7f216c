//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging, tracing and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to logs and traces
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or a full
    /// `EnvFilter` directive string
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable output
    pub json_logs: bool,

    /// Write logs to stdout at all
    pub console_output: bool,

    /// Port of the Prometheus text endpoint; `None` disables it
    pub metrics_port: Option<u16>,

    /// OTLP collector endpoint; only used with the `otlp` feature
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "capability-node".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            console_output: true,
            metrics_port: None,
            otlp_endpoint: None,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CAP_SERVICE_NAME` or `OTEL_SERVICE_NAME`: Service name (default: capability-node)
    /// - `CAP_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `CAP_JSON_LOGS`: JSON output (default: false, true in containers)
    /// - `CAP_CONSOLE_OUTPUT`: Console output (default: true)
    /// - `CAP_METRICS_PORT`: Prometheus endpoint port (default: disabled)
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector (default: disabled)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("CAP_SERVICE_NAME")
                .or_else(|_| env::var("OTEL_SERVICE_NAME"))
                .unwrap_or_else(|_| "capability-node".to_string()),

            log_level: env::var("CAP_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("CAP_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            console_output: env::var("CAP_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),

            metrics_port: env::var("CAP_METRICS_PORT")
                .ok()
                .and_then(|v| v.parse().ok()),

            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
        }
    }

    /// Override the log filter, e.g. from a CLI flag.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

fn parse_flag(v: &str) -> bool {
    v.eq_ignore_ascii_case("true") || v == "1"
}
