//! Launcher tuning knobs.

use capability_types::StreamConfig;
use std::time::Duration;

/// Request timeout of single-method executable clients and servers.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(8 * 60);

/// Concurrent requests a single-method executable server runs.
pub const DEFAULT_MAX_PARALLEL_REQUESTS: u32 = 1000;

pub const DEFAULT_LAUNCHER_NAME: &str = "CapabilitiesLauncher";

/// Configuration of the launcher.
///
/// Multi-method capabilities carry their own timeouts in the registry; the
/// request settings here only apply to single-method ones.
#[derive(Debug, Clone, PartialEq)]
pub struct LauncherConfig {
    /// Service name reported by `name()` and in health reports.
    pub name: String,
    /// Limits applied to every peer stream the planner asks for.
    pub stream_config: StreamConfig,
    pub default_request_timeout: Duration,
    pub default_max_parallel_requests: u32,
    /// Capacity of the registry update queue feeding the worker.
    pub update_queue_capacity: usize,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_LAUNCHER_NAME.to_string(),
            stream_config: StreamConfig::default(),
            default_request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_max_parallel_requests: DEFAULT_MAX_PARALLEL_REQUESTS,
            update_queue_capacity: 16,
        }
    }
}

impl LauncherConfig {
    #[must_use]
    pub fn with_stream_config(mut self, stream_config: StreamConfig) -> Self {
        self.stream_config = stream_config;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.default_request_timeout = timeout;
        self
    }
}
