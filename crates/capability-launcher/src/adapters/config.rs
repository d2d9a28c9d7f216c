//! # Configuration Adapters
//!
//! - `StaticConfigProvider` - config built in code
//! - `TomlConfigProvider` - config file loading (requires "toml-config" feature)

use crate::domain::LauncherConfig;
use crate::ports::ConfigProvider;

// ============================================================================
// StaticConfigProvider
// ============================================================================

/// Configuration provider with values set in code.
///
/// Useful for tests and embedding. For file-based config, use `TomlConfigProvider`.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    config: LauncherConfig,
}

impl StaticConfigProvider {
    #[must_use]
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn launcher_config(&self) -> LauncherConfig {
        self.config.clone()
    }
}

// ============================================================================
// TomlConfigProvider (requires "toml-config" feature)
// ============================================================================

#[cfg(feature = "toml-config")]
mod toml_config {
    use super::*;
    use crate::domain::{DEFAULT_LAUNCHER_NAME, DEFAULT_MAX_PARALLEL_REQUESTS, DEFAULT_REQUEST_TIMEOUT};
    use capability_types::{StreamConfig, TokenBucketParams};
    use serde::Deserialize;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use thiserror::Error;

    #[derive(Debug, Deserialize, Default)]
    struct ConfigFile {
        #[serde(default)]
        launcher: LauncherSection,
        #[serde(default)]
        streams: StreamSection,
    }

    #[derive(Debug, Deserialize, Default)]
    struct LauncherSection {
        name: Option<String>,
        request_timeout_secs: Option<u64>,
        max_parallel_requests: Option<u32>,
        update_queue_capacity: Option<usize>,
    }

    #[derive(Debug, Deserialize, Default)]
    struct StreamSection {
        incoming_message_buffer_size: Option<usize>,
        outgoing_message_buffer_size: Option<usize>,
        max_message_len_bytes: Option<usize>,
        message_rate: Option<f64>,
        message_capacity: Option<u32>,
        bytes_rate: Option<f64>,
        bytes_capacity: Option<u32>,
    }

    /// TOML-based configuration provider.
    ///
    /// # Config File Format
    ///
    /// ```toml
    /// [launcher]
    /// name = "CapabilitiesLauncher"
    /// request_timeout_secs = 480
    /// max_parallel_requests = 1000
    /// update_queue_capacity = 16
    ///
    /// [streams]
    /// incoming_message_buffer_size = 500
    /// outgoing_message_buffer_size = 500
    /// max_message_len_bytes = 500000
    /// message_rate = 100.0
    /// message_capacity = 500
    /// bytes_rate = 5000000.0
    /// bytes_capacity = 10000000
    /// ```
    ///
    /// Every key is optional.
    #[derive(Debug, Clone)]
    pub struct TomlConfigProvider {
        config: LauncherConfig,
    }

    impl TomlConfigProvider {
        /// Load configuration from a TOML file.
        ///
        /// # Errors
        ///
        /// Returns error if file cannot be read or parsed.
        pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
            let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
                path: path.as_ref().display().to_string(),
                error: e.to_string(),
            })?;
            Self::parse(&content)
        }

        /// Parse configuration from a TOML string.
        pub fn parse(content: &str) -> Result<Self, ConfigError> {
            let file: ConfigFile =
                toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

            let defaults = StreamConfig::default();
            let s = file.streams;
            let stream_config = StreamConfig {
                incoming_message_buffer_size: s
                    .incoming_message_buffer_size
                    .unwrap_or(defaults.incoming_message_buffer_size),
                outgoing_message_buffer_size: s
                    .outgoing_message_buffer_size
                    .unwrap_or(defaults.outgoing_message_buffer_size),
                max_message_len_bytes: s
                    .max_message_len_bytes
                    .unwrap_or(defaults.max_message_len_bytes),
                message_rate_limiter: TokenBucketParams {
                    rate: s.message_rate.unwrap_or(defaults.message_rate_limiter.rate),
                    capacity: s
                        .message_capacity
                        .unwrap_or(defaults.message_rate_limiter.capacity),
                },
                bytes_rate_limiter: TokenBucketParams {
                    rate: s.bytes_rate.unwrap_or(defaults.bytes_rate_limiter.rate),
                    capacity: s.bytes_capacity.unwrap_or(defaults.bytes_rate_limiter.capacity),
                },
            };

            let l = file.launcher;
            let update_queue_capacity = l.update_queue_capacity.unwrap_or(16);
            if update_queue_capacity == 0 {
                return Err(ConfigError::Invalid(
                    "update_queue_capacity must be positive".into(),
                ));
            }
            let config = LauncherConfig {
                name: l.name.unwrap_or_else(|| DEFAULT_LAUNCHER_NAME.to_string()),
                stream_config,
                default_request_timeout: l
                    .request_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
                default_max_parallel_requests: l
                    .max_parallel_requests
                    .unwrap_or(DEFAULT_MAX_PARALLEL_REQUESTS),
                update_queue_capacity,
            };
            Ok(Self { config })
        }
    }

    impl ConfigProvider for TomlConfigProvider {
        fn launcher_config(&self) -> LauncherConfig {
            self.config.clone()
        }
    }

    /// Errors that can occur during config loading.
    #[derive(Debug, Clone, Error)]
    pub enum ConfigError {
        #[error("failed to read {path}: {error}")]
        Io { path: String, error: String },

        #[error("failed to parse config: {0}")]
        Parse(String),

        #[error("invalid config: {0}")]
        Invalid(String),
    }
}

#[cfg(feature = "toml-config")]
pub use toml_config::{ConfigError, TomlConfigProvider};

// ============================================================================
// Tests
// ============================================================================
