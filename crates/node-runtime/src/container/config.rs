//! # Node Configuration
//!
//! Who the node is, where its launcher configuration and registry snapshot
//! live, and which peer transports it runs.

use capability_types::{PeerId, RegistrySnapshot};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Which peer transports the node wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// One peer connected to a flat peer set.
    Legacy,
    /// DON-to-DON channels through a shared peer.
    SharedPeer,
    #[default]
    Both,
}

impl TransportMode {
    pub fn legacy(self) -> bool {
        matches!(self, Self::Legacy | Self::Both)
    }

    pub fn shared(self) -> bool {
        matches!(self, Self::SharedPeer | Self::Both)
    }
}

impl FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "shared" | "shared-peer" => Ok(Self::SharedPeer),
            "both" => Ok(Self::Both),
            other => Err(ConfigError::Invalid(format!("unknown transport mode {}", other))),
        }
    }
}

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's P2P identity.
    pub peer_id: PeerId,
    /// Bootstrap nodes hold connections but serve no capabilities.
    pub bootstrap: bool,
    /// Launcher TOML file; defaults apply when unset.
    pub launcher_config: Option<PathBuf>,
    /// Registry snapshot (JSON) applied on startup.
    pub registry_snapshot: Option<PathBuf>,
    pub transport: TransportMode,
}

impl NodeConfig {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            bootstrap: false,
            launcher_config: None,
            registry_snapshot: None,
            transport: TransportMode::default(),
        }
    }

    /// Read the configuration from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `CAP_PEER_ID`: hex-encoded 32-byte peer ID (required)
    /// - `CAP_BOOTSTRAP`: `true`/`1` for bootstrap nodes (default: false)
    /// - `CAP_LAUNCHER_CONFIG`: launcher TOML path (default: built-in defaults)
    /// - `CAP_REGISTRY_SNAPSHOT`: registry snapshot JSON path (default: none)
    /// - `CAP_TRANSPORT`: `legacy`, `shared` or `both` (default: both)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let raw = lookup("CAP_PEER_ID").ok_or(ConfigError::Missing("CAP_PEER_ID"))?;
        let peer_id: PeerId = raw
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("CAP_PEER_ID: {}", e)))?;
        if peer_id.is_zero() {
            return Err(ConfigError::Invalid("CAP_PEER_ID must not be zero".into()));
        }

        let mut config = Self::new(peer_id);
        config.bootstrap = lookup("CAP_BOOTSTRAP")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);
        config.launcher_config = lookup("CAP_LAUNCHER_CONFIG").map(PathBuf::from);
        config.registry_snapshot = lookup("CAP_REGISTRY_SNAPSHOT").map(PathBuf::from);
        if let Some(mode) = lookup("CAP_TRANSPORT") {
            config.transport = mode.parse()?;
        }
        Ok(config)
    }
}

/// Read a registry snapshot from a JSON file.
pub fn load_snapshot(path: &Path) -> Result<RegistrySnapshot, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::Snapshot(e.to_string()))
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("malformed registry snapshot: {0}")]
    Snapshot(String),
}
