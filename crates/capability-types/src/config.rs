//! # Capability Configuration
//!
//! Decoding of the per-capability configuration blob a DON publishes for
//! each capability it exposes. The blob carries either a legacy
//! single-method remote config (trigger or target) or a per-method map,
//! plus a `local_only` switch that removes the capability from remote
//! wiring altogether.

use crate::errors::ConfigDecodeError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::collections::BTreeMap;
use std::time::Duration;

/// Protocol generation of a capability's remote wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// One method per capability, shims keyed with an empty method name.
    V1,
    /// Several independently configured methods behind one combined client.
    V2,
}

// =============================================================================
// TRIGGER CONFIG
// =============================================================================

/// Remote trigger settings. Durations travel as milliseconds.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteTriggerConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub registration_refresh: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub registration_expiry: Duration,
    /// Zero means "derive `F + 1` from the remote DON".
    pub min_responses_to_aggregate: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub message_expiry: Duration,
    pub max_batch_size: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub batch_collection_period: Duration,
}

impl RemoteTriggerConfig {
    pub const DEFAULT_REGISTRATION_REFRESH: Duration = Duration::from_secs(30);
    pub const DEFAULT_REGISTRATION_EXPIRY: Duration = Duration::from_secs(120);
    pub const DEFAULT_MESSAGE_EXPIRY: Duration = Duration::from_secs(120);
    pub const DEFAULT_MAX_BATCH_SIZE: u32 = 100;
    pub const DEFAULT_BATCH_COLLECTION_PERIOD: Duration = Duration::from_millis(100);

    /// Fill every unset (zero) field with its default.
    pub fn apply_defaults(&mut self) {
        if self.registration_refresh.is_zero() {
            self.registration_refresh = Self::DEFAULT_REGISTRATION_REFRESH;
        }
        if self.registration_expiry.is_zero() {
            self.registration_expiry = Self::DEFAULT_REGISTRATION_EXPIRY;
        }
        if self.message_expiry.is_zero() {
            self.message_expiry = Self::DEFAULT_MESSAGE_EXPIRY;
        }
        if self.max_batch_size == 0 {
            self.max_batch_size = Self::DEFAULT_MAX_BATCH_SIZE;
        }
        if self.batch_collection_period.is_zero() {
            self.batch_collection_period = Self::DEFAULT_BATCH_COLLECTION_PERIOD;
        }
    }

    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.apply_defaults();
        self
    }
}

// =============================================================================
// EXECUTABLE CONFIG
// =============================================================================

/// How an executable client fans a request out to the remote DON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransmissionSchedule {
    #[default]
    AllAtOnce,
    OneAtATime,
}

impl TransmissionSchedule {
    /// Map the on-chain enum value. Unknown values fall back to `AllAtOnce`.
    pub fn from_enum(value: i32) -> Self {
        match value {
            1 => Self::OneAtATime,
            _ => Self::AllAtOnce,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllAtOnce => "allAtOnce",
            Self::OneAtATime => "oneAtATime",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allAtOnce" => Some(Self::AllAtOnce),
            "oneAtATime" => Some(Self::OneAtATime),
            _ => None,
        }
    }
}

/// Server-side request de-duplication strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestHasherType {
    #[default]
    Simple,
    WriteReportExcludeSignatures,
}

impl RequestHasherType {
    /// Map the on-chain enum value. Unknown values fall back to `Simple`.
    pub fn from_enum(value: i32) -> Self {
        match value {
            1 => Self::WriteReportExcludeSignatures,
            _ => Self::Simple,
        }
    }
}

/// Remote action/target settings for one method.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteExecutableConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
    pub server_max_parallel_requests: u32,
    /// Raw on-chain enum, see [`TransmissionSchedule::from_enum`].
    pub transmission_schedule: i32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub delta_stage: Duration,
    /// Raw on-chain enum, see [`RequestHasherType::from_enum`].
    pub request_hasher_type: i32,
    pub request_hash_excluded_attributes: Vec<String>,
}

impl RemoteExecutableConfig {
    pub fn schedule(&self) -> TransmissionSchedule {
        TransmissionSchedule::from_enum(self.transmission_schedule)
    }

    pub fn hasher_type(&self) -> RequestHasherType {
        RequestHasherType::from_enum(self.request_hasher_type)
    }
}

/// Legacy target settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteTargetConfig {
    pub request_hash_excluded_attributes: Vec<String>,
}

// =============================================================================
// PER-METHOD CONFIG
// =============================================================================

/// Configuration of one method of a multi-method capability.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodConfig {
    pub remote_trigger_config: Option<RemoteTriggerConfig>,
    pub remote_executable_config: Option<RemoteExecutableConfig>,
}

/// Borrowed view of what a method is configured as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodRemote<'a> {
    Trigger(&'a RemoteTriggerConfig),
    Executable(&'a RemoteExecutableConfig),
}

impl MethodConfig {
    pub fn trigger(config: RemoteTriggerConfig) -> Self {
        Self {
            remote_trigger_config: Some(config),
            remote_executable_config: None,
        }
    }

    pub fn executable(config: RemoteExecutableConfig) -> Self {
        Self {
            remote_trigger_config: None,
            remote_executable_config: Some(config),
        }
    }

    /// A trigger config takes precedence. `None` when neither is set.
    pub fn remote(&self) -> Option<MethodRemote<'_>> {
        if let Some(t) = &self.remote_trigger_config {
            return Some(MethodRemote::Trigger(t));
        }
        self.remote_executable_config
            .as_ref()
            .map(MethodRemote::Executable)
    }
}

// =============================================================================
// CAPABILITY CONFIG
// =============================================================================

/// The decoded remote configuration. Exactly one shape per capability.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RemoteConfig {
    /// No remote config given; V1 defaults apply.
    #[default]
    Unspecified,
    Trigger(RemoteTriggerConfig),
    Target(RemoteTargetConfig),
    Methods(BTreeMap<String, MethodConfig>),
}

/// Decoded capability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilityConfig {
    pub local_only: bool,
    pub remote: RemoteConfig,
}

/// On-the-wire layout of the blob.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawCapabilityConfig {
    local_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_trigger_config: Option<RemoteTriggerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_target_config: Option<RemoteTargetConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method_configs: Option<BTreeMap<String, MethodConfig>>,
}

impl CapabilityConfig {
    /// Decode a configuration blob. An empty blob yields the default config.
    pub fn decode(bytes: &[u8]) -> Result<Self, ConfigDecodeError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let raw: RawCapabilityConfig = serde_json::from_slice(bytes)?;

        let mut present = Vec::new();
        if raw.remote_trigger_config.is_some() {
            present.push("remote_trigger_config");
        }
        if raw.remote_target_config.is_some() {
            present.push("remote_target_config");
        }
        if raw.method_configs.is_some() {
            present.push("method_configs");
        }
        if present.len() > 1 {
            return Err(ConfigDecodeError::ConflictingRemoteConfigs(present));
        }

        let remote = match (
            raw.remote_trigger_config,
            raw.remote_target_config,
            raw.method_configs,
        ) {
            (Some(t), _, _) => RemoteConfig::Trigger(t),
            (_, Some(t), _) => RemoteConfig::Target(t),
            (_, _, Some(m)) => RemoteConfig::Methods(m),
            _ => RemoteConfig::Unspecified,
        };

        Ok(Self {
            local_only: raw.local_only,
            remote,
        })
    }

    /// Encode back into a blob.
    pub fn encode(&self) -> Vec<u8> {
        let mut raw = RawCapabilityConfig {
            local_only: self.local_only,
            ..Default::default()
        };
        match &self.remote {
            RemoteConfig::Unspecified => {}
            RemoteConfig::Trigger(t) => raw.remote_trigger_config = Some(t.clone()),
            RemoteConfig::Target(t) => raw.remote_target_config = Some(t.clone()),
            RemoteConfig::Methods(m) => raw.method_configs = Some(m.clone()),
        }
        // Plain structs with string keys; serialization cannot fail.
        serde_json::to_vec(&raw).unwrap_or_default()
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        match self.remote {
            RemoteConfig::Methods(_) => ProtocolVersion::V2,
            _ => ProtocolVersion::V1,
        }
    }

    pub fn trigger_config(&self) -> Option<&RemoteTriggerConfig> {
        match &self.remote {
            RemoteConfig::Trigger(t) => Some(t),
            _ => None,
        }
    }

    pub fn target_config(&self) -> Option<&RemoteTargetConfig> {
        match &self.remote {
            RemoteConfig::Target(t) => Some(t),
            _ => None,
        }
    }

    pub fn method_configs(&self) -> Option<&BTreeMap<String, MethodConfig>> {
        match &self.remote {
            RemoteConfig::Methods(m) => Some(m),
            _ => None,
        }
    }
}
