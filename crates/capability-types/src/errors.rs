//! # Shared Errors
//!
//! Error types raised by the value objects in this crate. Launcher-level
//! errors live next to the launcher; these only cover decoding and the
//! capability contracts.

use thiserror::Error;

/// Failure to parse a peer identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerIdError {
    /// Input was not valid hex.
    #[error("invalid peer id hex: {0}")]
    InvalidHex(String),

    /// Decoded bytes had the wrong length.
    #[error("invalid peer id length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// Failure to decode a capability configuration blob.
#[derive(Debug, Error)]
pub enum ConfigDecodeError {
    /// The blob is not valid JSON for a capability configuration.
    #[error("malformed capability configuration: {0}")]
    Malformed(#[from] serde_json::Error),

    /// More than one of the legacy trigger, legacy target and per-method
    /// configurations was supplied.
    #[error("capability configuration sets more than one remote config: {0:?}")]
    ConflictingRemoteConfigs(Vec<&'static str>),
}

/// Errors returned by capability implementations (local or remote shims).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// Capability ID was empty.
    #[error("capability id must not be empty")]
    EmptyId,

    /// DON descriptor has no members.
    #[error("DON {0} has no members")]
    EmptyDon(u32),

    /// Shim was used before its configuration was set.
    #[error("config not set for capability {0}")]
    NotConfigured(String),

    /// The requested method is not served by this capability.
    #[error("method {method} not defined for capability {capability_id}")]
    MethodNotDefined {
        /// Capability the call was made against
        capability_id: String,
        /// Method that was requested
        method: String,
    },

    /// Operation is not supported by this capability.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Request was rejected before being sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Remote execution did not reach a quorum before the timeout.
    #[error("request {0} timed out")]
    Timeout(String),

    /// Request was cancelled (shim closed or caller gave up).
    #[error("request {0} cancelled")]
    Cancelled(String),

    /// Remote side answered with an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// Payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for CapabilityError {
    fn from(e: serde_json::Error) -> Self {
        CapabilityError::Codec(e.to_string())
    }
}
