//! # Launcher Errors
//!
//! Three tiers, matching how far a failure propagates:
//!
//! - [`LauncherError`]: aborts a reconciliation pass (or start/close).
//! - [`WiringError`]: fails one capability; the pass continues.
//! - [`ShimError`], [`RegistryError`], [`DispatcherError`],
//!   [`TransportError`]: raised by a shim or a port, wrapped into one of
//!   the above by the caller.

use capability_types::{CapabilityError, ConfigDecodeError, DonId, PeerId, ServiceError};
use thiserror::Error;

/// Fatal errors of a reconciliation pass or of the launcher lifecycle.
#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("invariant violation: node is part of more than one workflow DON: {0:?}")]
    MultipleWorkflowDons(Vec<DonId>),

    #[error("could not get peer ID from any source")]
    NoPeerId,

    /// A registry update arrived before `start` resolved the local peer.
    #[error("launcher has not been started")]
    NotStarted,

    #[error("launcher is closed")]
    Closed,

    #[error("failed to update peer connections: {0}")]
    Transport(#[from] TransportError),

    #[error("reconciliation cancelled")]
    Cancelled,
}

/// Per-capability failure. Logged, counted and reported; never aborts the pass.
#[derive(Debug, Error)]
pub enum WiringError {
    #[error("could not decode capability config: {0}")]
    Decode(#[from] ConfigDecodeError),

    #[error("could not find capability matching id {0}")]
    UnknownCapability(String),

    #[error("could not extract version from {capability_id}: {reason}")]
    InvalidVersion {
        capability_id: String,
        reason: String,
    },

    #[error("unsupported stream trigger {0}")]
    UnsupportedStreamTrigger(String),

    #[error("could not find node for peer {0}")]
    UnknownNode(PeerId),

    #[error("failed to create capability info: {0}")]
    Info(#[from] CapabilityError),

    /// The registry holds a capability under this ID that does not honour
    /// the contract its declared type requires.
    #[error("capability {capability_id} does not implement {expected}")]
    ContractMismatch {
        capability_id: String,
        expected: &'static str,
    },

    #[error("failed to set shim config: {0}")]
    Config(#[from] ShimError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Dispatcher(#[from] DispatcherError),

    #[error("failed to start shim: {0}")]
    Start(#[from] ServiceError),

    #[error("method {0} has neither a trigger nor an executable config")]
    EmptyMethodConfig(String),

    /// Some methods of a multi-method capability could not be wired.
    #[error("methods {methods:?} of capability {capability_id} failed")]
    MethodsFailed {
        capability_id: String,
        methods: Vec<String>,
    },

    #[error("cancelled")]
    Cancelled,
}

/// Shim configuration rejected by `set_config`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShimError {
    #[error("capability id mismatch: expected {expected}, got {got}")]
    CapabilityMismatch { expected: String, got: String },

    #[error("invalid DON: {0}")]
    InvalidDon(String),

    #[error("empty workflow DONs provided")]
    NoWorkflowDons,

    #[error("request timeout must be positive")]
    InvalidTimeout,

    #[error("max parallel requests must be positive")]
    InvalidParallelism,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("capability already exists: {0}")]
    AlreadyExists(String),

    #[error("capability not found: {0}")]
    NotFound(String),

    #[error("capability rejected: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatcherError {
    #[error("receiver already exists for {capability_id}/{don_id}{method}")]
    ReceiverExists {
        capability_id: String,
        don_id: DonId,
        method: String,
    },

    #[error("peer {0} is not reachable")]
    Unreachable(PeerId),

    #[error("dispatcher is closed")]
    Closed,
}

impl DispatcherError {
    pub fn receiver_exists(capability_id: &str, don_id: DonId, method: &str) -> Self {
        Self::ReceiverExists {
            capability_id: capability_id.to_string(),
            don_id,
            method: if method.is_empty() {
                String::new()
            } else {
                format!("/{}", method)
            },
        }
    }
}

/// Raised by the peer transports when updating connections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection update failed: {0}")]
    UpdateFailed(String),

    /// The legacy peer wrapper has no peer yet.
    #[error("peer is not available")]
    PeerUnavailable,
}
