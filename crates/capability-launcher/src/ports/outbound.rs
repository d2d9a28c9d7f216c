//! # Driven Ports (Outbound SPI)
//!
//! The collaborators the launcher needs from the host node: the capability
//! registry, the message dispatcher, the two peer transports, and the sinks
//! for DON notifications and metrics.
//!
//! All of them are shared with other components of the node, so every
//! method takes `&self` and implementations do their own locking.

use crate::domain::{
    DispatcherError, LauncherConfig, RegistryError, TransportError, WiringResult,
};
use async_trait::async_trait;
use capability_types::{
    DonId, DonInfo, DonPair, MessageBody, PeerId, RegisteredCapability, RegistrySnapshot,
    StreamConfig,
};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// CAPABILITY REGISTRY
// =============================================================================

/// Node-wide capability registry.
///
/// Local capabilities are added by their own services; the launcher adds
/// remote proxies and looks up local capabilities it has to expose.
#[async_trait]
pub trait CapabilityRegistry: Send + Sync {
    /// Install the snapshot the current pass works on.
    fn set_local_registry(&self, snapshot: Arc<RegistrySnapshot>);

    /// Add a capability. Fails with [`RegistryError::AlreadyExists`] when the
    /// ID is taken.
    async fn add(&self, capability: RegisteredCapability) -> Result<(), RegistryError>;

    async fn get(&self, id: &str) -> Result<RegisteredCapability, RegistryError>;

    async fn remove(&self, id: &str) -> Result<(), RegistryError>;
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// Consumer of remote messages for one capability (and method).
#[async_trait]
pub trait Receiver: Send + Sync {
    async fn receive(&self, message: MessageBody);
}

/// Routes remote messages to receivers keyed by `(capability, DON[, method])`
/// and sends messages to peers.
pub trait Dispatcher: Send + Sync {
    /// Fails with [`DispatcherError::ReceiverExists`] when a receiver is
    /// already set for the key.
    fn set_receiver(
        &self,
        capability_id: &str,
        don_id: DonId,
        receiver: Arc<dyn Receiver>,
    ) -> Result<(), DispatcherError>;

    fn set_receiver_for_method(
        &self,
        capability_id: &str,
        don_id: DonId,
        method: &str,
        receiver: Arc<dyn Receiver>,
    ) -> Result<(), DispatcherError>;

    fn remove_receiver(&self, capability_id: &str, don_id: DonId);

    fn remove_receiver_for_method(&self, capability_id: &str, don_id: DonId, method: &str);

    /// Queue `message` for `to`. The dispatcher stamps the sender.
    fn send(&self, to: PeerId, message: MessageBody) -> Result<(), DispatcherError>;
}

// =============================================================================
// PEER TRANSPORTS
// =============================================================================

/// Single physical peer holding one connection per remote node.
#[async_trait]
pub trait Peer: Send + Sync {
    fn id(&self) -> PeerId;

    fn is_bootstrap(&self) -> bool;

    /// Replace the connected set with `peers`.
    async fn update_connections(
        &self,
        peers: BTreeMap<PeerId, StreamConfig>,
    ) -> Result<(), TransportError>;
}

/// Holder of the single peer, which may not be up yet.
pub trait PeerWrapper: Send + Sync {
    fn peer(&self) -> Option<Arc<dyn Peer>>;
}

/// Peer shared between DON-to-DON channels.
#[async_trait]
pub trait SharedPeer: Send + Sync {
    fn id(&self) -> PeerId;

    fn is_bootstrap(&self) -> bool;

    async fn update_connections_by_dons(
        &self,
        pairs: Vec<DonPair>,
        stream_config: StreamConfig,
    ) -> Result<(), TransportError>;
}

// =============================================================================
// NOTIFICATIONS & METRICS
// =============================================================================

/// Told which workflow DON the node belongs to on every pass.
pub trait DonNotifier: Send + Sync {
    fn notify_don_set(&self, don: DonInfo);
}

/// Launcher counters. Fire and forget.
pub trait LauncherMetrics: Send + Sync {
    fn record_remote_capability_added(
        &self,
        capability_id: &str,
        don_name: &str,
        result: WiringResult,
    );

    fn record_local_capability_exposed(&self, capability_id: &str, result: WiringResult);

    fn increment_completed_updates(&self);
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Source of the launcher configuration.
pub trait ConfigProvider: Send + Sync {
    fn launcher_config(&self) -> LauncherConfig;
}
