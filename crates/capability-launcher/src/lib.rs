//! # Capabilities Launcher
//!
//! Keeps a node's remote capability wiring in sync with the capability
//! registry. On every registry snapshot the launcher decides which DONs the
//! node belongs to, builds or reconfigures the shims that let workflows use
//! capabilities of other DONs, exposes the node's own capabilities to remote
//! workflow DONs, and tells the transports which peers to connect to.
//!
//! ## Architecture
//!
//! ```text
//!  registry syncer ──snapshot──→ RegistryUpdateWorker ──→ Launcher
//!                                                           │
//!            ┌──────────────────────┬───────────────────────┼───────────────────┐
//!            ↓                      ↓                       ↓                   ↓
//!    DonClassification      remote shims (consume)   local shims (expose)   peers() /
//!    (workflow / capability  TriggerSubscriber         TriggerPublisher     don_pairs_to_update
//!     DONs, mine / remote)   ExecutableClient          ExecutableServer          │
//!                            CombinedClient                 │                     ↓
//!                                 │                         │             Peer / SharedPeer
//!                                 └──── CapabilityRegistry ─┴── Dispatcher
//! ```
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - classifier, topology planner, aggregation policy, errors
//! - `ports/` - inbound listener and outbound registry/dispatcher/peer traits
//! - `remote/` - the shims that proxy capabilities between DONs
//! - `service/` - the launcher and its update worker
//! - `adapters/` - in-process registry, dispatcher, metrics and config
//!
//! ## Invariants
//!
//! | Invariant | Enforced by |
//! |-----------|-------------|
//! | A node belongs to at most one workflow DON | `DonClassification::classify` |
//! | One shim per `(capability, DON, method)` | the launcher's shim cache |
//! | Redelivering a snapshot touches neither registry nor dispatcher | cached shims are reconfigured in place |
//! | Only public DONs are wired remotely | `public_dons` |
//!
//! ## Usage
//!
//! ```ignore
//! use capability_launcher::{Launcher, LauncherConfig, RegistryUpdateWorker};
//!
//! let launcher = Arc::new(Launcher::new(LauncherConfig::default(), deps));
//! launcher.start().await?;
//!
//! let (worker, updates) = RegistryUpdateWorker::new(launcher.clone(), 16, cancel.clone());
//! tokio::spawn(worker.run());
//! updates.send(Arc::new(snapshot)).await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod remote;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export key types for convenience
pub use domain::{
    don_pairs_to_update, peers, DonClassification, LauncherConfig, LauncherError,
    ReconciliationReport, ShimKey, WiringError, WiringResult,
};
pub use ports::inbound::RegistryListener;
pub use ports::outbound::{
    CapabilityRegistry, ConfigProvider, Dispatcher, DonNotifier, LauncherMetrics, Peer,
    PeerWrapper, Receiver, SharedPeer,
};
pub use service::{Launcher, LauncherDependencies, RegistryUpdateSender, RegistryUpdateWorker};
