//! # Ports Layer
//!
//! - **Driving (inbound):** [`RegistryListener`], driven by the registry
//!   synchronizer.
//! - **Driven (outbound):** registry, dispatcher, peer transports, DON
//!   notifier, metrics and config, provided by the host node.

pub mod inbound;
pub mod outbound;

pub use inbound::RegistryListener;
pub use outbound::{
    CapabilityRegistry, ConfigProvider, Dispatcher, DonNotifier, LauncherMetrics, Peer,
    PeerWrapper, Receiver, SharedPeer,
};
