//! # Adapter Implementations
//!
//! Node-side implementations of the launcher's outbound ports that the
//! launcher crate does not ship itself: the two peer transports and the
//! workflow DON notifier.

pub mod notifier;
pub mod transport;

pub use notifier::WorkflowDonNotifier;
pub use transport::{PeerSlot, PlannedPeer, PlannedSharedPeer};
