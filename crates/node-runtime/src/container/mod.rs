//! # Node Container
//!
//! Node configuration and the assembled [`CapabilityNode`] holding every
//! service of one node with its lifetime managed in one place.

pub mod config;
pub mod node;

pub use config::{load_snapshot, ConfigError, NodeConfig, TransportMode};
pub use node::CapabilityNode;
