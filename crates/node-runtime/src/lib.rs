//! # Node Runtime Library
//!
//! Exposes the pieces of the capability node for testing. The main entry
//! point is the `main.rs` binary.
//!
//! - `container/` - node configuration and the assembled [`CapabilityNode`]
//! - `adapters/` - transport and notifier adapters for a standalone node

#![allow(clippy::type_complexity)]

pub mod adapters;
pub mod container;

pub use container::{load_snapshot, CapabilityNode, ConfigError, NodeConfig, TransportMode};
