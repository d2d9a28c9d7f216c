//! # Capability Types Crate
//!
//! Shared data model for the capability control plane.
//!
//! ## Contents
//!
//! - **Entities**: registry snapshot, DONs, nodes, DON pairs, stream limits.
//! - **Config**: decoding of per-capability configuration blobs (V1 legacy
//!   trigger/target configs or V2 per-method maps).
//! - **Capability**: trigger/executable contracts and the closed
//!   [`RegisteredCapability`] variant stored in the capability registry.
//! - **Message**: the envelope shims exchange through the dispatcher.
//! - **Service**: start/close/health lifecycle of long-lived components.

pub mod capability;
pub mod config;
pub mod entities;
pub mod errors;
pub mod message;
pub mod service;

pub use capability::*;
pub use config::*;
pub use entities::*;
pub use errors::*;
pub use message::*;
pub use service::*;
