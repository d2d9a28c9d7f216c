//! # Benchmark Fixtures
//!
//! Registry snapshots sized for stress runs of the classifier and the
//! topology planner.

pub mod topology;

pub use topology::{peer_id, GeneratedNetwork};
