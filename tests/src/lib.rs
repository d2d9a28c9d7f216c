//! # Capability Control Plane Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── benchmarks/       # Snapshot generators shared with benches/
//! │   └── topology.rs
//! │
//! └── integration/      # Several launchers on one in-memory network
//!     ├── flows.rs      # Wiring, execution and trigger delivery
//!     └── planner.rs    # Classifier and planner properties
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p capability-tests
//!
//! # By category
//! cargo test -p capability-tests integration::flows
//!
//! # Benchmarks
//! cargo bench -p capability-tests
//! ```

#![allow(dead_code)]

pub mod benchmarks;
pub mod integration;
