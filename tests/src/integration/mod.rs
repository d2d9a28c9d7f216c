//! # Integration Tests
//!
//! Launchers talking to each other, and the planner run over registries
//! far larger than the unit tests use.

pub mod flows;
pub mod planner;
