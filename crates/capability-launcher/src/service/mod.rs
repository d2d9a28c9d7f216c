//! # Launcher Service
//!
//! The reconciliation core. For every registry snapshot the launcher:
//!
//! 1. classifies the DONs relative to the local node,
//! 2. wires every remote capability its workflow DON may call,
//! 3. exposes the local capabilities of its capability DONs,
//! 4. hands the planned peer set / DON pairs to the transports.
//!
//! Per-capability failures end up in the [`ReconciliationReport`] and the
//! metrics; only the errors in [`LauncherError`] abort a pass.
//!
//! Shims are cached by [`ShimKey`] and reconfigured in place on later
//! passes, so delivering the same snapshot twice is a no-op for the
//! registry and the dispatcher.
//!
//! [`ReconciliationReport`]: crate::domain::ReconciliationReport
//! [`LauncherError`]: crate::domain::LauncherError
//! [`ShimKey`]: crate::domain::ShimKey

mod core;
mod lifecycle;
mod local_wiring;
mod reconcile;
mod remote_wiring;
mod shim_cache;
mod worker;

pub use self::core::{Launcher, LauncherDependencies};
pub use worker::{RegistryUpdateSender, RegistryUpdateWorker};

#[cfg(test)]
mod tests;
