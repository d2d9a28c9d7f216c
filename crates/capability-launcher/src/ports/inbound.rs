//! # Driving Ports (Inbound API)
//!
//! What the registry synchronizer calls.

use crate::domain::{LauncherError, ReconciliationReport};
use async_trait::async_trait;
use capability_types::RegistrySnapshot;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Receiver of registry snapshots.
///
/// Callers must not overlap calls; the launcher also serializes them
/// internally.
#[async_trait]
pub trait RegistryListener: Send + Sync {
    /// Reconcile shims, registry entries and peer connections against
    /// `snapshot`.
    ///
    /// Per-capability failures are reported, not returned. Errors are
    /// fatal for the pass: more than one workflow DON, a failed connection
    /// update, cancellation, or a launcher that is not running.
    async fn on_new_registry(
        &self,
        snapshot: Arc<RegistrySnapshot>,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, LauncherError>;
}
