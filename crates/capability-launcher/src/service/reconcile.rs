//! # Reconciliation Pass
//!
//! Entry point for registry snapshots. Holds the state lock for the whole
//! pass; see the module docs of [`crate::service`] for the steps.

use super::core::Launcher;
use crate::domain::{
    don_pairs_to_update, peers, DonClassification, LauncherError, ReconciliationReport,
    TransportError, WiringError, WiringResult,
};
use crate::ports::RegistryListener;
use async_trait::async_trait;
use capability_types::{DonId, DonInfo, RegistrySnapshot, ServiceStatus};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Run `fut` unless `cancel` fires first.
pub(super) async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, WiringError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WiringError::Cancelled),
        out = fut => Ok(out),
    }
}

impl Launcher {
    /// Reconcile shims, registry entries and peer connections against
    /// `snapshot`.
    pub async fn reconcile(
        &self,
        snapshot: Arc<RegistrySnapshot>,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, LauncherError> {
        match self.service_state.status() {
            ServiceStatus::Running => {}
            ServiceStatus::Unstarted => return Err(LauncherError::NotStarted),
            ServiceStatus::Stopped => return Err(LauncherError::Closed),
        }
        let me = self.peer_id().ok_or(LauncherError::NotStarted)?;
        let mut state = self.state.lock().await;
        debug!("capabilities launcher triggered");

        self.deps.registry.set_local_registry(Arc::clone(&snapshot));
        let dons = DonClassification::classify(&snapshot, &me)?;
        debug!(
            all_dons = ?dons.all_dons.iter().map(|d| d.id()).collect::<Vec<_>>(),
            my_workflow_dons = dons.my_workflow_dons.len(),
            remote_workflow_dons = dons.remote_workflow_dons.len(),
            my_capability_dons = dons.my_capability_dons.len(),
            remote_capability_dons = dons.remote_capability_dons.len(),
            families = ?dons.my_families,
            "classified DONs"
        );

        let mut report = ReconciliationReport::default();

        if let Some(my_don) = dons.my_workflow_don() {
            debug!(don_id = my_don.id(), "notifying DON set");
            self.deps.don_notifier.notify_don_set(my_don.info.clone());
            for remote_don in &dons.remote_capability_dons {
                self.add_remote_capabilities(
                    &mut state,
                    &snapshot,
                    &my_don.info,
                    remote_don,
                    cancel,
                    &mut report,
                )
                .await?;
            }
        }

        let workflow_dons: HashMap<DonId, DonInfo> = dons
            .remote_workflow_dons
            .iter()
            .map(|d| (d.id(), d.info.clone()))
            .collect();
        for my_don in &dons.my_capability_dons {
            self.serve_capabilities(
                &mut state,
                &snapshot,
                my_don,
                &workflow_dons,
                cancel,
                &mut report,
            )
            .await?;
        }

        if let Some(wrapper) = &self.deps.peer_wrapper {
            let peer = wrapper.peer().ok_or(TransportError::PeerUnavailable)?;
            let my_peers = peers(
                &dons.all_dons,
                dons.belongs_to_capability_don(),
                dons.belongs_to_workflow_don(),
                peer.is_bootstrap(),
                self.config.stream_config,
            );
            debug!(peers = my_peers.len(), "updating peer connections");
            report.peer_count = Some(my_peers.len());
            peer.update_connections(my_peers).await?;
        }
        if let Some(shared_peer) = &self.deps.shared_peer {
            let pairs = don_pairs_to_update(&dons.all_dons, &me, shared_peer.is_bootstrap());
            debug!(pairs = ?pairs.iter().map(|p| p.ids()).collect::<Vec<_>>(), "updating DON pair connections");
            report.don_pair_count = Some(pairs.len());
            shared_peer
                .update_connections_by_dons(pairs, self.config.stream_config)
                .await?;
        }

        self.deps.metrics.increment_completed_updates();
        info!(
            wired = report.count(WiringResult::Success),
            skipped = report.count(WiringResult::Skipped),
            failed = report.count(WiringResult::Failure),
            sub_services = state.sub_services.len(),
            "registry update reconciled"
        );
        Ok(report)
    }
}

#[async_trait]
impl RegistryListener for Launcher {
    async fn on_new_registry(
        &self,
        snapshot: Arc<RegistrySnapshot>,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, LauncherError> {
        self.reconcile(snapshot, cancel).await
    }
}
