use super::core::Launcher;
use crate::domain::LauncherError;
use async_trait::async_trait;
use capability_types::{HealthReport, PeerId, Service, ServiceError, ServiceErrorKind};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

impl Launcher {
    /// Peer ID from the legacy peer wrapper, else from the shared peer.
    fn resolve_peer_id(&self) -> Option<PeerId> {
        if let Some(peer) = self.deps.peer_wrapper.as_ref().and_then(|w| w.peer()) {
            return Some(peer.id());
        }
        self.deps.shared_peer.as_ref().map(|p| p.id())
    }
}

#[async_trait]
impl Service for Launcher {
    fn name(&self) -> String {
        self.config.name.clone()
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.service_state.start_once(&self.name())?;
        let Some(peer_id) = self.resolve_peer_id() else {
            self.service_state.reset_start();
            return Err(ServiceError::new(
                self.name(),
                ServiceErrorKind::StartFailed,
                LauncherError::NoPeerId.to_string(),
            ));
        };
        *self.peer_id.write() = Some(peer_id);
        info!(%peer_id, "capabilities launcher started");
        Ok(())
    }

    /// Close every started shim in start order, then drop the peer set.
    /// Shim close errors are logged and do not stop the others.
    async fn close(&self) -> Result<(), ServiceError> {
        self.service_state.stop_once(&self.name())?;
        let mut state = self.state.lock().await;
        for service in &state.sub_services {
            if let Err(e) = service.close().await {
                warn!(service = %service.name(), error = %e, "failed to close sub-service");
            }
        }
        let closed = state.sub_services.len();
        state.sub_services.clear();
        state.cache.clear();
        drop(state);

        if let Some(peer) = self.deps.peer_wrapper.as_ref().and_then(|w| w.peer()) {
            if let Err(e) = peer.update_connections(BTreeMap::new()).await {
                error!(error = %e, "failed to clear peer connections");
                return Err(ServiceError::new(
                    self.name(),
                    ServiceErrorKind::CloseFailed,
                    e.to_string(),
                ));
            }
        }
        info!(closed, "capabilities launcher closed");
        Ok(())
    }

    fn ready(&self) -> Result<(), ServiceError> {
        self.service_state.ready(&self.name())
    }

    /// Launcher health plus every shim it owns. Shims are left out while a
    /// reconciliation pass holds the state.
    fn health_report(&self) -> HealthReport {
        let mut report = HealthReport::new();
        report.insert(self.name(), self.ready());
        if let Ok(state) = self.state.try_lock() {
            for service in &state.sub_services {
                report.extend(service.health_report());
            }
        }
        report
    }
}
