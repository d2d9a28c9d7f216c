//! # Capability Node
//!
//! Owns one node's dispatcher, capability registry, transports and
//! launcher, plus the worker that feeds registry snapshots to the launcher.
//!
//! ## Startup Sequence
//!
//! 1. Start the dispatcher
//! 2. Start the launcher (resolves the local peer ID)
//! 3. Spawn the registry update worker
//!
//! Shutdown runs the same steps backwards.

use super::config::NodeConfig;
use crate::adapters::{PeerSlot, PlannedPeer, PlannedSharedPeer, WorkflowDonNotifier};
use anyhow::{Context, Result};
use capability_launcher::adapters::{
    InMemoryCapabilityRegistry, InMemoryDispatcher, InMemoryNetwork, PrometheusLauncherMetrics,
};
use capability_launcher::{
    Launcher, LauncherConfig, LauncherDependencies, Peer, PeerWrapper, RegistryUpdateSender,
    RegistryUpdateWorker, SharedPeer,
};
use capability_types::{HealthReport, RegistrySnapshot, Service};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct CapabilityNode {
    config: NodeConfig,
    launcher: Arc<Launcher>,
    registry: Arc<InMemoryCapabilityRegistry>,
    dispatcher: Arc<InMemoryDispatcher>,
    notifier: Arc<WorkflowDonNotifier>,
    peer: Option<Arc<PlannedPeer>>,
    shared_peer: Option<Arc<PlannedSharedPeer>>,
    shutdown: CancellationToken,
    updates: RegistryUpdateSender,
    worker: Mutex<Option<RegistryUpdateWorker>>,
    worker_task: Mutex<Option<JoinHandle<usize>>>,
}

impl CapabilityNode {
    /// Assemble the node on `network`. Nothing runs until [`Self::start`].
    pub fn new(
        config: NodeConfig,
        launcher_config: LauncherConfig,
        network: &Arc<InMemoryNetwork>,
    ) -> Self {
        let dispatcher = network.join(config.peer_id);
        let registry = Arc::new(InMemoryCapabilityRegistry::new());
        let notifier = Arc::new(WorkflowDonNotifier::new());

        let peer = config
            .transport
            .legacy()
            .then(|| PlannedPeer::new(config.peer_id, config.bootstrap));
        let shared_peer = config
            .transport
            .shared()
            .then(|| PlannedSharedPeer::new(config.peer_id, config.bootstrap));

        let deps = LauncherDependencies {
            registry: registry.clone(),
            dispatcher: dispatcher.clone(),
            don_notifier: notifier.clone(),
            metrics: Arc::new(PrometheusLauncherMetrics),
            peer_wrapper: peer.clone().map(|p| {
                let slot: Arc<dyn PeerWrapper> = PeerSlot::new(Some(p as Arc<dyn Peer>));
                slot
            }),
            shared_peer: shared_peer.clone().map(|p| {
                let shared: Arc<dyn SharedPeer> = p;
                shared
            }),
        };

        let queue_capacity = launcher_config.update_queue_capacity;
        let launcher = Arc::new(Launcher::new(launcher_config, deps));
        let shutdown = CancellationToken::new();
        let (worker, updates) =
            RegistryUpdateWorker::new(launcher.clone(), queue_capacity, shutdown.child_token());

        Self {
            config,
            launcher,
            registry,
            dispatcher,
            notifier,
            peer,
            shared_peer,
            shutdown,
            updates,
            worker: Mutex::new(Some(worker)),
            worker_task: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<()> {
        self.dispatcher
            .start()
            .await
            .context("failed to start dispatcher")?;
        self.launcher
            .start()
            .await
            .context("failed to start capabilities launcher")?;

        let worker = self
            .worker
            .lock()
            .take()
            .context("node already started")?;
        *self.worker_task.lock() = Some(tokio::spawn(worker.run()));

        info!(
            peer_id = %self.config.peer_id,
            bootstrap = self.config.bootstrap,
            transport = ?self.config.transport,
            "capability node started"
        );
        Ok(())
    }

    /// Queue a registry snapshot for the launcher.
    pub async fn apply(&self, snapshot: RegistrySnapshot) -> Result<()> {
        self.updates
            .send(Arc::new(snapshot))
            .await
            .context("registry update queue closed")?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("initiating graceful shutdown");
        self.shutdown.cancel();

        let task = self.worker_task.lock().take();
        if let Some(task) = task {
            match task.await {
                Ok(passes) => info!(passes, "registry update worker joined"),
                Err(e) => warn!(error = %e, "registry update worker panicked"),
            }
        }
        if let Err(e) = self.launcher.close().await {
            warn!(error = %e, "failed to close launcher");
        }
        if let Err(e) = self.dispatcher.close().await {
            warn!(error = %e, "failed to close dispatcher");
        }
        info!("shutdown complete");
    }

    pub fn health_report(&self) -> HealthReport {
        let mut report = self.launcher.health_report();
        report.extend(self.dispatcher.health_report());
        report
    }

    pub fn launcher(&self) -> &Arc<Launcher> {
        &self.launcher
    }

    pub fn registry(&self) -> &Arc<InMemoryCapabilityRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<InMemoryDispatcher> {
        &self.dispatcher
    }

    pub fn notifier(&self) -> &Arc<WorkflowDonNotifier> {
        &self.notifier
    }

    pub fn peer(&self) -> Option<&Arc<PlannedPeer>> {
        self.peer.as_ref()
    }

    pub fn shared_peer(&self) -> Option<&Arc<PlannedSharedPeer>> {
        self.shared_peer.as_ref()
    }
}
