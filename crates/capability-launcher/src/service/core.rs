use super::shim_cache::ShimCache;
use crate::domain::{LauncherConfig, ShimKey};
use crate::ports::{
    CapabilityRegistry, Dispatcher, DonNotifier, LauncherMetrics, PeerWrapper, SharedPeer,
};
use crate::remote::{
    CombinedClient, ExecutableClient, ExecutableServer, TriggerPublisher, TriggerSubscriber,
};
use capability_types::{PeerId, Service, ServiceState};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Dependencies for [`Launcher`].
///
/// At least one of `peer_wrapper` and `shared_peer` must be set, otherwise
/// `start` cannot resolve the local peer.
pub struct LauncherDependencies {
    pub registry: Arc<dyn CapabilityRegistry>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub don_notifier: Arc<dyn DonNotifier>,
    pub metrics: Arc<dyn LauncherMetrics>,
    /// Legacy transport: one peer connected to a flat peer set.
    pub peer_wrapper: Option<Arc<dyn PeerWrapper>>,
    /// DON-to-DON transport: one channel per DON pair.
    pub shared_peer: Option<Arc<dyn SharedPeer>>,
}

/// State mutated by a reconciliation pass. Guarded by one async mutex that
/// is held for the whole pass, so passes never overlap.
#[derive(Default)]
pub(crate) struct LauncherState {
    pub(crate) cache: ShimCache,
    /// Started shims, in start order. Closed in the same order.
    pub(crate) sub_services: Vec<Arc<dyn Service>>,
}

/// Capabilities launcher.
///
/// # Example
///
/// ```rust,ignore
/// let launcher = Arc::new(Launcher::new(LauncherConfig::default(), deps));
/// launcher.start().await?;
///
/// let report = launcher.on_new_registry(snapshot, &cancel).await?;
/// println!("{} capabilities wired", report.count(WiringResult::Success));
///
/// launcher.close().await?;
/// ```
pub struct Launcher {
    pub(crate) config: LauncherConfig,
    pub(crate) deps: LauncherDependencies,
    pub(crate) state: Mutex<LauncherState>,
    pub(crate) peer_id: RwLock<Option<PeerId>>,
    pub(crate) service_state: ServiceState,
}

impl Launcher {
    pub fn new(config: LauncherConfig, deps: LauncherDependencies) -> Self {
        Self {
            config,
            deps,
            state: Mutex::new(LauncherState::default()),
            peer_id: RwLock::new(None),
            service_state: ServiceState::new(),
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Local peer, resolved by `start`.
    pub fn peer_id(&self) -> Option<PeerId> {
        *self.peer_id.read()
    }

    pub async fn sub_service_count(&self) -> usize {
        self.state.lock().await.sub_services.len()
    }

    pub async fn cached_shim_count(&self) -> usize {
        self.state.lock().await.cache.len()
    }

    pub async fn trigger_subscriber(&self, key: &ShimKey) -> Option<Arc<TriggerSubscriber>> {
        self.state.lock().await.cache.trigger_subscribers.get(key).cloned()
    }

    pub async fn executable_client(&self, key: &ShimKey) -> Option<Arc<ExecutableClient>> {
        self.state.lock().await.cache.executable_clients.get(key).cloned()
    }

    /// Combined client of a multi-method capability; keyed without a method.
    pub async fn combined_client(&self, key: &ShimKey) -> Option<Arc<CombinedClient>> {
        self.state.lock().await.cache.combined_clients.get(key).cloned()
    }

    pub async fn trigger_publisher(&self, key: &ShimKey) -> Option<Arc<TriggerPublisher>> {
        self.state.lock().await.cache.trigger_publishers.get(key).cloned()
    }

    pub async fn executable_server(&self, key: &ShimKey) -> Option<Arc<ExecutableServer>> {
        self.state.lock().await.cache.executable_servers.get(key).cloned()
    }
}
