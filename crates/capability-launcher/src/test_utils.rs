//! Mocks and fixtures shared by the unit and integration tests.
//!
//! Enabled for this crate's tests and, for other crates, through the
//! `test-utils` feature.

use crate::adapters::{InMemoryCapabilityRegistry, InMemoryDispatcher, InMemoryNetwork};
use crate::domain::{DispatcherError, LauncherConfig, RegistryError, TransportError, WiringResult};
use crate::ports::{
    CapabilityRegistry, Dispatcher, DonNotifier, LauncherMetrics, Peer, PeerWrapper, Receiver,
    SharedPeer,
};
use crate::service::{Launcher, LauncherDependencies};
use async_trait::async_trait;
use capability_types::{
    BaseCapability, CapabilityConfig, CapabilityError, CapabilityInfo, CapabilityRequest,
    CapabilityResponse, CapabilityType, Don, DonId, DonInfo, DonPair, ExecutableCapability,
    MessageBody, MethodConfig, NodeInfo, PeerId, RegisteredCapability, RegistryCapability,
    RegistrySnapshot, RemoteConfig, StreamConfig, TriggerCapability, TriggerEvent, TriggerRegistrationRequest,
    TriggerResponse, WorkflowRegistration,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const WORKFLOW_DON_ID: DonId = 1;
pub const CAPABILITY_DON_ID: DonId = 2;

/// Deterministic peer ID: every byte is `n`.
pub fn peer(n: u8) -> PeerId {
    PeerId::new([n; 32])
}

/// Let spawned receiver tasks run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

// =============================================================================
// TOPOLOGY
// =============================================================================

/// A workflow DON (ID 1, peers 1..=4) and a capability DON (ID 2, peers
/// 11..=14), both `F = 1` and public. Every member has a node entry whose
/// signer is its peer byte repeated.
#[derive(Debug, Clone)]
pub struct TestTopology {
    pub workflow_don: DonInfo,
    pub capability_don: DonInfo,
    /// Capability ID to (type, config) exposed by the capability DON.
    pub capabilities: BTreeMap<String, (CapabilityType, CapabilityConfig)>,
}

impl Default for TestTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl TestTopology {
    pub fn new() -> Self {
        let mut workflow_don = DonInfo::new(WORKFLOW_DON_ID, 1, (1..=4).map(peer).collect());
        workflow_don.accepts_workflows = true;
        let capability_don = DonInfo::new(CAPABILITY_DON_ID, 1, (11..=14).map(peer).collect());
        Self {
            workflow_don,
            capability_don,
            capabilities: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_capability(
        mut self,
        id: &str,
        capability_type: CapabilityType,
        config: CapabilityConfig,
    ) -> Self {
        self.capabilities
            .insert(id.to_string(), (capability_type, config));
        self
    }

    /// Single-method capability with default remote config.
    #[must_use]
    pub fn with_v1(self, id: &str, capability_type: CapabilityType) -> Self {
        self.with_capability(id, capability_type, CapabilityConfig::default())
    }

    /// Multi-method capability.
    #[must_use]
    pub fn with_v2(self, id: &str, methods: BTreeMap<String, MethodConfig>) -> Self {
        self.with_capability(
            id,
            CapabilityType::Combined,
            CapabilityConfig {
                local_only: false,
                remote: RemoteConfig::Methods(methods),
            },
        )
    }

    pub fn workflow_peers(&self) -> Vec<PeerId> {
        self.workflow_don.members.clone()
    }

    pub fn capability_peers(&self) -> Vec<PeerId> {
        self.capability_don.members.clone()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut capability_don = Don::new(self.capability_don.clone());
        let mut snapshot = RegistrySnapshot::new();
        for (id, (capability_type, config)) in &self.capabilities {
            capability_don = capability_don.with_capability(id.as_str(), config.encode());
            snapshot = snapshot.with_capability(RegistryCapability::new(id.as_str(), *capability_type));
        }
        snapshot = snapshot
            .with_don(Don::new(self.workflow_don.clone()))
            .with_don(capability_don);
        for member in self
            .workflow_don
            .members
            .iter()
            .chain(&self.capability_don.members)
        {
            snapshot = snapshot.with_node(NodeInfo::new(*member, *member.as_bytes()));
        }
        snapshot
    }
}

// =============================================================================
// TRANSPORTS
// =============================================================================

/// Peer recording every connection update.
pub struct MockPeer {
    id: PeerId,
    bootstrap: bool,
    updates: Mutex<Vec<BTreeMap<PeerId, StreamConfig>>>,
    fail: AtomicBool,
}

impl MockPeer {
    pub fn new(id: PeerId) -> Arc<Self> {
        Self::with_bootstrap(id, false)
    }

    pub fn with_bootstrap(id: PeerId, bootstrap: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            bootstrap,
            updates: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn updates(&self) -> Vec<BTreeMap<PeerId, StreamConfig>> {
        self.updates.lock().clone()
    }

    pub fn last_update(&self) -> Option<BTreeMap<PeerId, StreamConfig>> {
        self.updates.lock().last().cloned()
    }
}

#[async_trait]
impl Peer for MockPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    fn is_bootstrap(&self) -> bool {
        self.bootstrap
    }

    async fn update_connections(
        &self,
        peers: BTreeMap<PeerId, StreamConfig>,
    ) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::UpdateFailed("mock peer refused update".into()));
        }
        self.updates.lock().push(peers);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPeerWrapper {
    peer: RwLock<Option<Arc<MockPeer>>>,
}

impl MockPeerWrapper {
    pub fn new(peer: Option<Arc<MockPeer>>) -> Arc<Self> {
        Arc::new(Self {
            peer: RwLock::new(peer),
        })
    }

    pub fn set_peer(&self, peer: Option<Arc<MockPeer>>) {
        *self.peer.write() = peer;
    }
}

impl PeerWrapper for MockPeerWrapper {
    fn peer(&self) -> Option<Arc<dyn Peer>> {
        self.peer
            .read()
            .clone()
            .map(|p| p as Arc<dyn Peer>)
    }
}

/// Shared peer recording every DON pair update.
pub struct MockSharedPeer {
    id: PeerId,
    bootstrap: bool,
    updates: Mutex<Vec<(Vec<DonPair>, StreamConfig)>>,
}

impl MockSharedPeer {
    pub fn new(id: PeerId) -> Arc<Self> {
        Arc::new(Self {
            id,
            bootstrap: false,
            updates: Mutex::new(Vec::new()),
        })
    }

    pub fn updates(&self) -> Vec<(Vec<DonPair>, StreamConfig)> {
        self.updates.lock().clone()
    }
}

#[async_trait]
impl SharedPeer for MockSharedPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    fn is_bootstrap(&self) -> bool {
        self.bootstrap
    }

    async fn update_connections_by_dons(
        &self,
        pairs: Vec<DonPair>,
        stream_config: StreamConfig,
    ) -> Result<(), TransportError> {
        self.updates.lock().push((pairs, stream_config));
        Ok(())
    }
}

// =============================================================================
// RECORDING PORTS
// =============================================================================

#[derive(Default)]
pub struct RecordingDonNotifier {
    dons: Mutex<Vec<DonInfo>>,
}

impl RecordingDonNotifier {
    pub fn notified(&self) -> Vec<DonInfo> {
        self.dons.lock().clone()
    }
}

impl DonNotifier for RecordingDonNotifier {
    fn notify_don_set(&self, don: DonInfo) {
        self.dons.lock().push(don);
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    pub remote: Mutex<Vec<(String, String, WiringResult)>>,
    pub local: Mutex<Vec<(String, WiringResult)>>,
    pub completed_updates: AtomicUsize,
}

impl RecordingMetrics {
    pub fn remote_results(&self, capability_id: &str) -> Vec<WiringResult> {
        self.remote
            .lock()
            .iter()
            .filter(|(id, _, _)| id == capability_id)
            .map(|(_, _, r)| *r)
            .collect()
    }

    pub fn local_results(&self, capability_id: &str) -> Vec<WiringResult> {
        self.local
            .lock()
            .iter()
            .filter(|(id, _)| id == capability_id)
            .map(|(_, r)| *r)
            .collect()
    }

    pub fn completed(&self) -> usize {
        self.completed_updates.load(Ordering::SeqCst)
    }
}

impl LauncherMetrics for RecordingMetrics {
    fn record_remote_capability_added(&self, capability_id: &str, don_name: &str, result: WiringResult) {
        self.remote
            .lock()
            .push((capability_id.to_string(), don_name.to_string(), result));
    }

    fn record_local_capability_exposed(&self, capability_id: &str, result: WiringResult) {
        self.local.lock().push((capability_id.to_string(), result));
    }

    fn increment_completed_updates(&self) {
        self.completed_updates.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory registry counting calls.
#[derive(Default)]
pub struct RecordingRegistry {
    pub inner: InMemoryCapabilityRegistry,
    pub adds: AtomicUsize,
    pub gets: AtomicUsize,
    pub removes: AtomicUsize,
}

impl RecordingRegistry {
    pub fn add_count(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn remove_count(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityRegistry for RecordingRegistry {
    fn set_local_registry(&self, snapshot: Arc<RegistrySnapshot>) {
        self.inner.set_local_registry(snapshot);
    }

    async fn add(&self, capability: RegisteredCapability) -> Result<(), RegistryError> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.inner.add(capability).await
    }

    async fn get(&self, id: &str) -> Result<RegisteredCapability, RegistryError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(id).await
    }

    async fn remove(&self, id: &str) -> Result<(), RegistryError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(id).await
    }
}

/// Dispatcher wrapper counting receiver registrations.
pub struct RecordingDispatcher {
    inner: Arc<InMemoryDispatcher>,
    set_receivers: AtomicUsize,
    sent: Mutex<Vec<(PeerId, MessageBody)>>,
}

impl RecordingDispatcher {
    pub fn new(inner: Arc<InMemoryDispatcher>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            set_receivers: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn inner(&self) -> &Arc<InMemoryDispatcher> {
        &self.inner
    }

    pub fn set_receiver_count(&self) -> usize {
        self.set_receivers.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(PeerId, MessageBody)> {
        self.sent.lock().clone()
    }
}

impl Dispatcher for RecordingDispatcher {
    fn set_receiver(
        &self,
        capability_id: &str,
        don_id: DonId,
        receiver: Arc<dyn Receiver>,
    ) -> Result<(), DispatcherError> {
        self.set_receivers.fetch_add(1, Ordering::SeqCst);
        self.inner.set_receiver(capability_id, don_id, receiver)
    }

    fn set_receiver_for_method(
        &self,
        capability_id: &str,
        don_id: DonId,
        method: &str,
        receiver: Arc<dyn Receiver>,
    ) -> Result<(), DispatcherError> {
        self.set_receivers.fetch_add(1, Ordering::SeqCst);
        self.inner
            .set_receiver_for_method(capability_id, don_id, method, receiver)
    }

    fn remove_receiver(&self, capability_id: &str, don_id: DonId) {
        self.inner.remove_receiver(capability_id, don_id);
    }

    fn remove_receiver_for_method(&self, capability_id: &str, don_id: DonId, method: &str) {
        self.inner
            .remove_receiver_for_method(capability_id, don_id, method);
    }

    fn send(&self, to: PeerId, message: MessageBody) -> Result<(), DispatcherError> {
        self.sent.lock().push((to, message.clone()));
        self.inner.send(to, message)
    }
}

// =============================================================================
// CAPABILITIES
// =============================================================================

/// Local trigger whose events are pushed by the test.
pub struct MockTrigger {
    id: String,
    subscribers: Mutex<HashMap<String, mpsc::Sender<TriggerResponse>>>,
}

impl MockTrigger {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            subscribers: Mutex::new(HashMap::new()),
        })
    }

    pub fn registered(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.subscribers.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Deliver an event to every registered workflow.
    pub fn emit(&self, event_id: &str, payload: &[u8]) -> usize {
        let subscribers: Vec<mpsc::Sender<TriggerResponse>> =
            self.subscribers.lock().values().cloned().collect();
        let mut delivered = 0;
        for tx in subscribers {
            let response = TriggerResponse {
                event: TriggerEvent {
                    id: event_id.to_string(),
                    payload: payload.to_vec(),
                },
                error: None,
            };
            if tx.try_send(response).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

impl BaseCapability for MockTrigger {
    fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        Ok(CapabilityInfo::local(&self.id, CapabilityType::Trigger, "mock trigger"))
    }
}

#[async_trait]
impl TriggerCapability for MockTrigger {
    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<mpsc::Receiver<TriggerResponse>, CapabilityError> {
        let (tx, rx) = mpsc::channel(16);
        self.subscribers.lock().insert(request.workflow_id, tx);
        Ok(rx)
    }

    async fn unregister_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<(), CapabilityError> {
        self.subscribers.lock().remove(&request.workflow_id);
        Ok(())
    }
}

/// Local action answering every request with `prefix ++ payload`.
pub struct MockExecutable {
    id: String,
    capability_type: CapabilityType,
    prefix: Vec<u8>,
    executions: AtomicUsize,
}

impl MockExecutable {
    pub fn new(id: &str, capability_type: CapabilityType) -> Arc<Self> {
        Self::with_prefix(id, capability_type, b"ok:")
    }

    pub fn with_prefix(id: &str, capability_type: CapabilityType, prefix: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            capability_type,
            prefix: prefix.to_vec(),
            executions: AtomicUsize::new(0),
        })
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

impl BaseCapability for MockExecutable {
    fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        Ok(CapabilityInfo::local(&self.id, self.capability_type, "mock executable"))
    }
}

#[async_trait]
impl ExecutableCapability for MockExecutable {
    async fn execute(&self, request: CapabilityRequest) -> Result<CapabilityResponse, CapabilityError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let mut payload = self.prefix.clone();
        payload.extend_from_slice(&request.payload);
        Ok(CapabilityResponse { payload })
    }

    async fn register_to_workflow(&self, _request: WorkflowRegistration) -> Result<(), CapabilityError> {
        Ok(())
    }

    async fn unregister_from_workflow(&self, _request: WorkflowRegistration) -> Result<(), CapabilityError> {
        Ok(())
    }
}

/// Multi-method capability: a trigger and an executable behind one ID.
pub struct MockCombined {
    pub trigger: Arc<MockTrigger>,
    pub executable: Arc<MockExecutable>,
    id: String,
}

impl MockCombined {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            trigger: MockTrigger::new(id),
            executable: MockExecutable::new(id, CapabilityType::Combined),
            id: id.to_string(),
        })
    }
}

impl BaseCapability for MockCombined {
    fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        Ok(CapabilityInfo::local(&self.id, CapabilityType::Combined, "mock combined"))
    }
}

#[async_trait]
impl TriggerCapability for MockCombined {
    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<mpsc::Receiver<TriggerResponse>, CapabilityError> {
        self.trigger.register_trigger(request).await
    }

    async fn unregister_trigger(&self, request: TriggerRegistrationRequest) -> Result<(), CapabilityError> {
        self.trigger.unregister_trigger(request).await
    }
}

#[async_trait]
impl ExecutableCapability for MockCombined {
    async fn execute(&self, request: CapabilityRequest) -> Result<CapabilityResponse, CapabilityError> {
        self.executable.execute(request).await
    }

    async fn register_to_workflow(&self, request: WorkflowRegistration) -> Result<(), CapabilityError> {
        self.executable.register_to_workflow(request).await
    }

    async fn unregister_from_workflow(&self, request: WorkflowRegistration) -> Result<(), CapabilityError> {
        self.executable.unregister_from_workflow(request).await
    }
}

// =============================================================================
// HARNESS
// =============================================================================

/// One launcher wired to recording ports, joined to `network`.
pub struct TestHarness {
    pub launcher: Arc<Launcher>,
    pub registry: Arc<RecordingRegistry>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub notifier: Arc<RecordingDonNotifier>,
    pub metrics: Arc<RecordingMetrics>,
    pub peer: Arc<MockPeer>,
    pub peer_wrapper: Arc<MockPeerWrapper>,
    pub shared_peer: Arc<MockSharedPeer>,
}

impl TestHarness {
    pub fn new(network: &Arc<InMemoryNetwork>, me: PeerId) -> Self {
        Self::with_config(network, me, LauncherConfig::default())
    }

    pub fn with_config(network: &Arc<InMemoryNetwork>, me: PeerId, config: LauncherConfig) -> Self {
        let registry = Arc::new(RecordingRegistry::default());
        let dispatcher = RecordingDispatcher::new(network.join(me));
        let notifier = Arc::new(RecordingDonNotifier::default());
        let metrics = Arc::new(RecordingMetrics::default());
        let peer = MockPeer::new(me);
        let peer_wrapper = MockPeerWrapper::new(Some(peer.clone()));
        let shared_peer = MockSharedPeer::new(me);
        let launcher = Arc::new(Launcher::new(
            config,
            LauncherDependencies {
                registry: registry.clone(),
                dispatcher: dispatcher.clone(),
                don_notifier: notifier.clone(),
                metrics: metrics.clone(),
                peer_wrapper: Some(peer_wrapper.clone()),
                shared_peer: Some(shared_peer.clone()),
            },
        ));
        Self {
            launcher,
            registry,
            dispatcher,
            notifier,
            metrics,
            peer,
            peer_wrapper,
            shared_peer,
        }
    }
}
