use super::*;
use crate::adapters::{InMemoryNetwork, NoopLauncherMetrics};
use crate::domain::{
    Direction, LauncherConfig, LauncherError, Outcome, ReconciliationReport, RegistryError,
    ShimKey, TransportError, WiringError, WiringResult,
};
use crate::ports::{CapabilityRegistry, Dispatcher, Receiver, RegistryListener};
use crate::test_utils::*;
use async_trait::async_trait;
use capability_types::{
    BaseCapability, CapabilityConfig, CapabilityType, Don, DonInfo, MessageBody, MethodConfig,
    RegisteredCapability, RegistrySnapshot, RemoteConfig, RemoteExecutableConfig,
    RemoteTriggerConfig, Service, ServiceErrorKind, StreamConfig,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TRIGGER: &str = "trigger-a@1.0.0";
const TARGET: &str = "write-chain@1.0.0";
const COMBINED: &str = "evm@1.0.0";

fn v1_topology() -> TestTopology {
    TestTopology::new()
        .with_v1(TRIGGER, CapabilityType::Trigger)
        .with_v1(TARGET, CapabilityType::Target)
}

fn v2_methods() -> BTreeMap<String, MethodConfig> {
    BTreeMap::from([
        (
            "Read".to_string(),
            MethodConfig::executable(RemoteExecutableConfig {
                request_timeout: Duration::from_secs(30),
                server_max_parallel_requests: 10,
                ..Default::default()
            }),
        ),
        (
            "LogTrigger".to_string(),
            MethodConfig::trigger(RemoteTriggerConfig::default()),
        ),
    ])
}

async fn started(network: &Arc<InMemoryNetwork>, me: u8) -> TestHarness {
    let harness = TestHarness::new(network, peer(me));
    harness.launcher.start().await.unwrap();
    harness
}

async fn reconcile(
    harness: &TestHarness,
    topology: &TestTopology,
) -> Result<ReconciliationReport, LauncherError> {
    harness
        .launcher
        .on_new_registry(Arc::new(topology.snapshot()), &CancellationToken::new())
        .await
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test]
async fn test_start_without_peer_fails() {
    let network = InMemoryNetwork::new();
    let launcher = Launcher::new(
        LauncherConfig::default(),
        LauncherDependencies {
            registry: Arc::new(RecordingRegistry::default()),
            dispatcher: network.join(peer(1)),
            don_notifier: Arc::new(RecordingDonNotifier::default()),
            metrics: Arc::new(NoopLauncherMetrics),
            peer_wrapper: Some(MockPeerWrapper::new(None)),
            shared_peer: None,
        },
    );

    let err = launcher.start().await.unwrap_err();
    assert_eq!(err.kind, ServiceErrorKind::StartFailed);
    assert!(err.message.contains("could not get peer ID from any source"));
    assert!(launcher.peer_id().is_none());
    assert!(launcher.ready().is_err());
}

#[tokio::test]
async fn test_start_falls_back_to_shared_peer() {
    let network = InMemoryNetwork::new();
    let launcher = Launcher::new(
        LauncherConfig::default(),
        LauncherDependencies {
            registry: Arc::new(RecordingRegistry::default()),
            dispatcher: network.join(peer(3)),
            don_notifier: Arc::new(RecordingDonNotifier::default()),
            metrics: Arc::new(NoopLauncherMetrics),
            peer_wrapper: Some(MockPeerWrapper::new(None)),
            shared_peer: Some(MockSharedPeer::new(peer(3))),
        },
    );

    launcher.start().await.unwrap();
    assert_eq!(launcher.peer_id(), Some(peer(3)));
    assert!(launcher.ready().is_ok());
}

#[tokio::test]
async fn test_reconcile_before_start_fails() {
    let network = InMemoryNetwork::new();
    let harness = TestHarness::new(&network, peer(1));

    let err = reconcile(&harness, &v1_topology()).await.unwrap_err();
    assert!(matches!(err, LauncherError::NotStarted));
    assert_eq!(harness.registry.add_count(), 0);
}

#[tokio::test]
async fn test_close_releases_shims_and_peers() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    reconcile(&harness, &v1_topology()).await.unwrap();
    assert_eq!(harness.launcher.sub_service_count().await, 2);

    harness.launcher.close().await.unwrap();

    assert_eq!(harness.launcher.sub_service_count().await, 0);
    assert_eq!(harness.launcher.cached_shim_count().await, 0);
    assert_eq!(harness.peer.last_update(), Some(BTreeMap::new()));
    let err = reconcile(&harness, &v1_topology()).await.unwrap_err();
    assert!(matches!(err, LauncherError::Closed));
}

#[tokio::test]
async fn test_health_report_lists_shims() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    reconcile(&harness, &v1_topology()).await.unwrap();

    let report = harness.launcher.health_report();
    assert!(report.contains_key("CapabilitiesLauncher"));
    assert!(report.values().all(|r| r.is_ok()));
    assert!(report.len() >= 2);
}

// =============================================================================
// CONSUMING REMOTE CAPABILITIES
// =============================================================================

#[tokio::test]
async fn test_workflow_node_wires_remote_capabilities() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;

    let report = reconcile(&harness, &v1_topology()).await.unwrap();

    assert_eq!(report.count(WiringResult::Success), 2);
    assert_eq!(harness.registry.inner.ids(), vec![TARGET.to_string(), TRIGGER.to_string()]);
    assert_eq!(harness.launcher.sub_service_count().await, 2);
    assert!(harness
        .launcher
        .trigger_subscriber(&ShimKey::new(TRIGGER, CAPABILITY_DON_ID))
        .await
        .is_some());
    assert!(harness
        .launcher
        .executable_client(&ShimKey::new(TARGET, CAPABILITY_DON_ID))
        .await
        .is_some());
    assert!(harness.dispatcher.inner().has_receiver(TRIGGER, CAPABILITY_DON_ID, ""));

    let notified = harness.notifier.notified();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].id, WORKFLOW_DON_ID);
    assert_eq!(harness.metrics.remote_results(TRIGGER), vec![WiringResult::Success]);
    assert_eq!(harness.metrics.completed(), 1);
    let local = harness.registry.inner.local_registry().unwrap();
    assert_eq!(local.ids_to_dons.len(), 2);
}

#[tokio::test]
async fn test_workflow_node_connects_to_capability_don_only() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    let topology = v1_topology();

    let report = reconcile(&harness, &topology).await.unwrap();

    let connected = harness.peer.last_update().unwrap();
    assert_eq!(report.peer_count, Some(4));
    for member in topology.capability_peers() {
        assert!(connected.contains_key(&member));
    }
    assert!(!connected.contains_key(&peer(2)));

    let pairs = harness.shared_peer.updates();
    assert_eq!(pairs.len(), 1);
    assert_eq!(
        pairs[0].0.iter().map(|p| p.ids()).collect::<Vec<_>>(),
        vec![(WORKFLOW_DON_ID, CAPABILITY_DON_ID)]
    );
    assert_eq!(report.don_pair_count, Some(1));
}

#[tokio::test]
async fn test_stream_config_reaches_both_transports() {
    let network = InMemoryNetwork::new();
    let streams = StreamConfig {
        max_message_len_bytes: 1024,
        ..StreamConfig::default()
    };
    let config = LauncherConfig::default().with_stream_config(streams);
    let harness = TestHarness::with_config(&network, peer(1), config);
    harness.launcher.start().await.unwrap();

    reconcile(&harness, &v1_topology()).await.unwrap();

    let connected = harness.peer.last_update().unwrap();
    assert!(!connected.is_empty());
    assert!(connected.values().all(|c| *c == streams));
    assert_eq!(harness.shared_peer.updates()[0].1, streams);
}

#[tokio::test]
async fn test_redelivered_snapshot_is_a_no_op() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    let topology = v1_topology();

    reconcile(&harness, &topology).await.unwrap();
    let adds = harness.registry.add_count();
    let receivers = harness.dispatcher.set_receiver_count();
    let shims = harness.launcher.cached_shim_count().await;

    let report = reconcile(&harness, &topology).await.unwrap();

    assert_eq!(report.count(WiringResult::Success), 2);
    assert_eq!(harness.registry.add_count(), adds);
    assert_eq!(harness.dispatcher.set_receiver_count(), receivers);
    assert_eq!(harness.launcher.cached_shim_count().await, shims);
    assert_eq!(harness.launcher.sub_service_count().await, 2);
    assert_eq!(harness.metrics.completed(), 2);
}

#[tokio::test]
async fn test_membership_change_reconfigures_in_place() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    let mut topology = v1_topology();
    reconcile(&harness, &topology).await.unwrap();
    let adds = harness.registry.add_count();

    topology.capability_don.members.push(peer(15));
    reconcile(&harness, &topology).await.unwrap();

    let subscriber = harness
        .launcher
        .trigger_subscriber(&ShimKey::new(TRIGGER, CAPABILITY_DON_ID))
        .await
        .unwrap();
    assert_eq!(subscriber.remote_don().unwrap().members.len(), 5);
    let client = harness
        .launcher
        .executable_client(&ShimKey::new(TARGET, CAPABILITY_DON_ID))
        .await
        .unwrap();
    assert_eq!(client.info().unwrap().don.unwrap().members.len(), 5);
    assert_eq!(harness.registry.add_count(), adds);
    assert_eq!(harness.launcher.sub_service_count().await, 2);
}

struct Sink;

#[async_trait]
impl Receiver for Sink {
    async fn receive(&self, _message: MessageBody) {}
}

#[tokio::test]
async fn test_receiver_conflict_rolls_back_registry() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    harness
        .dispatcher
        .inner()
        .set_receiver(TARGET, CAPABILITY_DON_ID, Arc::new(Sink))
        .unwrap();

    let report = reconcile(&harness, &v1_topology()).await.unwrap();

    assert!(matches!(
        report.outcome(TARGET, Direction::Consume),
        Some(Outcome::Failed(WiringError::Dispatcher(_)))
    ));
    assert_eq!(harness.registry.remove_count(), 1);
    assert!(harness.registry.inner.get(TARGET).await.is_err());
    assert!(harness.registry.inner.get(TRIGGER).await.is_ok());
    assert_eq!(harness.launcher.sub_service_count().await, 1);
}

#[tokio::test]
async fn test_failed_capability_does_not_stop_the_pass() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    let topology = TestTopology::new()
        .with_v1("streams-trigger@3.0.0", CapabilityType::Trigger)
        .with_v1("streams-trigger@1.0.0", CapabilityType::Trigger);

    let report = reconcile(&harness, &topology).await.unwrap();

    assert!(matches!(
        report.outcome("streams-trigger@3.0.0", Direction::Consume),
        Some(Outcome::Failed(WiringError::UnsupportedStreamTrigger(_)))
    ));
    assert!(matches!(
        report.outcome("streams-trigger@1.0.0", Direction::Consume),
        Some(Outcome::Wired)
    ));
    assert_eq!(
        harness.metrics.remote_results("streams-trigger@3.0.0"),
        vec![WiringResult::Failure]
    );
    assert_eq!(harness.registry.inner.ids(), vec!["streams-trigger@1.0.0".to_string()]);
}

#[tokio::test]
async fn test_local_only_capability_is_skipped() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    let topology = TestTopology::new().with_capability(
        TARGET,
        CapabilityType::Target,
        CapabilityConfig {
            local_only: true,
            remote: RemoteConfig::Unspecified,
        },
    );

    let report = reconcile(&harness, &topology).await.unwrap();

    assert!(matches!(report.outcome(TARGET, Direction::Consume), Some(Outcome::Skipped)));
    assert_eq!(harness.metrics.remote_results(TARGET), vec![WiringResult::Skipped]);
    assert_eq!(harness.registry.add_count(), 0);
}

#[tokio::test]
async fn test_undeclared_capability_fails() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    let topology = v1_topology();
    let mut snapshot = topology.snapshot();
    snapshot.ids_to_capabilities.remove(TARGET);

    let report = harness
        .launcher
        .on_new_registry(Arc::new(snapshot), &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        report.outcome(TARGET, Direction::Consume),
        Some(Outcome::Failed(WiringError::UnknownCapability(_)))
    ));
    assert_eq!(report.count(WiringResult::Success), 1);
}

#[tokio::test]
async fn test_private_capability_don_is_ignored() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    let mut topology = v1_topology();
    topology.capability_don.is_public = false;

    let report = reconcile(&harness, &topology).await.unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(harness.launcher.sub_service_count().await, 0);
    assert_eq!(harness.registry.get_count(), 0);
    assert_eq!(harness.registry.add_count(), 0);
}

#[tokio::test]
async fn test_v2_capability_builds_one_combined_client() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    let topology = TestTopology::new().with_v2(COMBINED, v2_methods());

    let report = reconcile(&harness, &topology).await.unwrap();

    assert!(matches!(report.outcome(COMBINED, Direction::Consume), Some(Outcome::Wired)));
    let combined = harness
        .launcher
        .combined_client(&ShimKey::new(COMBINED, CAPABILITY_DON_ID))
        .await
        .unwrap();
    assert_eq!(combined.methods(), vec!["LogTrigger".to_string(), "Read".to_string()]);
    assert!(combined.trigger_subscriber("LogTrigger").is_some());
    assert!(combined.executable_client("Read").is_some());
    assert!(harness
        .launcher
        .executable_client(&ShimKey::for_method(COMBINED, CAPABILITY_DON_ID, "Read"))
        .await
        .is_some());
    assert!(harness
        .dispatcher
        .inner()
        .has_receiver(COMBINED, CAPABILITY_DON_ID, "LogTrigger"));
    assert_eq!(harness.registry.inner.ids(), vec![COMBINED.to_string()]);
    assert_eq!(harness.launcher.sub_service_count().await, 2);

    reconcile(&harness, &topology).await.unwrap();
    assert_eq!(harness.registry.add_count(), 1);
    assert_eq!(harness.launcher.sub_service_count().await, 2);
}

#[tokio::test]
async fn test_v2_empty_method_is_reported() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    let mut methods = v2_methods();
    methods.insert("Broken".to_string(), MethodConfig::default());
    let topology = TestTopology::new().with_v2(COMBINED, methods);

    let report = reconcile(&harness, &topology).await.unwrap();

    match report.outcome(COMBINED, Direction::Consume) {
        Some(Outcome::Failed(WiringError::MethodsFailed { methods, .. })) => {
            assert_eq!(methods, &vec!["Broken".to_string()])
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    let combined = harness
        .launcher
        .combined_client(&ShimKey::new(COMBINED, CAPABILITY_DON_ID))
        .await
        .unwrap();
    assert_eq!(combined.methods().len(), 2);
}

// =============================================================================
// EXPOSING LOCAL CAPABILITIES
// =============================================================================

async fn install_local(harness: &TestHarness, capability: RegisteredCapability) {
    harness.registry.inner.add(capability).await.unwrap();
}

#[tokio::test]
async fn test_capability_node_exposes_local_capabilities() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 11).await;
    install_local(&harness, RegisteredCapability::Trigger(MockTrigger::new(TRIGGER))).await;
    install_local(
        &harness,
        RegisteredCapability::Executable(MockExecutable::new(TARGET, CapabilityType::Target)),
    )
    .await;

    let report = reconcile(&harness, &v1_topology()).await.unwrap();

    assert_eq!(report.count(WiringResult::Success), 2);
    assert!(harness.notifier.notified().is_empty());
    let publisher = harness
        .launcher
        .trigger_publisher(&ShimKey::new(TRIGGER, CAPABILITY_DON_ID))
        .await
        .unwrap();
    assert_eq!(publisher.workflow_don_ids(), vec![WORKFLOW_DON_ID]);
    let server = harness
        .launcher
        .executable_server(&ShimKey::new(TARGET, CAPABILITY_DON_ID))
        .await
        .unwrap();
    assert_eq!(server.info().unwrap().id, TARGET);
    assert!(harness.dispatcher.inner().has_receiver(TARGET, CAPABILITY_DON_ID, ""));
    assert_eq!(harness.metrics.local_results(TARGET), vec![WiringResult::Success]);

    // capability-only node connects to the workflow DON
    let connected = harness.peer.last_update().unwrap();
    assert_eq!(connected.len(), 4);
    assert!(connected.contains_key(&peer(1)));
}

#[tokio::test]
async fn test_expose_is_idempotent() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 11).await;
    install_local(&harness, RegisteredCapability::Trigger(MockTrigger::new(TRIGGER))).await;
    let topology = TestTopology::new().with_v1(TRIGGER, CapabilityType::Trigger);

    reconcile(&harness, &topology).await.unwrap();
    let receivers = harness.dispatcher.set_receiver_count();
    reconcile(&harness, &topology).await.unwrap();

    assert_eq!(harness.dispatcher.set_receiver_count(), receivers);
    assert_eq!(harness.launcher.sub_service_count().await, 1);
}

#[tokio::test]
async fn test_private_workflow_don_is_served() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 11).await;
    install_local(&harness, RegisteredCapability::Trigger(MockTrigger::new(TRIGGER))).await;
    install_local(
        &harness,
        RegisteredCapability::Executable(MockExecutable::new(TARGET, CapabilityType::Target)),
    )
    .await;
    let mut topology = v1_topology();
    topology.workflow_don.is_public = false;

    let report = reconcile(&harness, &topology).await.unwrap();

    assert_eq!(report.count(WiringResult::Success), 2);
    assert!(matches!(report.outcome(TARGET, Direction::Expose), Some(Outcome::Wired)));
    let publisher = harness
        .launcher
        .trigger_publisher(&ShimKey::new(TRIGGER, CAPABILITY_DON_ID))
        .await
        .unwrap();
    assert_eq!(publisher.workflow_don_ids(), vec![WORKFLOW_DON_ID]);
    assert!(harness.dispatcher.inner().has_receiver(TARGET, CAPABILITY_DON_ID, ""));
}

#[tokio::test]
async fn test_expose_wrong_contract_fails() {
    const STREAMS: &str = "streams-trigger@1.0.0";
    const WRITE: &str = "write-chain_evm_1@1.0.0";
    let network = InMemoryNetwork::new();
    let harness = started(&network, 11).await;
    install_local(&harness, RegisteredCapability::Trigger(MockTrigger::new(STREAMS))).await;
    // registered as a trigger but declared as a target
    install_local(&harness, RegisteredCapability::Trigger(MockTrigger::new(WRITE))).await;
    let topology = TestTopology::new()
        .with_v1(STREAMS, CapabilityType::Trigger)
        .with_v1(WRITE, CapabilityType::Target);

    let report = reconcile(&harness, &topology).await.unwrap();

    assert!(matches!(
        report.outcome(WRITE, Direction::Expose),
        Some(Outcome::Failed(WiringError::ContractMismatch { expected: "ExecutableCapability", .. }))
    ));
    assert!(matches!(report.outcome(STREAMS, Direction::Expose), Some(Outcome::Wired)));
    assert_eq!(harness.metrics.local_results(WRITE), vec![WiringResult::Failure]);
    assert_eq!(harness.metrics.local_results(STREAMS), vec![WiringResult::Success]);
    assert_eq!(harness.launcher.sub_service_count().await, 1);
    assert!(harness.dispatcher.inner().has_receiver(STREAMS, CAPABILITY_DON_ID, ""));
    assert!(!harness.dispatcher.inner().has_receiver(WRITE, CAPABILITY_DON_ID, ""));
}

#[tokio::test]
async fn test_expose_missing_underlying_fails() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 11).await;
    let topology = TestTopology::new().with_v1(TARGET, CapabilityType::Target);

    let report = reconcile(&harness, &topology).await.unwrap();

    assert!(matches!(
        report.outcome(TARGET, Direction::Expose),
        Some(Outcome::Failed(WiringError::Registry(RegistryError::NotFound(_))))
    ));
}

#[tokio::test]
async fn test_expose_v2_creates_shim_per_method() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 11).await;
    install_local(&harness, RegisteredCapability::Combined(MockCombined::new(COMBINED))).await;
    let topology = TestTopology::new().with_v2(COMBINED, v2_methods());

    let report = reconcile(&harness, &topology).await.unwrap();

    assert!(matches!(report.outcome(COMBINED, Direction::Expose), Some(Outcome::Wired)));
    assert!(harness
        .launcher
        .trigger_publisher(&ShimKey::for_method(COMBINED, CAPABILITY_DON_ID, "LogTrigger"))
        .await
        .is_some());
    assert!(harness
        .launcher
        .executable_server(&ShimKey::for_method(COMBINED, CAPABILITY_DON_ID, "Read"))
        .await
        .is_some());
    assert!(harness
        .dispatcher
        .inner()
        .has_receiver(COMBINED, CAPABILITY_DON_ID, "Read"));
    assert_eq!(harness.launcher.sub_service_count().await, 2);
}

#[tokio::test]
async fn test_expose_method_already_routed_keeps_existing_receiver() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 11).await;
    install_local(&harness, RegisteredCapability::Combined(MockCombined::new(COMBINED))).await;
    harness
        .dispatcher
        .inner()
        .set_receiver_for_method(COMBINED, CAPABILITY_DON_ID, "Read", Arc::new(Sink))
        .unwrap();
    let topology = TestTopology::new().with_v2(COMBINED, v2_methods());

    let report = reconcile(&harness, &topology).await.unwrap();

    assert!(matches!(report.outcome(COMBINED, Direction::Expose), Some(Outcome::Wired)));
    // the started server is closed again and left out of the cache
    assert!(harness
        .launcher
        .executable_server(&ShimKey::for_method(COMBINED, CAPABILITY_DON_ID, "Read"))
        .await
        .is_none());
    assert!(harness
        .launcher
        .trigger_publisher(&ShimKey::for_method(COMBINED, CAPABILITY_DON_ID, "LogTrigger"))
        .await
        .is_some());
    assert_eq!(harness.launcher.sub_service_count().await, 1);
    assert!(harness
        .dispatcher
        .inner()
        .has_receiver(COMBINED, CAPABILITY_DON_ID, "Read"));
}

// =============================================================================
// FATAL ERRORS
// =============================================================================

#[tokio::test]
async fn test_multiple_workflow_dons_abort_the_pass() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    let topology = v1_topology();
    let mut second = DonInfo::new(3, 1, vec![peer(1), peer(5), peer(6), peer(7)]);
    second.accepts_workflows = true;
    let snapshot = topology.snapshot().with_don(Don::new(second));

    let err = harness
        .launcher
        .on_new_registry(Arc::new(snapshot), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LauncherError::MultipleWorkflowDons(ref ids) if ids == &vec![1, 3]));
    assert_eq!(harness.launcher.sub_service_count().await, 0);
    assert_eq!(harness.metrics.completed(), 0);
}

#[tokio::test]
async fn test_cancelled_pass_returns_cancelled() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = harness
        .launcher
        .on_new_registry(Arc::new(v1_topology().snapshot()), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, LauncherError::Cancelled));
    assert_eq!(harness.registry.add_count(), 0);
}

#[tokio::test]
async fn test_missing_peer_is_fatal() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    harness.peer_wrapper.set_peer(None);

    let err = reconcile(&harness, &v1_topology()).await.unwrap_err();

    assert!(matches!(err, LauncherError::Transport(TransportError::PeerUnavailable)));
}

#[tokio::test]
async fn test_peer_update_failure_is_fatal() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    harness.peer.fail_updates(true);

    let err = reconcile(&harness, &v1_topology()).await.unwrap_err();

    assert!(matches!(err, LauncherError::Transport(TransportError::UpdateFailed(_))));
    assert_eq!(harness.metrics.completed(), 0);
}

// =============================================================================
// UPDATE WORKER
// =============================================================================

#[derive(Default)]
struct CountingListener {
    seen: Mutex<Vec<usize>>,
}

#[async_trait]
impl RegistryListener for CountingListener {
    async fn on_new_registry(
        &self,
        snapshot: Arc<RegistrySnapshot>,
        _cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, LauncherError> {
        self.seen.lock().push(snapshot.ids_to_dons.len());
        Ok(ReconciliationReport::default())
    }
}

fn snapshot_with_dons(count: u32) -> Arc<RegistrySnapshot> {
    let mut snapshot = RegistrySnapshot::new();
    for id in 1..=count {
        snapshot = snapshot.with_don(Don::new(DonInfo::new(id, 0, vec![peer(id as u8)])));
    }
    Arc::new(snapshot)
}

#[tokio::test]
async fn test_worker_coalesces_queued_snapshots() {
    let listener = Arc::new(CountingListener::default());
    let (worker, updates) =
        RegistryUpdateWorker::new(listener.clone(), 8, CancellationToken::new());
    for count in 1..=3 {
        assert!(updates.try_send(snapshot_with_dons(count)).unwrap());
    }
    drop(updates);

    let passes = worker.run().await;

    assert_eq!(passes, 1);
    assert_eq!(*listener.seen.lock(), vec![3]);
}

#[tokio::test]
async fn test_worker_stops_on_cancel() {
    let listener = Arc::new(CountingListener::default());
    let cancel = CancellationToken::new();
    let (worker, updates) = RegistryUpdateWorker::new(listener.clone(), 8, cancel.clone());
    let handle = tokio::spawn(worker.run());

    updates.send(snapshot_with_dons(2)).await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || listener.seen.lock().len() == 1).await);
    cancel.cancel();

    assert_eq!(handle.await.unwrap(), 1);
    assert!(matches!(
        updates.send(snapshot_with_dons(1)).await,
        Err(LauncherError::Closed)
    ));
}

#[tokio::test]
async fn test_worker_drives_launcher() {
    let network = InMemoryNetwork::new();
    let harness = started(&network, 1).await;
    let cancel = CancellationToken::new();
    let (worker, updates) =
        RegistryUpdateWorker::new(harness.launcher.clone(), 4, cancel.clone());
    let handle = tokio::spawn(worker.run());

    updates.send(Arc::new(v1_topology().snapshot())).await.unwrap();
    let metrics = harness.metrics.clone();
    assert!(wait_until(Duration::from_secs(1), || metrics.completed() == 1).await);
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(harness.launcher.sub_service_count().await, 2);
}
