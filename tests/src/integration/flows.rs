//! # Multi-Node Flows
//!
//! A workflow DON (peers 1..=4) and a capability DON (peers 11..=14), each
//! node running its own launcher on one in-memory network.
//!
//! ## Flows Tested:
//!
//! 1. **Execute**: workflow nodes call a target through the executable clients
//!    their launchers built; capability nodes answer through the servers theirs
//!    built
//! 2. **Trigger**: events from a capability node's trigger reach every
//!    workflow node through publisher and subscriber
//! 3. **Multi-method**: one combined client per workflow node routes each
//!    method to its own shim
//! 4. **Membership change**: a node joining the capability DON is picked up
//!    without rebuilding the workflow nodes' shims
//! 5. **Private workflow DON**: capability nodes still serve a workflow DON
//!    that is not public

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use capability_launcher::adapters::InMemoryNetwork;
    use capability_launcher::test_utils::{
        peer, wait_until, MockCombined, MockExecutable, MockTrigger, TestHarness, TestTopology,
        CAPABILITY_DON_ID,
    };
    use capability_launcher::{CapabilityRegistry, RegistryListener, ShimKey};
    use capability_types::{
        CapabilityRequest, CapabilityResponse, CapabilityType, ExecutableCapability, MethodConfig,
        RegisteredCapability, RemoteExecutableConfig, RemoteTriggerConfig, Service,
        TriggerCapability, TriggerRegistrationRequest,
    };
    use tokio_util::sync::CancellationToken;

    const TRIGGER: &str = "price-feed@1.0.0";
    const TARGET: &str = "write-chain@1.0.0";
    const COMBINED: &str = "evm@1.0.0";

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Dons {
        topology: TestTopology,
        workflow: Vec<TestHarness>,
        capability: Vec<TestHarness>,
    }

    impl Dons {
        async fn start(topology: TestTopology) -> Self {
            let network = InMemoryNetwork::new();
            let mut workflow = Vec::new();
            for p in topology.workflow_peers() {
                let harness = TestHarness::new(&network, p);
                harness.launcher.start().await.unwrap();
                workflow.push(harness);
            }
            let mut capability = Vec::new();
            for p in topology.capability_peers() {
                let harness = TestHarness::new(&network, p);
                harness.launcher.start().await.unwrap();
                capability.push(harness);
            }
            Self {
                topology,
                workflow,
                capability,
            }
        }

        async fn install(&self, make: impl Fn() -> RegisteredCapability) {
            for harness in &self.capability {
                harness.registry.inner.add(make()).await.unwrap();
            }
        }

        async fn reconcile_all(&self) {
            let snapshot = Arc::new(self.topology.snapshot());
            for harness in self.capability.iter().chain(&self.workflow) {
                harness
                    .launcher
                    .on_new_registry(snapshot.clone(), &CancellationToken::new())
                    .await
                    .unwrap();
            }
        }

        async fn close(self) {
            for harness in self.workflow.iter().chain(&self.capability) {
                harness.launcher.close().await.unwrap();
            }
        }
    }

    async fn remote(harness: &TestHarness, id: &str) -> RegisteredCapability {
        harness.registry.inner.get(id).await.unwrap()
    }

    fn request(execution: &str, method: &str, payload: &[u8]) -> CapabilityRequest {
        CapabilityRequest {
            workflow_id: "wf-1".into(),
            workflow_execution_id: execution.into(),
            method: method.into(),
            payload: payload.to_vec(),
            transmission_schedule: None,
        }
    }

    /// Every workflow node executes the same request at once.
    async fn execute_everywhere(
        dons: &Dons,
        id: &str,
        request: CapabilityRequest,
    ) -> Vec<CapabilityResponse> {
        let mut handles = Vec::new();
        for harness in &dons.workflow {
            let client = remote(harness, id).await.as_executable().unwrap();
            let request = request.clone();
            handles.push(tokio::spawn(async move { client.execute(request).await }));
        }
        let mut responses = Vec::new();
        for handle in handles {
            responses.push(handle.await.unwrap().unwrap());
        }
        responses
    }

    // =============================================================================
    // FLOWS
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_workflow_don_executes_remote_target() {
        let dons = Dons::start(TestTopology::new().with_v1(TARGET, CapabilityType::Target)).await;
        dons.install(|| {
            RegisteredCapability::Executable(MockExecutable::new(TARGET, CapabilityType::Target))
        })
        .await;
        dons.reconcile_all().await;

        let responses = execute_everywhere(&dons, TARGET, request("exec-1", "", b"tx")).await;

        assert_eq!(responses.len(), 4);
        assert!(responses.iter().all(|r| r.payload == b"ok:tx".to_vec()));
        dons.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_private_workflow_don_executes_remote_target() {
        let mut topology = TestTopology::new().with_v1(TARGET, CapabilityType::Target);
        topology.workflow_don.is_public = false;
        let dons = Dons::start(topology).await;
        dons.install(|| {
            RegisteredCapability::Executable(MockExecutable::new(TARGET, CapabilityType::Target))
        })
        .await;
        dons.reconcile_all().await;

        let responses = execute_everywhere(&dons, TARGET, request("exec-5", "", b"tx")).await;

        assert_eq!(responses.len(), 4);
        assert!(responses.iter().all(|r| r.payload == b"ok:tx".to_vec()));
        dons.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_trigger_events_reach_workflow_don() {
        let dons = Dons::start(TestTopology::new().with_v1(TRIGGER, CapabilityType::Trigger)).await;
        let triggers: Vec<Arc<MockTrigger>> =
            dons.capability.iter().map(|_| MockTrigger::new(TRIGGER)).collect();
        for (harness, trigger) in dons.capability.iter().zip(&triggers) {
            harness
                .registry
                .inner
                .add(RegisteredCapability::Trigger(trigger.clone()))
                .await
                .unwrap();
        }
        dons.reconcile_all().await;

        let mut callbacks = Vec::new();
        for harness in &dons.workflow {
            let trigger = remote(harness, TRIGGER).await.as_trigger().unwrap();
            let callback = trigger
                .register_trigger(TriggerRegistrationRequest {
                    workflow_id: "wf-1".into(),
                    method: String::new(),
                    payload: Vec::new(),
                })
                .await
                .unwrap();
            callbacks.push(callback);
            harness
                .launcher
                .trigger_subscriber(&ShimKey::new(TRIGGER, CAPABILITY_DON_ID))
                .await
                .unwrap()
                .refresh_registrations();
        }

        let registered = wait_until(Duration::from_secs(3), || {
            triggers.iter().all(|t| t.registered() == vec!["wf-1".to_string()])
        })
        .await;
        assert!(registered);

        for trigger in &triggers {
            trigger.emit("round-7", b"price=42");
        }
        for callback in &mut callbacks {
            let response = tokio::time::timeout(Duration::from_secs(3), callback.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(response.event.id, "round-7");
            assert_eq!(response.event.payload, b"price=42".to_vec());
        }
        dons.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_multi_method_capability_routes_by_method() {
        let methods = BTreeMap::from([
            (
                "Read".to_string(),
                MethodConfig::executable(RemoteExecutableConfig {
                    request_timeout: Duration::from_secs(10),
                    server_max_parallel_requests: 4,
                    ..Default::default()
                }),
            ),
            (
                "LogTrigger".to_string(),
                MethodConfig::trigger(RemoteTriggerConfig::default()),
            ),
        ]);
        let dons = Dons::start(TestTopology::new().with_v2(COMBINED, methods)).await;
        dons.install(|| RegisteredCapability::Combined(MockCombined::new(COMBINED)))
            .await;
        dons.reconcile_all().await;

        for harness in &dons.capability {
            let dispatcher = harness.dispatcher.inner();
            assert!(dispatcher.has_receiver(COMBINED, CAPABILITY_DON_ID, "Read"));
            assert!(dispatcher.has_receiver(COMBINED, CAPABILITY_DON_ID, "LogTrigger"));
        }

        let responses =
            execute_everywhere(&dons, COMBINED, request("exec-2", "Read", b"balance")).await;
        assert!(responses.iter().all(|r| r.payload == b"ok:balance".to_vec()));

        // undeclared methods fail locally without touching the network
        let client = remote(&dons.workflow[0], COMBINED).await.as_executable().unwrap();
        assert!(client.execute(request("exec-3", "Write", b"")).await.is_err());
        dons.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capability_don_membership_change() {
        let mut dons =
            Dons::start(TestTopology::new().with_v1(TARGET, CapabilityType::Target)).await;
        dons.install(|| {
            RegisteredCapability::Executable(MockExecutable::new(TARGET, CapabilityType::Target))
        })
        .await;
        dons.reconcile_all().await;
        let adds_before: Vec<usize> = dons.workflow.iter().map(|h| h.registry.add_count()).collect();

        dons.topology.capability_don.members.push(peer(15));
        dons.reconcile_all().await;

        for (harness, before) in dons.workflow.iter().zip(adds_before) {
            assert_eq!(harness.registry.add_count(), before, "client reconfigured in place");
            let connected = harness.peer.last_update().unwrap();
            assert!(connected.contains_key(&peer(15)));
        }

        // the fifth member is silent; the other four still form a quorum
        let responses = execute_everywhere(&dons, TARGET, request("exec-4", "", b"tx")).await;
        assert!(responses.iter().all(|r| r.payload == b"ok:tx".to_vec()));
        dons.close().await;
    }
}
