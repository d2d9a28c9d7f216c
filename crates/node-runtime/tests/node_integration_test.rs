//! # Node Integration Tests
//!
//! Eight nodes in one process: a workflow DON (peers 1..=4) and a
//! capability DON (peers 11..=14). Every node runs the full container and
//! receives the same registry snapshot.

use std::sync::Arc;
use std::time::Duration;

use capability_launcher::adapters::InMemoryNetwork;
use capability_launcher::test_utils::{wait_until, MockExecutable, TestTopology};
use capability_launcher::{CapabilityRegistry, LauncherConfig};
use capability_types::{
    CapabilityRequest, CapabilityType, ExecutableCapability, PeerId, RegisteredCapability,
    Service,
};
use node_runtime::{CapabilityNode, NodeConfig};

const TARGET: &str = "write-chain@1.0.0";

struct Cluster {
    topology: TestTopology,
    workflow: Vec<CapabilityNode>,
    capability: Vec<CapabilityNode>,
    executables: Vec<Arc<MockExecutable>>,
}

impl Cluster {
    async fn start() -> Self {
        let network = InMemoryNetwork::new();
        let topology = TestTopology::new().with_v1(TARGET, CapabilityType::Target);
        let node = |id: PeerId| {
            CapabilityNode::new(NodeConfig::new(id), LauncherConfig::default(), &network)
        };

        let workflow: Vec<CapabilityNode> = topology.workflow_peers().into_iter().map(&node).collect();
        let capability: Vec<CapabilityNode> =
            topology.capability_peers().into_iter().map(&node).collect();

        let mut executables = Vec::new();
        for n in &capability {
            let executable = MockExecutable::new(TARGET, CapabilityType::Target);
            n.registry()
                .add(RegisteredCapability::Executable(executable.clone()))
                .await
                .unwrap();
            executables.push(executable);
        }
        for n in workflow.iter().chain(&capability) {
            n.start().await.unwrap();
        }
        Self {
            topology,
            workflow,
            capability,
            executables,
        }
    }

    async fn apply_snapshot(&self) {
        for n in self.workflow.iter().chain(&self.capability) {
            n.apply(self.topology.snapshot()).await.unwrap();
        }
    }

    async fn shutdown(self) {
        for n in self.workflow.iter().chain(&self.capability) {
            n.shutdown().await;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshot_wires_both_dons() {
    let cluster = Cluster::start().await;
    cluster.apply_snapshot().await;

    let cap_don = cluster.topology.capability_don.id;
    let wired = wait_until(Duration::from_secs(5), || {
        cluster
            .workflow
            .iter()
            .all(|n| n.registry().ids().contains(&TARGET.to_string()))
            && cluster
                .capability
                .iter()
                .all(|n| n.dispatcher().has_receiver(TARGET, cap_don, ""))
    })
    .await;
    assert!(wired, "every node wires the target");

    for n in &cluster.workflow {
        assert_eq!(n.notifier().current().map(|d| d.id), Some(1));
        let connected = n.peer().unwrap().connected();
        for member in cluster.topology.capability_peers() {
            assert!(connected.contains(&member));
        }
        assert_eq!(n.shared_peer().unwrap().don_pairs(), vec![(1, 2)]);
    }
    for n in &cluster.capability {
        assert!(n.notifier().current().is_none());
        let connected = n.peer().unwrap().connected();
        for member in cluster.topology.workflow_peers() {
            assert!(connected.contains(&member));
        }
    }

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workflow_nodes_execute_remote_target() {
    let cluster = Cluster::start().await;
    cluster.apply_snapshot().await;

    let cap_don = cluster.topology.capability_don.id;
    let wired = wait_until(Duration::from_secs(5), || {
        cluster
            .workflow
            .iter()
            .all(|n| n.registry().ids().contains(&TARGET.to_string()))
            && cluster
                .capability
                .iter()
                .all(|n| n.dispatcher().has_receiver(TARGET, cap_don, ""))
    })
    .await;
    assert!(wired);

    let mut handles = Vec::new();
    for n in &cluster.workflow {
        let client = n
            .registry()
            .get(TARGET)
            .await
            .unwrap()
            .as_executable()
            .expect("remote target is executable");
        handles.push(tokio::spawn(async move {
            client
                .execute(CapabilityRequest {
                    workflow_id: "wf-1".into(),
                    workflow_execution_id: "exec-1".into(),
                    method: String::new(),
                    payload: b"report".to_vec(),
                    transmission_schedule: None,
                })
                .await
        }));
    }
    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.payload, b"ok:report".to_vec());
    }
    assert!(cluster.executables.iter().all(|e| e.executions() == 1));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_services() {
    let network = InMemoryNetwork::new();
    let node = CapabilityNode::new(
        NodeConfig::new(PeerId::new([1; 32])),
        LauncherConfig::default(),
        &network,
    );
    node.start().await.unwrap();
    assert!(node.health_report().values().all(Result::is_ok));
    assert!(node.start().await.is_err(), "second start is rejected");

    node.shutdown().await;
    assert!(node.health_report().values().all(Result::is_err));
    assert_eq!(node.peer().unwrap().connected(), Vec::<PeerId>::new());
    assert!(node.launcher().ready().is_err());
}
