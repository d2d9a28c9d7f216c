//! # Generated Topologies
//!
//! Brutal Conditions:
//! - Hundreds of DONs with dozens of members each
//! - Every capability DON exposing many capabilities
//! - Nodes that belong to a workflow DON and a capability DON at once

use capability_types::{
    CapabilityConfig, CapabilityType, Don, DonId, DonInfo, PeerId, RegistryCapability,
    RegistrySnapshot,
};

/// Peer ID derived from an index; distinct for every `u32`.
pub fn peer_id(index: u32) -> PeerId {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&index.to_be_bytes());
    bytes[31] = 1;
    PeerId::new(bytes)
}

/// Shape of a generated registry.
#[derive(Debug, Clone, Copy)]
pub struct GeneratedNetwork {
    pub workflow_dons: u32,
    pub capability_dons: u32,
    pub members_per_don: u32,
    pub capabilities_per_don: u32,
}

impl GeneratedNetwork {
    pub fn new(workflow_dons: u32, capability_dons: u32, members_per_don: u32) -> Self {
        Self {
            workflow_dons,
            capability_dons,
            members_per_don,
            capabilities_per_don: 4,
        }
    }

    fn members(&self, don_index: u32) -> Vec<PeerId> {
        let first = don_index * self.members_per_don;
        (first..first + self.members_per_don).map(peer_id).collect()
    }

    fn fault_tolerance(&self) -> u8 {
        u8::try_from(self.members_per_don.saturating_sub(1) / 3).unwrap_or(u8::MAX)
    }

    /// Workflow DONs get IDs `1..=W`, capability DONs follow. Members are
    /// disjoint across DONs.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut snapshot = RegistrySnapshot::new();
        for w in 0..self.workflow_dons {
            let mut info = DonInfo::new(w + 1, self.fault_tolerance(), self.members(w));
            info.accepts_workflows = true;
            snapshot = snapshot.with_don(Don::new(info));
        }
        for c in 0..self.capability_dons {
            let index = self.workflow_dons + c;
            let id: DonId = index + 1;
            let mut don = Don::new(DonInfo::new(id, self.fault_tolerance(), self.members(index)));
            for k in 0..self.capabilities_per_don {
                let capability_id = format!("cap-{}-{}@1.0.0", id, k);
                don = don.with_capability(capability_id.as_str(), CapabilityConfig::default().encode());
                snapshot = snapshot.with_capability(RegistryCapability::new(
                    capability_id.as_str(),
                    CapabilityType::Target,
                ));
            }
            snapshot = snapshot.with_don(don);
        }
        snapshot
    }

    /// First member of the first workflow DON.
    pub fn workflow_node(&self) -> PeerId {
        peer_id(0)
    }

    /// First member of the first capability DON.
    pub fn capability_node(&self) -> PeerId {
        peer_id(self.workflow_dons * self.members_per_don)
    }

    /// A peer outside every DON.
    pub fn outsider(&self) -> PeerId {
        peer_id(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_snapshot_shape() {
        let network = GeneratedNetwork::new(2, 3, 4);
        let snapshot = network.snapshot();
        assert_eq!(snapshot.ids_to_dons.len(), 5);
        assert_eq!(snapshot.ids_to_capabilities.len(), 12);
        assert!(snapshot.don(1).unwrap().info.contains(&network.workflow_node()));
        assert!(snapshot.don(3).unwrap().info.contains(&network.capability_node()));
        assert_eq!(snapshot.don(3).unwrap().info.f, 1);
    }

    #[test]
    fn test_peer_ids_distinct() {
        assert_ne!(peer_id(1), peer_id(256));
        assert!(!peer_id(0).is_zero());
    }
}
