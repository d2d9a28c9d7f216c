//! # Registry Entities
//!
//! Value objects produced by the registry synchronizer. A [`RegistrySnapshot`]
//! is built once per sync round and only ever read afterwards.

use crate::capability::CapabilityType;
use crate::errors::PeerIdError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, BytesOrString};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// On-chain DON identifier.
pub type DonId = u32;

// =============================================================================
// PEER IDENTITY
// =============================================================================

/// 32-byte peer identity (the node's P2P public key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({}..)", hex::encode(&self.0[..4]))
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| PeerIdError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| PeerIdError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl TryFrom<String> for PeerId {
    type Error = PeerIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.to_string()
    }
}

// =============================================================================
// DON
// =============================================================================

/// DON descriptor handed to shims and transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonInfo {
    pub id: DonId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config_version: u32,
    /// Byzantine fault tolerance parameter.
    pub f: u8,
    /// Only public DONs are wired remotely.
    #[serde(default)]
    pub is_public: bool,
    /// Marks a workflow DON.
    #[serde(default)]
    pub accepts_workflows: bool,
    pub members: Vec<PeerId>,
    /// Network-segment tags used for family filtering.
    #[serde(default)]
    pub families: Vec<String>,
}

impl DonInfo {
    pub fn new(id: DonId, f: u8, members: Vec<PeerId>) -> Self {
        Self {
            id,
            name: format!("don-{}", id),
            config_version: 1,
            f,
            is_public: true,
            accepts_workflows: false,
            members,
            families: Vec::new(),
        }
    }

    /// Whether `peer` is a member of this DON.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.members.contains(peer)
    }

    /// `F + 1`, the minimum number of agreeing responses.
    pub fn threshold(&self) -> u32 {
        u32::from(self.f) + 1
    }
}

/// Raw capability configuration as stored on-chain.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityConfigurationBlob(#[serde_as(as = "BytesOrString")] pub Vec<u8>);

impl CapabilityConfigurationBlob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for CapabilityConfigurationBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// A DON together with the capabilities it exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Don {
    #[serde(flatten)]
    pub info: DonInfo,
    /// Capability ID to configuration blob.
    #[serde(default)]
    pub capability_configurations: BTreeMap<String, CapabilityConfigurationBlob>,
}

impl Don {
    pub fn new(info: DonInfo) -> Self {
        Self {
            info,
            capability_configurations: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_capability(
        mut self,
        capability_id: impl Into<String>,
        config: impl Into<CapabilityConfigurationBlob>,
    ) -> Self {
        self.capability_configurations
            .insert(capability_id.into(), config.into());
        self
    }

    pub fn id(&self) -> DonId {
        self.info.id
    }

    pub fn exposes_capabilities(&self) -> bool {
        !self.capability_configurations.is_empty()
    }
}

// =============================================================================
// NODES & CAPABILITIES
// =============================================================================

/// Registry record for a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub p2p_id: PeerId,
    #[serde(default)]
    pub node_operator_id: u32,
    /// Signer address, left-aligned and zero padded to 32 bytes.
    pub signer: [u8; 32],
    #[serde(default)]
    pub encryption_public_key: [u8; 32],
    #[serde(default)]
    pub hashed_capability_ids: Vec<[u8; 32]>,
}

impl NodeInfo {
    pub fn new(p2p_id: PeerId, signer: [u8; 32]) -> Self {
        Self {
            p2p_id,
            node_operator_id: 0,
            signer,
            encryption_public_key: [0u8; 32],
            hashed_capability_ids: Vec::new(),
        }
    }

    /// The 20-byte signer address (the remaining bytes are padding).
    pub fn signer_address(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        out.copy_from_slice(&self.signer[..20]);
        out
    }
}

/// Capability declaration from the registry's capability table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCapability {
    pub id: String,
    pub capability_type: CapabilityType,
}

impl RegistryCapability {
    pub fn new(id: impl Into<String>, capability_type: CapabilityType) -> Self {
        Self {
            id: id.into(),
            capability_type,
        }
    }
}

/// Point-in-time view of all DONs, capabilities and nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub ids_to_dons: HashMap<DonId, Don>,
    #[serde(default)]
    pub ids_to_capabilities: HashMap<String, RegistryCapability>,
    #[serde(default)]
    pub ids_to_nodes: HashMap<PeerId, NodeInfo>,
}

impl RegistrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_don(mut self, don: Don) -> Self {
        self.ids_to_dons.insert(don.id(), don);
        self
    }

    #[must_use]
    pub fn with_capability(mut self, capability: RegistryCapability) -> Self {
        self.ids_to_capabilities
            .insert(capability.id.clone(), capability);
        self
    }

    #[must_use]
    pub fn with_node(mut self, node: NodeInfo) -> Self {
        self.ids_to_nodes.insert(node.p2p_id, node);
        self
    }

    pub fn don(&self, id: DonId) -> Option<&Don> {
        self.ids_to_dons.get(&id)
    }

    pub fn capability(&self, id: &str) -> Option<&RegistryCapability> {
        self.ids_to_capabilities.get(id)
    }

    pub fn node(&self, peer: &PeerId) -> Option<&NodeInfo> {
        self.ids_to_nodes.get(peer)
    }
}

/// Two DONs that need a shared-peer channel between them.
///
/// Emitted lower ID first, in the planner's traversal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonPair(pub DonInfo, pub DonInfo);

impl DonPair {
    pub fn ids(&self) -> (DonId, DonId) {
        (self.0.id, self.1.id)
    }
}

// =============================================================================
// STREAM CONFIGURATION
// =============================================================================

/// Token bucket rate limiter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketParams {
    /// Refill rate per second.
    pub rate: f64,
    /// Burst capacity.
    pub capacity: u32,
}

/// Per-stream limits applied by the peer transport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub incoming_message_buffer_size: usize,
    pub outgoing_message_buffer_size: usize,
    pub max_message_len_bytes: usize,
    pub message_rate_limiter: TokenBucketParams,
    pub bytes_rate_limiter: TokenBucketParams,
}

impl StreamConfig {
    pub const DEFAULT_BUFFER_SIZE: usize = 500;
    /// 500 KB; at full buffers that is 250 MB per stream.
    pub const DEFAULT_MAX_MESSAGE_LEN_BYTES: usize = 500_000;
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            incoming_message_buffer_size: Self::DEFAULT_BUFFER_SIZE,
            outgoing_message_buffer_size: Self::DEFAULT_BUFFER_SIZE,
            max_message_len_bytes: Self::DEFAULT_MAX_MESSAGE_LEN_BYTES,
            message_rate_limiter: TokenBucketParams {
                rate: 100.0,
                capacity: 500,
            },
            bytes_rate_limiter: TokenBucketParams {
                rate: 5_000_000.0,
                capacity: 10_000_000,
            },
        }
    }
}
