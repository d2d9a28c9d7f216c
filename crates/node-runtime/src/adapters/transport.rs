//! Peer transports for a standalone node.
//!
//! These keep the connection plan the launcher asks for and log how it
//! changes. A node embedded in a real P2P stack passes its own
//! implementations of the same ports instead.

use async_trait::async_trait;
use capability_launcher::domain::TransportError;
use capability_launcher::{Peer, PeerWrapper, SharedPeer};
use capability_types::{DonId, DonPair, PeerId, StreamConfig};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

/// Peer holding the flat connection set.
pub struct PlannedPeer {
    id: PeerId,
    bootstrap: bool,
    connections: RwLock<BTreeMap<PeerId, StreamConfig>>,
}

impl PlannedPeer {
    pub fn new(id: PeerId, bootstrap: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            bootstrap,
            connections: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn connected(&self) -> Vec<PeerId> {
        self.connections.read().keys().copied().collect()
    }
}

#[async_trait]
impl Peer for PlannedPeer {
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
        let mut connections = self.connections.write();
        let added = peers.keys().filter(|p| !connections.contains_key(p)).count();
        let removed = connections.keys().filter(|p| !peers.contains_key(p)).count();
        *connections = peers;
        info!(
            peers = connections.len(),
            added, removed, "peer connections updated"
        );
        Ok(())
    }
}

/// Holds the node's peer once it is up.
#[derive(Default)]
pub struct PeerSlot {
    peer: RwLock<Option<Arc<dyn Peer>>>,
}

impl PeerSlot {
    pub fn new(peer: Option<Arc<dyn Peer>>) -> Arc<Self> {
        Arc::new(Self {
            peer: RwLock::new(peer),
        })
    }

    pub fn set(&self, peer: Option<Arc<dyn Peer>>) {
        *self.peer.write() = peer;
    }
}

impl PeerWrapper for PeerSlot {
    fn peer(&self) -> Option<Arc<dyn Peer>> {
        self.peer.read().clone()
    }
}

/// Shared peer holding one channel per DON pair.
pub struct PlannedSharedPeer {
    id: PeerId,
    bootstrap: bool,
    pairs: RwLock<BTreeSet<(DonId, DonId)>>,
}

impl PlannedSharedPeer {
    pub fn new(id: PeerId, bootstrap: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            bootstrap,
            pairs: RwLock::new(BTreeSet::new()),
        })
    }

    pub fn don_pairs(&self) -> Vec<(DonId, DonId)> {
        self.pairs.read().iter().copied().collect()
    }
}

#[async_trait]
impl SharedPeer for PlannedSharedPeer {
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
        let next: BTreeSet<(DonId, DonId)> = pairs.iter().map(DonPair::ids).collect();
        let mut current = self.pairs.write();
        if *current != next {
            info!(
                pairs = ?next,
                max_message_len = stream_config.max_message_len_bytes,
                "DON channels updated"
            );
        }
        *current = next;
        Ok(())
    }
}
