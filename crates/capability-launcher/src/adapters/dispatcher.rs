//! # In-Memory Dispatcher
//!
//! Routes [`MessageBody`] values between dispatchers that joined the same
//! [`InMemoryNetwork`], so several nodes can run in one process.
//!
//! Each receiver gets a bounded queue drained by its own task; messages
//! for a full queue are dropped with a warning. Messages for which no
//! receiver is set are answered with an error, unless they already carry
//! one.

use crate::domain::DispatcherError;
use crate::ports::{Dispatcher, Receiver};
use async_trait::async_trait;
use capability_types::{DonId, MessageBody, PeerId, Service, ServiceError, ServiceState};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_RECEIVER_BUFFER_SIZE: usize = 10_000;

pub const CAPABILITY_NOT_FOUND_ERROR: &str = "capability not found";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ReceiverKey {
    capability_id: String,
    don_id: DonId,
    method: String,
}

struct ReceiverHandle {
    tx: mpsc::Sender<MessageBody>,
    cancel: CancellationToken,
}

/// Shared medium the in-memory dispatchers send through.
#[derive(Default)]
pub struct InMemoryNetwork {
    nodes: RwLock<HashMap<PeerId, Weak<InMemoryDispatcher>>>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create the dispatcher of `peer_id` and attach it to the network.
    pub fn join(self: &Arc<Self>, peer_id: PeerId) -> Arc<InMemoryDispatcher> {
        self.join_with_buffer(peer_id, DEFAULT_RECEIVER_BUFFER_SIZE)
    }

    pub fn join_with_buffer(self: &Arc<Self>, peer_id: PeerId, buffer_size: usize) -> Arc<InMemoryDispatcher> {
        let dispatcher = Arc::new(InMemoryDispatcher {
            peer_id,
            network: Arc::clone(self),
            buffer_size: buffer_size.max(1),
            receivers: RwLock::new(HashMap::new()),
            stop: CancellationToken::new(),
            state: ServiceState::new(),
        });
        self.nodes
            .write()
            .insert(peer_id, Arc::downgrade(&dispatcher));
        dispatcher
    }

    fn deliver(&self, to: &PeerId, message: MessageBody) -> Result<(), DispatcherError> {
        let node = self.nodes.read().get(to).and_then(Weak::upgrade);
        match node {
            Some(node) => {
                node.handle_message(message);
                Ok(())
            }
            None => Err(DispatcherError::Unreachable(*to)),
        }
    }
}

pub struct InMemoryDispatcher {
    peer_id: PeerId,
    network: Arc<InMemoryNetwork>,
    buffer_size: usize,
    receivers: RwLock<HashMap<ReceiverKey, ReceiverHandle>>,
    stop: CancellationToken,
    state: ServiceState,
}

impl InMemoryDispatcher {
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.read().len()
    }

    pub fn has_receiver(&self, capability_id: &str, don_id: DonId, method: &str) -> bool {
        self.receivers.read().contains_key(&ReceiverKey {
            capability_id: capability_id.to_string(),
            don_id,
            method: method.to_string(),
        })
    }

    fn set(&self, key: ReceiverKey, receiver: Arc<dyn Receiver>) -> Result<(), DispatcherError> {
        let mut receivers = self.receivers.write();
        if receivers.contains_key(&key) {
            return Err(DispatcherError::receiver_exists(
                &key.capability_id,
                key.don_id,
                &key.method,
            ));
        }
        let (tx, mut rx) = mpsc::channel::<MessageBody>(self.buffer_size);
        let cancel = self.stop.child_token();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    message = rx.recv() => match message {
                        Some(message) => receiver.receive(message).await,
                        None => return,
                    },
                }
            }
        });
        debug!(capability_id = %key.capability_id, don_id = key.don_id, method = %key.method, "receiver set");
        receivers.insert(key, ReceiverHandle { tx, cancel });
        Ok(())
    }

    fn remove(&self, key: &ReceiverKey) {
        if let Some(handle) = self.receivers.write().remove(key) {
            handle.cancel.cancel();
            debug!(capability_id = %key.capability_id, don_id = key.don_id, method = %key.method, "receiver removed");
        }
    }

    fn handle_message(&self, message: MessageBody) {
        let key = ReceiverKey {
            capability_id: message.capability_id.clone(),
            don_id: message.capability_don_id,
            method: message.capability_method.clone(),
        };
        let tx = self.receivers.read().get(&key).map(|h| h.tx.clone());
        let Some(tx) = tx else {
            debug!(capability_id = %key.capability_id, don_id = key.don_id, method = %key.method, "message for unregistered capability or method");
            self.respond_with_error(message, CAPABILITY_NOT_FOUND_ERROR);
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(message) {
            warn!(capability_id = %key.capability_id, don_id = key.don_id, "receiver channel full, dropping message");
        }
    }

    fn respond_with_error(&self, mut message: MessageBody, error: &str) {
        if message.error.is_some() {
            // never answer an error with an error
            return;
        }
        let to = message.sender;
        message.error = Some(error.to_string());
        message.payload.clear();
        if let Err(e) = self.send(to, message) {
            debug!(error = %e, "failed to send error response");
        }
    }
}

impl Dispatcher for InMemoryDispatcher {
    fn set_receiver(
        &self,
        capability_id: &str,
        don_id: DonId,
        receiver: Arc<dyn Receiver>,
    ) -> Result<(), DispatcherError> {
        self.set_receiver_for_method(capability_id, don_id, "", receiver)
    }

    fn set_receiver_for_method(
        &self,
        capability_id: &str,
        don_id: DonId,
        method: &str,
        receiver: Arc<dyn Receiver>,
    ) -> Result<(), DispatcherError> {
        self.set(
            ReceiverKey {
                capability_id: capability_id.to_string(),
                don_id,
                method: method.to_string(),
            },
            receiver,
        )
    }

    fn remove_receiver(&self, capability_id: &str, don_id: DonId) {
        self.remove_receiver_for_method(capability_id, don_id, "");
    }

    fn remove_receiver_for_method(&self, capability_id: &str, don_id: DonId, method: &str) {
        self.remove(&ReceiverKey {
            capability_id: capability_id.to_string(),
            don_id,
            method: method.to_string(),
        });
    }

    fn send(&self, to: PeerId, mut message: MessageBody) -> Result<(), DispatcherError> {
        if self.stop.is_cancelled() {
            return Err(DispatcherError::Closed);
        }
        message.sender = self.peer_id;
        message.receiver = to;
        self.network.deliver(&to, message)
    }
}

#[async_trait]
impl Service for InMemoryDispatcher {
    fn name(&self) -> String {
        "Dispatcher".to_string()
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.state.start_once(&self.name())?;
        info!(peer = %self.peer_id, "dispatcher started");
        Ok(())
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.state.stop_once(&self.name())?;
        self.stop.cancel();
        self.receivers.write().clear();
        info!(peer = %self.peer_id, "dispatcher closed");
        Ok(())
    }

    fn ready(&self) -> Result<(), ServiceError> {
        self.state.ready(&self.name())
    }
}
