//! # Executable Server
//!
//! Serves a local action/target capability to remote workflow DONs.
//!
//! Every member of a workflow DON sends the same request. Requests are
//! grouped by message ID plus the hash of their payload; once `F + 1`
//! members of the caller DON sent an identical request it is executed once
//! against the underlying capability and the response goes to every caller.
//! Callers that arrive later get the stored response straight away.
//! Requests still around after `request_timeout` are dropped, and callers
//! of requests that never completed are told so.

use super::hasher::{MessageHasher, SimpleHasher};
use crate::domain::ShimError;
use crate::ports::{Dispatcher, Receiver};
use async_trait::async_trait;
use capability_types::{
    CapabilityInfo, CapabilityRequest, DonId, DonInfo, ExecutableCapability, MessageBody,
    MessageKind, PeerId, RemoteExecutableConfig, Service, ServiceError, ServiceState,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest message ID accepted from a caller.
pub const MAX_MESSAGE_ID_LEN: usize = 128;

pub const REQUEST_EXPIRED_ERROR: &str = "request expired by executable server";

struct ServerConfig {
    remote: RemoteExecutableConfig,
    hasher: Arc<dyn MessageHasher>,
    underlying: Arc<dyn ExecutableCapability>,
    info: CapabilityInfo,
    local_don: DonInfo,
    workflow_dons: HashMap<DonId, DonInfo>,
}

#[derive(Debug, Clone)]
enum RequestState {
    Collecting,
    Executing,
    Done(Result<Vec<u8>, String>),
}

struct ServerRequest {
    message_id: String,
    caller_don: DonInfo,
    callers: BTreeSet<PeerId>,
    /// First message from the quorum; the one that gets executed.
    payload: Vec<u8>,
    deadline: Instant,
    state: RequestState,
}

#[derive(Default)]
struct Requests {
    by_id: HashMap<String, ServerRequest>,
    /// Request IDs seen per message ID, with how often each was sent.
    by_message_id: HashMap<String, HashMap<String, usize>>,
}

struct ServerInner {
    capability_id: String,
    method: String,
    dispatcher: Arc<dyn Dispatcher>,
    config: RwLock<Option<Arc<ServerConfig>>>,
    requests: Mutex<Requests>,
    executor: RwLock<Option<Arc<Semaphore>>>,
    stop: CancellationToken,
}

/// Message IDs come from remote peers; keep them short and printable.
pub fn is_valid_message_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_MESSAGE_ID_LEN
        && id.chars().all(|c| c.is_ascii_graphic())
}

impl ServerInner {
    fn config(&self) -> Option<Arc<ServerConfig>> {
        self.config.read().clone()
    }

    fn reply(
        &self,
        cfg: &ServerConfig,
        request: &ServerRequest,
        to: &[PeerId],
        result: &Result<Vec<u8>, String>,
    ) {
        let base = MessageBody::new(
            MessageKind::Execute,
            &self.capability_id,
            cfg.local_don.id,
            request.caller_don.id,
        )
        .with_message_id(&request.message_id)
        .with_capability_method(&self.method);
        let message = match result {
            Ok(payload) => base.with_payload(payload.clone()),
            Err(err) => base.with_error(err),
        };
        for peer in to {
            if let Err(e) = self.dispatcher.send(*peer, message.clone()) {
                error!(message_id = %request.message_id, peer = ?peer, error = %e, "failed to send response");
            }
        }
    }

    async fn execute(self: Arc<Self>, cfg: Arc<ServerConfig>, request_id: String, payload: Vec<u8>) {
        let Some(executor) = self.executor.read().clone() else {
            error!(capability_id = %self.capability_id, "server not started, dropping request");
            return;
        };
        let result = tokio::select! {
            _ = self.stop.cancelled() => return,
            permit = executor.acquire_owned() => {
                let Ok(_permit) = permit else { return };
                match serde_json::from_slice::<CapabilityRequest>(&payload) {
                    Ok(request) => match cfg.underlying.execute(request).await {
                        Ok(response) => serde_json::to_vec(&response).map_err(|e| e.to_string()),
                        Err(e) => Err(e.to_string()),
                    },
                    Err(e) => Err(format!("failed to decode request: {}", e)),
                }
            }
        };

        let mut requests = self.requests.lock();
        let Some(request) = requests.by_id.get_mut(&request_id) else {
            debug!(request_id = %request_id, "request expired while executing");
            return;
        };
        if let Err(e) = &result {
            warn!(message_id = %request.message_id, error = %e, "execution failed");
        }
        request.state = RequestState::Done(result.clone());
        let callers: Vec<PeerId> = request.callers.iter().copied().collect();
        self.reply(&cfg, request, &callers, &result);
    }

    fn expire_requests(&self) {
        let Some(cfg) = self.config() else { return };
        let now = Instant::now();
        let mut requests = self.requests.lock();
        let expired: Vec<String> = requests
            .by_id
            .iter()
            .filter(|(_, r)| r.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in expired {
            let Some(request) = requests.by_id.remove(&request_id) else {
                continue;
            };
            requests.by_message_id.remove(&request.message_id);
            if !matches!(request.state, RequestState::Done(_)) {
                let callers: Vec<PeerId> = request.callers.iter().copied().collect();
                self.reply(&cfg, &request, &callers, &Err(REQUEST_EXPIRED_ERROR.to_string()));
            }
            debug!(message_id = %request.message_id, "request expired");
        }
    }
}

pub struct ExecutableServer {
    inner: Arc<ServerInner>,
    state: ServiceState,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutableServer {
    pub fn new(
        capability_id: impl Into<String>,
        method: impl Into<String>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                capability_id: capability_id.into(),
                method: method.into(),
                dispatcher,
                config: RwLock::new(None),
                requests: Mutex::new(Requests::default()),
                executor: RwLock::new(None),
                stop: CancellationToken::new(),
            }),
            state: ServiceState::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Replace the configuration. Without a hasher, requests are hashed
    /// by [`SimpleHasher`] with the config's excluded attributes.
    ///
    /// A changed `server_max_parallel_requests` only applies after restart.
    pub fn set_config(
        &self,
        remote: RemoteExecutableConfig,
        underlying: Arc<dyn ExecutableCapability>,
        info: CapabilityInfo,
        local_don: DonInfo,
        workflow_dons: HashMap<DonId, DonInfo>,
        hasher: Option<Arc<dyn MessageHasher>>,
    ) -> Result<(), ShimError> {
        if info.id.is_empty() || info.id != self.inner.capability_id {
            return Err(ShimError::CapabilityMismatch {
                expected: self.inner.capability_id.clone(),
                got: info.id,
            });
        }
        if local_don.members.is_empty() {
            return Err(ShimError::InvalidDon("empty local DON provided".into()));
        }
        if workflow_dons.is_empty() {
            return Err(ShimError::NoWorkflowDons);
        }
        if remote.request_timeout.is_zero() {
            return Err(ShimError::InvalidTimeout);
        }
        if remote.server_max_parallel_requests == 0 {
            return Err(ShimError::InvalidParallelism);
        }
        if let Some(current) = self.inner.config() {
            if current.remote.server_max_parallel_requests != remote.server_max_parallel_requests {
                warn!(
                    capability_id = %self.inner.capability_id,
                    "server_max_parallel_requests changed; applied after restart"
                );
            }
        }
        let hasher = hasher.unwrap_or_else(|| {
            Arc::new(SimpleHasher::new(remote.request_hash_excluded_attributes.clone()))
        });
        *self.inner.config.write() = Some(Arc::new(ServerConfig {
            remote,
            hasher,
            underlying,
            info,
            local_don,
            workflow_dons,
        }));
        Ok(())
    }

    pub fn capability_id(&self) -> &str {
        &self.inner.capability_id
    }

    pub fn info(&self) -> Option<CapabilityInfo> {
        self.inner.config().map(|c| c.info.clone())
    }

    /// Requests currently tracked, completed ones included.
    pub fn tracked_requests(&self) -> usize {
        self.inner.requests.lock().by_id.len()
    }
}

async fn expiry_loop(inner: Arc<ServerInner>) {
    let Some(cfg) = inner.config() else { return };
    let mut period = cfg.remote.request_timeout;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = inner.stop.cancelled() => return,
            _ = ticker.tick() => {
                if let Some(cfg) = inner.config() {
                    if cfg.remote.request_timeout != period {
                        period = cfg.remote.request_timeout;
                        ticker = interval_at(Instant::now() + period, period);
                    }
                }
                inner.expire_requests();
            }
        }
    }
}

#[async_trait]
impl Receiver for ExecutableServer {
    async fn receive(&self, message: MessageBody) {
        let Some(cfg) = self.inner.config() else {
            error!(capability_id = %self.inner.capability_id, "config not set, dropping request");
            return;
        };
        if message.method != MessageKind::Execute {
            error!(capability_id = %self.inner.capability_id, method = ?message.method, "unsupported method");
            return;
        }
        if !is_valid_message_id(&message.message_id) {
            error!(capability_id = %self.inner.capability_id, "invalid message id");
            return;
        }
        let hash = match cfg.hasher.hash(&message) {
            Ok(h) => h,
            Err(e) => {
                error!(capability_id = %self.inner.capability_id, error = %e, "failed to hash request");
                return;
            }
        };
        let request_id = format!("{}{}", message.message_id, hex::encode(hash));

        let mut requests = self.inner.requests.lock();
        let variants = requests
            .by_message_id
            .entry(message.message_id.clone())
            .or_default();
        *variants.entry(request_id.clone()).or_default() += 1;
        if variants.len() > 1 {
            warn!(
                message_id = %message.message_id,
                variants = variants.len(),
                "received messages with the same id and different payloads"
            );
        }

        if !requests.by_id.contains_key(&request_id) {
            let Some(caller_don) = cfg.workflow_dons.get(&message.caller_don_id) else {
                error!(caller_don_id = message.caller_don_id, "request from unregistered DON");
                return;
            };
            requests.by_id.insert(
                request_id.clone(),
                ServerRequest {
                    message_id: message.message_id.clone(),
                    caller_don: caller_don.clone(),
                    callers: BTreeSet::new(),
                    payload: message.payload.clone(),
                    deadline: Instant::now() + cfg.remote.request_timeout,
                    state: RequestState::Collecting,
                },
            );
        }
        let Some(request) = requests.by_id.get_mut(&request_id) else {
            return;
        };
        if !request.caller_don.contains(&message.sender) {
            warn!(sender = ?message.sender, message_id = %message.message_id, "sender not a member of the caller DON");
            return;
        }
        if !request.callers.insert(message.sender) {
            debug!(sender = ?message.sender, "duplicate request");
            return;
        }

        let quorum = match &request.state {
            RequestState::Done(result) => {
                let result = result.clone();
                self.inner.reply(&cfg, request, &[message.sender], &result);
                false
            }
            RequestState::Collecting => {
                request.callers.len() >= request.caller_don.threshold() as usize
            }
            RequestState::Executing => false,
        };
        if quorum {
            request.state = RequestState::Executing;
            let payload = request.payload.clone();
            drop(requests);
            tokio::spawn(Arc::clone(&self.inner).execute(Arc::clone(&cfg), request_id, payload));
        }
    }
}

#[async_trait]
impl Service for ExecutableServer {
    fn name(&self) -> String {
        "ExecutableServer".to_string()
    }

    async fn start(&self) -> Result<(), ServiceError> {
        let Some(cfg) = self.inner.config() else {
            return Err(ServiceError::not_configured(
                self.name(),
                "call set_config before start",
            ));
        };
        self.state.start_once(&self.name())?;
        *self.inner.executor.write() = Some(Arc::new(Semaphore::new(
            cfg.remote.server_max_parallel_requests as usize,
        )));
        self.tasks
            .lock()
            .push(tokio::spawn(expiry_loop(Arc::clone(&self.inner))));
        info!(capability_id = %self.inner.capability_id, method = %self.inner.method, "executable server started");
        Ok(())
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.state.stop_once(&self.name())?;
        self.inner.stop.cancel();
        if let Some(executor) = self.inner.executor.write().take() {
            executor.close();
        }
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!(capability_id = %self.inner.capability_id, "executable server closed");
        Ok(())
    }

    fn ready(&self) -> Result<(), ServiceError> {
        self.state.ready(&self.name())
    }
}
