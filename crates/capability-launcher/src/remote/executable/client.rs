//! # Executable Client
//!
//! Proxy for an action/target capability served by a remote DON.
//!
//! `execute` sends the request to every member of the capability DON
//! (all at once, or staggered by `delta_stage`) and resolves once `F + 1`
//! members returned the same response. Identical errors from `F + 1`
//! members fail the call, as do errors from so many members that a quorum
//! of successes is no longer possible.

use crate::domain::ShimError;
use crate::ports::{Dispatcher, Receiver};
use async_trait::async_trait;
use capability_types::{
    BaseCapability, CapabilityError, CapabilityInfo, CapabilityRequest, CapabilityResponse,
    DonInfo, ExecutableCapability, MessageBody, MessageKind, PeerId, Service, ServiceError,
    ServiceState, TransmissionSchedule, WorkflowRegistration,
};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How requests are spread over the members of the capability DON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmissionConfig {
    pub schedule: TransmissionSchedule,
    pub delta_stage: Duration,
}

#[derive(Debug)]
struct ClientConfig {
    info: CapabilityInfo,
    remote_don: DonInfo,
    local_don: DonInfo,
    request_timeout: Duration,
    transmission: Option<TransmissionConfig>,
}

type Outcome = Result<CapabilityResponse, CapabilityError>;

struct PendingRequest {
    required: usize,
    remote_don: DonInfo,
    respondents: HashSet<PeerId>,
    successes: HashMap<Vec<u8>, usize>,
    errors: HashMap<String, usize>,
    total_errors: usize,
    reply: Option<oneshot::Sender<Outcome>>,
}

impl PendingRequest {
    /// Record one response; returns the final outcome once it is decided.
    fn on_response(&mut self, message: &MessageBody) -> Option<Outcome> {
        if !self.remote_don.contains(&message.sender) {
            warn!(sender = ?message.sender, "response from peer outside the capability DON");
            return None;
        }
        if !self.respondents.insert(message.sender) {
            debug!(sender = ?message.sender, "duplicate response");
            return None;
        }
        match &message.error {
            None => {
                let count = self.successes.entry(message.payload.clone()).or_default();
                *count += 1;
                if *count >= self.required {
                    return Some(
                        serde_json::from_slice(&message.payload).map_err(CapabilityError::from),
                    );
                }
            }
            Some(err) => {
                self.total_errors += 1;
                let count = self.errors.entry(err.clone()).or_default();
                *count += 1;
                if *count >= self.required {
                    return Some(Err(CapabilityError::Remote(err.clone())));
                }
                let members = self.remote_don.members.len();
                if self.total_errors > members.saturating_sub(self.required) {
                    return Some(Err(CapabilityError::Remote(format!(
                        "received errors from {} of {} nodes",
                        self.total_errors, members
                    ))));
                }
            }
        }
        None
    }
}

struct ClientInner {
    capability_id: String,
    method: String,
    dispatcher: Arc<dyn Dispatcher>,
    config: RwLock<Option<Arc<ClientConfig>>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    stop: CancellationToken,
}

impl ClientInner {
    fn config(&self) -> Option<Arc<ClientConfig>> {
        self.config.read().clone()
    }
}

pub struct ExecutableClient {
    inner: Arc<ClientInner>,
    state: ServiceState,
}

impl ExecutableClient {
    pub fn new(
        capability_id: impl Into<String>,
        method: impl Into<String>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                capability_id: capability_id.into(),
                method: method.into(),
                dispatcher,
                config: RwLock::new(None),
                pending: Mutex::new(HashMap::new()),
                stop: CancellationToken::new(),
            }),
            state: ServiceState::new(),
        }
    }

    /// Replace the configuration. `info.don` is the capability DON;
    /// `local_don` is the workflow DON requests are sent from.
    pub fn set_config(
        &self,
        info: CapabilityInfo,
        local_don: DonInfo,
        request_timeout: Duration,
        transmission: Option<TransmissionConfig>,
    ) -> Result<(), ShimError> {
        if info.id != self.inner.capability_id {
            return Err(ShimError::CapabilityMismatch {
                expected: self.inner.capability_id.clone(),
                got: info.id,
            });
        }
        let remote_don = match &info.don {
            Some(don) if don.id != 0 && !don.members.is_empty() => don.clone(),
            _ => return Err(ShimError::InvalidDon("capability DON not set".into())),
        };
        if local_don.members.is_empty() {
            return Err(ShimError::InvalidDon("empty local DON provided".into()));
        }
        if request_timeout.is_zero() {
            return Err(ShimError::InvalidTimeout);
        }
        *self.inner.config.write() = Some(Arc::new(ClientConfig {
            info,
            remote_don,
            local_don,
            request_timeout,
            transmission,
        }));
        Ok(())
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.inner.config().map(|c| c.request_timeout)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.pending.lock().len()
    }

    fn message_id(&self, request: &CapabilityRequest) -> String {
        if self.inner.method.is_empty() {
            request.workflow_execution_id.clone()
        } else {
            format!("{}/{}", request.workflow_execution_id, self.inner.method)
        }
    }
}

/// Send order and delay per member. Ordering is keyed on the message ID so
/// every workflow node staggers the same way for a given request.
fn transmission_plan(
    members: &[PeerId],
    message_id: &str,
    schedule: TransmissionSchedule,
    delta_stage: Duration,
) -> Vec<(PeerId, Duration)> {
    match schedule {
        TransmissionSchedule::AllAtOnce => {
            members.iter().map(|p| (*p, Duration::ZERO)).collect()
        }
        TransmissionSchedule::OneAtATime => {
            let mut ordered: Vec<([u8; 32], PeerId)> = members
                .iter()
                .map(|p| {
                    let mut hasher = Sha256::new();
                    hasher.update(p.as_bytes());
                    hasher.update(message_id.as_bytes());
                    (hasher.finalize().into(), *p)
                })
                .collect();
            ordered.sort();
            ordered
                .into_iter()
                .enumerate()
                .map(|(i, (_, p))| (p, delta_stage * i as u32))
                .collect()
        }
    }
}

impl BaseCapability for ExecutableClient {
    fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        self.inner
            .config()
            .map(|c| c.info.clone())
            .ok_or_else(|| CapabilityError::NotConfigured(self.inner.capability_id.clone()))
    }
}

#[async_trait]
impl ExecutableCapability for ExecutableClient {
    async fn execute(&self, request: CapabilityRequest) -> Result<CapabilityResponse, CapabilityError> {
        let cfg = self
            .inner
            .config()
            .ok_or_else(|| CapabilityError::NotConfigured(self.inner.capability_id.clone()))?;
        if request.workflow_execution_id.is_empty() {
            return Err(CapabilityError::InvalidRequest(
                "workflow execution id must not be empty".into(),
            ));
        }
        let (schedule, delta_stage) = match (cfg.transmission, &request.transmission_schedule) {
            (Some(t), _) => (t.schedule, t.delta_stage),
            (None, Some(s)) => match TransmissionSchedule::parse(s) {
                Some(schedule) => (schedule, Duration::ZERO),
                None => {
                    return Err(CapabilityError::InvalidRequest(format!(
                        "unknown transmission schedule {}",
                        s
                    )))
                }
            },
            (None, None) => (TransmissionSchedule::AllAtOnce, Duration::ZERO),
        };

        let message_id = self.message_id(&request);
        let payload = MessageBody::encode_payload(&request)?;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            if pending.contains_key(&message_id) {
                return Err(CapabilityError::InvalidRequest(format!(
                    "request {} already in flight",
                    message_id
                )));
            }
            pending.insert(
                message_id.clone(),
                PendingRequest {
                    required: cfg.remote_don.threshold() as usize,
                    remote_don: cfg.remote_don.clone(),
                    respondents: HashSet::new(),
                    successes: HashMap::new(),
                    errors: HashMap::new(),
                    total_errors: 0,
                    reply: Some(tx),
                },
            );
        }

        let message = MessageBody::new(
            MessageKind::Execute,
            &self.inner.capability_id,
            cfg.remote_don.id,
            cfg.local_don.id,
        )
        .with_message_id(&message_id)
        .with_capability_method(&self.inner.method)
        .with_payload(payload);

        let sends = self.inner.stop.child_token();
        for (peer, delay) in
            transmission_plan(&cfg.remote_don.members, &message_id, schedule, delta_stage)
        {
            if delay.is_zero() {
                if let Err(e) = self.inner.dispatcher.send(peer, message.clone()) {
                    error!(message_id = %message_id, peer = ?peer, error = %e, "failed to send request");
                }
                continue;
            }
            let dispatcher = Arc::clone(&self.inner.dispatcher);
            let message = message.clone();
            let cancel = sends.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        if let Err(e) = dispatcher.send(peer, message) {
                            error!(peer = ?peer, error = %e, "failed to send staged request");
                        }
                    }
                }
            });
        }

        let outcome = tokio::select! {
            reply = rx => reply.unwrap_or_else(|_| Err(CapabilityError::Cancelled(message_id.clone()))),
            _ = tokio::time::sleep(cfg.request_timeout) => Err(CapabilityError::Timeout(message_id.clone())),
            _ = self.inner.stop.cancelled() => Err(CapabilityError::Cancelled(message_id.clone())),
        };
        sends.cancel();
        self.inner.pending.lock().remove(&message_id);
        outcome
    }

    async fn register_to_workflow(&self, _request: WorkflowRegistration) -> Result<(), CapabilityError> {
        Ok(())
    }

    async fn unregister_from_workflow(
        &self,
        _request: WorkflowRegistration,
    ) -> Result<(), CapabilityError> {
        Ok(())
    }
}

#[async_trait]
impl Receiver for ExecutableClient {
    async fn receive(&self, message: MessageBody) {
        if message.method != MessageKind::Execute {
            error!(capability_id = %self.inner.capability_id, method = ?message.method, "unexpected method");
            return;
        }
        let mut pending = self.inner.pending.lock();
        let Some(request) = pending.get_mut(&message.message_id) else {
            debug!(message_id = %message.message_id, "response for unknown request");
            return;
        };
        if let Some(outcome) = request.on_response(&message) {
            if let Some(reply) = request.reply.take() {
                let _ = reply.send(outcome);
            }
            pending.remove(&message.message_id);
        }
    }
}

#[async_trait]
impl Service for ExecutableClient {
    fn name(&self) -> String {
        "ExecutableClient".to_string()
    }

    async fn start(&self) -> Result<(), ServiceError> {
        if self.inner.config().is_none() {
            return Err(ServiceError::not_configured(
                self.name(),
                "call set_config before start",
            ));
        }
        self.state.start_once(&self.name())?;
        info!(capability_id = %self.inner.capability_id, method = %self.inner.method, "executable client started");
        Ok(())
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.state.stop_once(&self.name())?;
        self.inner.stop.cancel();
        self.inner.pending.lock().clear();
        info!(capability_id = %self.inner.capability_id, "executable client closed");
        Ok(())
    }

    fn ready(&self) -> Result<(), ServiceError> {
        self.state.ready(&self.name())
    }
}
