//! # Trigger Subscriber
//!
//! Local proxy of a trigger served by a remote capability DON.
//!
//! - Periodically re-sends every workflow registration to each member of
//!   the remote DON (`registration_refresh`).
//! - Collects trigger events per `(event ID, workflow ID)` from distinct
//!   members and, once `min_responses` arrived, aggregates them into one
//!   response for the workflow.
//! - Forgets events older than `message_expiry`.
//!
//! Configuration is swapped as a whole by [`TriggerSubscriber::set_config`],
//! so a reconciliation pass can update a running subscriber in place.

use super::aggregation::Aggregator;
use super::message_cache::{now_millis, MessageCache};
use crate::domain::ShimError;
use crate::ports::{Dispatcher, Receiver};
use async_trait::async_trait;
use capability_types::{
    BaseCapability, CapabilityError, CapabilityInfo, DonId, DonInfo, MessageBody, MessageKind,
    PeerId, RemoteTriggerConfig, Service, ServiceError, ServiceState, TriggerCapability,
    TriggerRegistrationRequest, TriggerResponse,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The engine drains callbacks without blocking; this is only a cushion.
pub const CALLBACK_BUFFER_SIZE: usize = 1000;

/// Workflow IDs honoured per trigger event message.
pub const MAX_BATCHED_WORKFLOW_IDS: usize = 1000;

#[derive(Debug)]
struct SubscriberConfig {
    remote: RemoteTriggerConfig,
    info: CapabilityInfo,
    remote_don: DonInfo,
    members: HashSet<PeerId>,
    local_don_id: DonId,
    aggregator: Arc<dyn Aggregator>,
    min_responses: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EventKey {
    trigger_event_id: String,
    workflow_id: String,
}

struct Registration {
    callback: mpsc::Sender<TriggerResponse>,
    raw_request: Vec<u8>,
}

struct SubscriberInner {
    capability_id: String,
    method: String,
    dispatcher: Arc<dyn Dispatcher>,
    config: RwLock<Option<Arc<SubscriberConfig>>>,
    registrations: Mutex<HashMap<String, Registration>>,
    messages: Mutex<MessageCache<EventKey, PeerId>>,
}

impl SubscriberInner {
    fn config(&self) -> Option<Arc<SubscriberConfig>> {
        self.config.read().clone()
    }

    fn send_registrations(&self, cfg: &SubscriberConfig) {
        let requests: Vec<Vec<u8>> = self
            .registrations
            .lock()
            .values()
            .map(|r| r.raw_request.clone())
            .collect();
        if requests.is_empty() {
            debug!(capability_id = %self.capability_id, "no workflows to register");
            return;
        }
        debug!(
            capability_id = %self.capability_id,
            don_id = cfg.remote_don.id,
            members = cfg.remote_don.members.len(),
            workflows = requests.len(),
            "refreshing remote trigger registrations"
        );
        for raw in &requests {
            for member in &cfg.remote_don.members {
                let message = MessageBody::new(
                    MessageKind::RegisterTrigger,
                    &cfg.info.id,
                    cfg.remote_don.id,
                    cfg.local_don_id,
                )
                .with_capability_method(&self.method)
                .with_payload(raw.clone());
                if let Err(e) = self.dispatcher.send(*member, message) {
                    error!(
                        capability_id = %cfg.info.id,
                        peer = ?member,
                        error = %e,
                        "failed to send trigger registration"
                    );
                }
            }
        }
    }
}

pub struct TriggerSubscriber {
    inner: Arc<SubscriberInner>,
    state: ServiceState,
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TriggerSubscriber {
    /// `method` is empty for single-method capabilities.
    pub fn new(
        capability_id: impl Into<String>,
        method: impl Into<String>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(SubscriberInner {
                capability_id: capability_id.into(),
                method: method.into(),
                dispatcher,
                config: RwLock::new(None),
                registrations: Mutex::new(HashMap::new()),
                messages: Mutex::new(MessageCache::new()),
            }),
            state: ServiceState::new(),
            stop: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Replace the configuration. `None` uses the trigger defaults.
    ///
    /// A zero `min_responses_to_aggregate` becomes `F + 1` of `remote_don`.
    pub fn set_config(
        &self,
        config: Option<RemoteTriggerConfig>,
        info: CapabilityInfo,
        local_don_id: DonId,
        remote_don: DonInfo,
        aggregator: Arc<dyn Aggregator>,
    ) -> Result<(), ShimError> {
        let remote = config.unwrap_or_default().with_defaults();
        if info.id.is_empty() || info.id != self.inner.capability_id {
            return Err(ShimError::CapabilityMismatch {
                expected: self.inner.capability_id.clone(),
                got: info.id,
            });
        }
        if local_don_id == 0 {
            return Err(ShimError::InvalidDon("local DON ID is 0".into()));
        }
        if remote_don.id == 0 || remote_don.members.is_empty() {
            return Err(ShimError::InvalidDon("empty remote DON provided".into()));
        }

        let min_responses = match remote.min_responses_to_aggregate {
            0 => remote_don.threshold(),
            n => n,
        };
        let members = remote_don.members.iter().copied().collect();
        *self.inner.config.write() = Some(Arc::new(SubscriberConfig {
            remote,
            info,
            remote_don,
            members,
            local_don_id,
            aggregator,
            min_responses,
        }));
        Ok(())
    }

    pub fn capability_id(&self) -> &str {
        &self.inner.capability_id
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// DON the subscriber currently listens to.
    pub fn remote_don(&self) -> Option<DonInfo> {
        self.inner.config().map(|c| c.remote_don.clone())
    }

    pub fn min_responses(&self) -> Option<u32> {
        self.inner.config().map(|c| c.min_responses)
    }

    pub fn registered_workflows(&self) -> usize {
        self.inner.registrations.lock().len()
    }

    /// Send all registrations now instead of waiting for the next tick.
    pub fn refresh_registrations(&self) {
        if let Some(cfg) = self.inner.config() {
            self.inner.send_registrations(&cfg);
        }
    }
}

async fn registration_loop(inner: Arc<SubscriberInner>, stop: CancellationToken) {
    let Some(cfg) = inner.config() else { return };
    let mut period = cfg.remote.registration_refresh;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {
                let Some(cfg) = inner.config() else { continue };
                if cfg.remote.registration_refresh != period {
                    period = cfg.remote.registration_refresh;
                    ticker = interval_at(Instant::now() + period, period);
                }
                inner.send_registrations(&cfg);
            }
        }
    }
}

async fn cleanup_loop(inner: Arc<SubscriberInner>, stop: CancellationToken) {
    let Some(cfg) = inner.config() else { return };
    let mut period = cfg.remote.message_expiry;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {
                let Some(cfg) = inner.config() else { continue };
                if cfg.remote.message_expiry != period {
                    period = cfg.remote.message_expiry;
                    ticker = interval_at(Instant::now() + period, period);
                }
                let cutoff = now_millis().saturating_sub(period.as_millis() as u64);
                let dropped = inner.messages.lock().delete_older_than(cutoff);
                if dropped > 0 {
                    debug!(capability_id = %inner.capability_id, dropped, "expired trigger events");
                }
            }
        }
    }
}

impl BaseCapability for TriggerSubscriber {
    fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        self.inner
            .config()
            .map(|c| c.info.clone())
            .ok_or_else(|| CapabilityError::NotConfigured(self.inner.capability_id.clone()))
    }
}

#[async_trait]
impl TriggerCapability for TriggerSubscriber {
    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<mpsc::Receiver<TriggerResponse>, CapabilityError> {
        if request.workflow_id.is_empty() {
            return Err(CapabilityError::InvalidRequest("empty workflow id".into()));
        }
        let cfg = self
            .inner
            .config()
            .ok_or_else(|| CapabilityError::NotConfigured(self.inner.capability_id.clone()))?;
        let raw_request = MessageBody::encode_payload(&request)?;

        let (tx, rx) = mpsc::channel(CALLBACK_BUFFER_SIZE);
        let previous = self.inner.registrations.lock().insert(
            request.workflow_id.clone(),
            Registration {
                callback: tx,
                raw_request,
            },
        );
        if previous.is_some() {
            warn!(
                capability_id = %cfg.info.id,
                don_id = cfg.remote_don.id,
                workflow_id = %request.workflow_id,
                "re-registering trigger; previous callback closed"
            );
        } else {
            info!(
                capability_id = %cfg.info.id,
                don_id = cfg.remote_don.id,
                workflow_id = %request.workflow_id,
                "registered remote trigger"
            );
        }
        Ok(rx)
    }

    async fn unregister_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<(), CapabilityError> {
        // Remote registrations lapse on their own after `registration_expiry`.
        self.inner.registrations.lock().remove(&request.workflow_id);
        Ok(())
    }
}

#[async_trait]
impl Receiver for TriggerSubscriber {
    async fn receive(&self, message: MessageBody) {
        let Some(cfg) = self.inner.config() else {
            error!(capability_id = %self.inner.capability_id, "config not set, dropping message");
            return;
        };
        let sender = message.sender;
        if !cfg.members.contains(&sender) {
            error!(capability_id = %cfg.info.id, ?sender, "received message from unexpected node");
            return;
        }
        if message.method != MessageKind::TriggerEvent {
            error!(
                capability_id = %cfg.info.id,
                method = ?message.method,
                ?sender,
                error = ?message.error,
                "received message with unexpected method"
            );
            return;
        }
        let Some(meta) = message.trigger_event.as_ref() else {
            error!(capability_id = %cfg.info.id, ?sender, "trigger event without metadata");
            return;
        };
        if meta.workflow_ids.len() > MAX_BATCHED_WORKFLOW_IDS {
            warn!(
                capability_id = %cfg.info.id,
                workflows = meta.workflow_ids.len(),
                "too many workflow IDs in trigger event, truncating"
            );
        }

        let expiry_ms = cfg.remote.message_expiry.as_millis() as u64;
        for workflow_id in meta.workflow_ids.iter().take(MAX_BATCHED_WORKFLOW_IDS) {
            let callback = self
                .inner
                .registrations
                .lock()
                .get(workflow_id)
                .map(|r| r.callback.clone());
            let Some(callback) = callback else {
                warn!(capability_id = %cfg.info.id, %workflow_id, "event for unregistered workflow");
                continue;
            };

            let key = EventKey {
                trigger_event_id: meta.trigger_event_id.clone(),
                workflow_id: workflow_id.clone(),
            };
            let now = now_millis();
            let (ready, payloads) = {
                let mut cache = self.inner.messages.lock();
                cache.insert(key.clone(), sender, now, message.payload.clone());
                cache.ready(&key, cfg.min_responses, now.saturating_sub(expiry_ms), true)
            };
            if !ready {
                continue;
            }

            match cfg.aggregator.aggregate(&meta.trigger_event_id, &payloads) {
                Ok(response) => {
                    info!(
                        capability_id = %cfg.info.id,
                        trigger_event_id = %meta.trigger_event_id,
                        %workflow_id,
                        "remote trigger event aggregated"
                    );
                    if callback.try_send(response).is_err() {
                        warn!(capability_id = %cfg.info.id, %workflow_id, "trigger callback full or closed");
                    }
                }
                Err(e) => error!(
                    capability_id = %cfg.info.id,
                    trigger_event_id = %meta.trigger_event_id,
                    error = %e,
                    "failed to aggregate trigger responses"
                ),
            }
        }
    }
}

#[async_trait]
impl Service for TriggerSubscriber {
    fn name(&self) -> String {
        "TriggerSubscriber".to_string()
    }

    async fn start(&self) -> Result<(), ServiceError> {
        if self.inner.config().is_none() {
            return Err(ServiceError::not_configured(
                self.name(),
                "call set_config before start",
            ));
        }
        self.state.start_once(&self.name())?;
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(registration_loop(
            Arc::clone(&self.inner),
            self.stop.clone(),
        )));
        tasks.push(tokio::spawn(cleanup_loop(
            Arc::clone(&self.inner),
            self.stop.clone(),
        )));
        info!(capability_id = %self.inner.capability_id, method = %self.inner.method, "trigger subscriber started");
        Ok(())
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.state.stop_once(&self.name())?;
        self.stop.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!(capability_id = %self.inner.capability_id, "trigger subscriber closed");
        Ok(())
    }

    fn ready(&self) -> Result<(), ServiceError> {
        self.state.ready(&self.name())
    }
}
