//! # Trigger Publisher
//!
//! Exposes a local trigger to remote workflow DONs.
//!
//! Registrations arrive from every member of a workflow DON. Once `2F + 1`
//! members (of that DON) sent a fresh registration for a workflow, the
//! most common request (at least `F + 1` identical) is registered with the
//! underlying trigger and its events are forwarded to all members of the
//! caller DON. Registrations that stop being refreshed expire and are
//! unregistered from the underlying trigger.
//!
//! With batching enabled, identical events for several workflows of the
//! same caller DON are merged into one message per `batch_collection_period`.

use super::aggregation::aggregate_mode_raw;
use super::message_cache::{now_millis, MessageCache};
use crate::domain::ShimError;
use crate::ports::{Dispatcher, Receiver};
use async_trait::async_trait;
use capability_types::{
    DonId, DonInfo, MessageBody, MessageKind, PeerId, RemoteTriggerConfig, Service, ServiceError,
    ServiceState, TriggerCapability, TriggerEventMetadata, TriggerRegistrationRequest,
    TriggerResponse,
};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shortest batch collection period that still enables batching.
pub const MIN_BATCH_COLLECTION_PERIOD: Duration = Duration::from_millis(10);

struct PublisherConfig {
    remote: RemoteTriggerConfig,
    underlying: Arc<dyn TriggerCapability>,
    cap_don: DonInfo,
    workflow_dons: HashMap<DonId, DonInfo>,
    batching_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegistrationKey {
    caller_don_id: DonId,
    workflow_id: String,
}

struct Registration {
    request: TriggerRegistrationRequest,
    forwarder: JoinHandle<()>,
}

#[derive(Debug, Clone)]
struct PendingBatch {
    raw_response: Vec<u8>,
    caller_don_id: DonId,
    trigger_event_id: String,
    workflow_ids: Vec<String>,
}

struct PublisherInner {
    capability_id: String,
    method: String,
    dispatcher: Arc<dyn Dispatcher>,
    config: RwLock<Option<Arc<PublisherConfig>>>,
    registrations: Mutex<HashMap<RegistrationKey, Registration>>,
    messages: Mutex<MessageCache<RegistrationKey, PeerId>>,
    batching_queue: Mutex<HashMap<[u8; 32], PendingBatch>>,
    stop: CancellationToken,
}

impl PublisherInner {
    fn config(&self) -> Option<Arc<PublisherConfig>> {
        self.config.read().clone()
    }

    async fn handle_registration(self: &Arc<Self>, cfg: &PublisherConfig, message: MessageBody) {
        let request: TriggerRegistrationRequest = match message.decode_payload() {
            Ok(r) => r,
            Err(e) => {
                error!(capability_id = %self.capability_id, error = %e, "failed to decode trigger registration");
                return;
            }
        };
        let Some(caller_don) = cfg.workflow_dons.get(&message.caller_don_id) else {
            error!(
                capability_id = %self.capability_id,
                caller_don_id = message.caller_don_id,
                "registration from unsupported workflow DON"
            );
            return;
        };
        if !caller_don.contains(&message.sender) {
            error!(
                capability_id = %self.capability_id,
                caller_don_id = message.caller_don_id,
                sender = ?message.sender,
                "sender not a member of its workflow DON"
            );
            return;
        }
        if request.workflow_id.is_empty() {
            error!(capability_id = %self.capability_id, "registration with empty workflow id");
            return;
        }

        let key = RegistrationKey {
            caller_don_id: message.caller_don_id,
            workflow_id: request.workflow_id.clone(),
        };
        let now = now_millis();
        let min_required = 2 * u32::from(caller_don.f) + 1;
        let expiry_ms = cfg.remote.registration_expiry.as_millis() as u64;
        let payloads = {
            let mut cache = self.messages.lock();
            cache.insert(key.clone(), message.sender, now, message.payload);
            if self.registrations.lock().contains_key(&key) {
                debug!(capability_id = %self.capability_id, workflow_id = %key.workflow_id, "registration already exists");
                return;
            }
            let (ready, payloads) =
                cache.ready(&key, min_required, now.saturating_sub(expiry_ms), false);
            if !ready {
                debug!(
                    capability_id = %self.capability_id,
                    workflow_id = %key.workflow_id,
                    min_required,
                    "not enough registrations yet"
                );
                return;
            }
            payloads
        };

        let aggregated = match aggregate_mode_raw(&payloads, caller_don.threshold())
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                serde_json::from_slice::<TriggerRegistrationRequest>(&raw).map_err(|e| e.to_string())
            }) {
            Ok(r) => r,
            Err(e) => {
                error!(capability_id = %self.capability_id, workflow_id = %key.workflow_id, error = %e, "failed to aggregate registrations");
                return;
            }
        };

        match cfg.underlying.register_trigger(aggregated.clone()).await {
            Ok(mut events) => {
                let inner = Arc::clone(self);
                let forward_key = key.clone();
                let forwarder = tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = inner.stop.cancelled() => return,
                            event = events.recv() => match event {
                                Some(response) => inner.forward_event(&forward_key, response),
                                None => {
                                    debug!(capability_id = %inner.capability_id, workflow_id = %forward_key.workflow_id, "trigger event channel closed");
                                    return;
                                }
                            },
                        }
                    }
                });
                self.registrations.lock().insert(
                    key.clone(),
                    Registration {
                        request: aggregated,
                        forwarder,
                    },
                );
                info!(capability_id = %self.capability_id, workflow_id = %key.workflow_id, caller_don_id = key.caller_don_id, "registered remote workflow with trigger");
            }
            Err(e) => error!(
                capability_id = %self.capability_id,
                workflow_id = %key.workflow_id,
                error = %e,
                "failed to register trigger"
            ),
        }
    }

    fn forward_event(&self, key: &RegistrationKey, response: TriggerResponse) {
        let Some(cfg) = self.config() else { return };
        let raw_response = match serde_json::to_vec(&response) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "failed to encode trigger event");
                return;
            }
        };
        let trigger_event_id = response.event.id;
        if cfg.batching_enabled {
            let mut hasher = Sha256::new();
            hasher.update(key.caller_don_id.to_le_bytes());
            hasher.update(trigger_event_id.as_bytes());
            hasher.update(&raw_response);
            let digest: [u8; 32] = hasher.finalize().into();
            self.batching_queue
                .lock()
                .entry(digest)
                .or_insert_with(|| PendingBatch {
                    raw_response,
                    caller_don_id: key.caller_don_id,
                    trigger_event_id,
                    workflow_ids: Vec::new(),
                })
                .workflow_ids
                .push(key.workflow_id.clone());
        } else {
            self.send_batch(
                &cfg,
                PendingBatch {
                    raw_response,
                    caller_don_id: key.caller_don_id,
                    trigger_event_id,
                    workflow_ids: vec![key.workflow_id.clone()],
                },
            );
        }
    }

    fn send_batch(&self, cfg: &PublisherConfig, batch: PendingBatch) {
        let Some(caller_don) = cfg.workflow_dons.get(&batch.caller_don_id) else {
            warn!(caller_don_id = batch.caller_don_id, "caller DON no longer configured, dropping event");
            return;
        };
        let chunk = if cfg.batching_enabled {
            cfg.remote.max_batch_size.max(1) as usize
        } else {
            batch.workflow_ids.len().max(1)
        };
        for ids in batch.workflow_ids.chunks(chunk) {
            let message = MessageBody::new(
                MessageKind::TriggerEvent,
                &self.capability_id,
                cfg.cap_don.id,
                batch.caller_don_id,
            )
            .with_capability_method(&self.method)
            .with_payload(batch.raw_response.clone())
            .with_trigger_event(TriggerEventMetadata {
                trigger_event_id: batch.trigger_event_id.clone(),
                workflow_ids: ids.to_vec(),
            });
            for member in &caller_don.members {
                if let Err(e) = self.dispatcher.send(*member, message.clone()) {
                    error!(capability_id = %self.capability_id, peer = ?member, error = %e, "failed to send trigger event");
                }
            }
        }
    }

    fn flush_batches(&self) {
        let Some(cfg) = self.config() else { return };
        let queue = std::mem::take(&mut *self.batching_queue.lock());
        for (_, batch) in queue {
            self.send_batch(&cfg, batch);
        }
    }

    /// Remove registrations whose senders stopped refreshing them.
    async fn expire_registrations(&self) {
        let Some(cfg) = self.config() else { return };
        let now = now_millis();
        let expiry_ms = cfg.remote.registration_expiry.as_millis() as u64;
        let expired: Vec<(RegistrationKey, Registration)> = {
            let mut cache = self.messages.lock();
            let mut registrations = self.registrations.lock();
            let keys: Vec<RegistrationKey> = registrations
                .keys()
                .filter(|key| {
                    let min = cfg
                        .workflow_dons
                        .get(&key.caller_don_id)
                        .map_or(1, |d| 2 * u32::from(d.f) + 1);
                    !cache.ready(key, min, now.saturating_sub(expiry_ms), false).0
                })
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| {
                    cache.delete(&key);
                    registrations.remove(&key).map(|r| (key, r))
                })
                .collect()
        };

        for (key, registration) in expired {
            registration.forwarder.abort();
            let result = cfg.underlying.unregister_trigger(registration.request).await;
            info!(
                capability_id = %self.capability_id,
                caller_don_id = key.caller_don_id,
                workflow_id = %key.workflow_id,
                ok = result.is_ok(),
                "trigger registration expired"
            );
        }
    }
}

pub struct TriggerPublisher {
    inner: Arc<PublisherInner>,
    state: ServiceState,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TriggerPublisher {
    pub fn new(
        capability_id: impl Into<String>,
        method: impl Into<String>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                capability_id: capability_id.into(),
                method: method.into(),
                dispatcher,
                config: RwLock::new(None),
                registrations: Mutex::new(HashMap::new()),
                messages: Mutex::new(MessageCache::new()),
                batching_queue: Mutex::new(HashMap::new()),
                stop: CancellationToken::new(),
            }),
            state: ServiceState::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Replace the configuration. `None` uses the trigger defaults.
    pub fn set_config(
        &self,
        config: Option<RemoteTriggerConfig>,
        underlying: Arc<dyn TriggerCapability>,
        cap_don: DonInfo,
        workflow_dons: HashMap<DonId, DonInfo>,
    ) -> Result<(), ShimError> {
        let remote = config.unwrap_or_default().with_defaults();
        if cap_don.id == 0 || cap_don.members.is_empty() {
            return Err(ShimError::InvalidDon("empty capability DON provided".into()));
        }
        let batching_enabled = remote.max_batch_size > 1
            && remote.batch_collection_period >= MIN_BATCH_COLLECTION_PERIOD;
        *self.inner.config.write() = Some(Arc::new(PublisherConfig {
            remote,
            underlying,
            cap_don,
            workflow_dons,
            batching_enabled,
        }));
        Ok(())
    }

    pub fn capability_id(&self) -> &str {
        &self.inner.capability_id
    }

    /// Workflow DONs allowed to register.
    pub fn workflow_don_ids(&self) -> Vec<DonId> {
        let mut ids: Vec<DonId> = self
            .inner
            .config()
            .map(|c| c.workflow_dons.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn active_registrations(&self) -> usize {
        self.inner.registrations.lock().len()
    }
}

async fn cleanup_loop(inner: Arc<PublisherInner>) {
    let Some(cfg) = inner.config() else { return };
    let mut period = cfg.remote.message_expiry;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = inner.stop.cancelled() => return,
            _ = ticker.tick() => {
                if let Some(cfg) = inner.config() {
                    if cfg.remote.message_expiry != period {
                        period = cfg.remote.message_expiry;
                        ticker = interval_at(Instant::now() + period, period);
                    }
                }
                inner.expire_registrations().await;
            }
        }
    }
}

async fn batching_loop(inner: Arc<PublisherInner>) {
    let Some(cfg) = inner.config() else { return };
    let mut period = cfg.remote.batch_collection_period;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = inner.stop.cancelled() => return,
            _ = ticker.tick() => {
                if let Some(cfg) = inner.config() {
                    if cfg.remote.batch_collection_period != period {
                        period = cfg.remote.batch_collection_period;
                        ticker = interval_at(Instant::now() + period, period);
                    }
                }
                inner.flush_batches();
            }
        }
    }
}

#[async_trait]
impl Receiver for TriggerPublisher {
    async fn receive(&self, message: MessageBody) {
        let Some(cfg) = self.inner.config() else {
            error!(capability_id = %self.inner.capability_id, "config not set, dropping message");
            return;
        };
        if let Some(err) = &message.error {
            error!(capability_id = %self.inner.capability_id, sender = ?message.sender, error = %err, "received message with error");
        }
        match message.method {
            MessageKind::RegisterTrigger => self.inner.handle_registration(&cfg, message).await,
            method => error!(
                capability_id = %self.inner.capability_id,
                ?method,
                sender = ?message.sender,
                "received message with unexpected method"
            ),
        }
    }
}

#[async_trait]
impl Service for TriggerPublisher {
    fn name(&self) -> String {
        "TriggerPublisher".to_string()
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
        tasks.push(tokio::spawn(cleanup_loop(Arc::clone(&self.inner))));
        tasks.push(tokio::spawn(batching_loop(Arc::clone(&self.inner))));
        info!(capability_id = %self.inner.capability_id, method = %self.inner.method, "trigger publisher started");
        Ok(())
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.state.stop_once(&self.name())?;
        self.inner.stop.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        let registrations: Vec<Registration> = self
            .inner
            .registrations
            .lock()
            .drain()
            .map(|(_, r)| r)
            .collect();
        for registration in registrations {
            let _ = registration.forwarder.await;
        }
        info!(capability_id = %self.inner.capability_id, "trigger publisher closed");
        Ok(())
    }

    fn ready(&self) -> Result<(), ServiceError> {
        self.state.ready(&self.name())
    }
}
