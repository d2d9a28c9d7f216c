//! # Consuming Remote Capabilities
//!
//! Builds trigger subscribers and executable clients for the capabilities
//! of a remote capability DON, so workflows of the local workflow DON can
//! call them through the capability registry.
//!
//! Order for a new single-method shim: `set_config`, registry add, start,
//! dispatcher receiver. A shim is cached and owned only once all of them
//! succeeded; a failure part way undoes the earlier steps.

use super::core::{Launcher, LauncherState};
use super::reconcile::cancellable;
use crate::domain::{
    select_trigger_policy, Direction, LauncherError, Outcome, ReconciliationReport,
    RegistryError, ShimKey, WiringError,
};
use crate::ports::Receiver;
use crate::remote::{
    build_aggregator, Aggregator, CombinedClient, DefaultModeAggregator, ExecutableClient,
    TransmissionConfig, TriggerSubscriber,
};
use capability_types::{
    CapabilityConfig, CapabilityInfo, CapabilityType, Don, DonInfo, MethodConfig, MethodRemote,
    RegisteredCapability, RegistrySnapshot, RemoteExecutableConfig, RemoteTriggerConfig, Service,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

impl Launcher {
    /// Wire every capability `remote_don` exposes. Only cancellation is
    /// returned; everything else is recorded per capability.
    pub(super) async fn add_remote_capabilities(
        &self,
        state: &mut LauncherState,
        snapshot: &RegistrySnapshot,
        my_don: &DonInfo,
        remote_don: &Don,
        cancel: &CancellationToken,
        report: &mut ReconciliationReport,
    ) -> Result<(), LauncherError> {
        for (capability_id, blob) in &remote_don.capability_configurations {
            if cancel.is_cancelled() {
                return Err(LauncherError::Cancelled);
            }
            let outcome = match self
                .add_remote_capability(
                    state,
                    snapshot,
                    my_don,
                    &remote_don.info,
                    capability_id,
                    blob.as_bytes(),
                    cancel,
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(WiringError::Cancelled) => return Err(LauncherError::Cancelled),
                Err(e) => {
                    error!(
                        capability_id = %capability_id,
                        don_id = remote_don.id(),
                        error = %e,
                        "failed to add remote capability"
                    );
                    Outcome::Failed(e)
                }
            };
            self.deps.metrics.record_remote_capability_added(
                capability_id,
                &remote_don.info.name,
                outcome.result(),
            );
            report.push(capability_id, remote_don.id(), Direction::Consume, outcome);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn add_remote_capability(
        &self,
        state: &mut LauncherState,
        snapshot: &RegistrySnapshot,
        my_don: &DonInfo,
        remote_don: &DonInfo,
        capability_id: &str,
        raw_config: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Outcome, WiringError> {
        let config = CapabilityConfig::decode(raw_config)?;
        if config.local_only {
            debug!(capability_id, don_id = remote_don.id, "capability is local only, skipping");
            return Ok(Outcome::Skipped);
        }
        let capability = snapshot
            .capability(capability_id)
            .ok_or_else(|| WiringError::UnknownCapability(capability_id.to_string()))?;

        if let Some(methods) = config.method_configs() {
            self.add_remote_capability_v2(state, my_don, remote_don, capability_id, methods, cancel)
                .await?;
            return Ok(Outcome::Wired);
        }

        match capability.capability_type {
            CapabilityType::Trigger => {
                self.add_remote_trigger(
                    state,
                    snapshot,
                    my_don,
                    remote_don,
                    capability_id,
                    config.trigger_config().cloned(),
                    cancel,
                )
                .await?
            }
            capability_type @ (CapabilityType::Action | CapabilityType::Target) => {
                self.add_remote_executable(
                    state,
                    my_don,
                    remote_don,
                    capability_id,
                    capability_type,
                    cancel,
                )
                .await?
            }
            CapabilityType::Consensus => {
                debug!(capability_id, "no remote client for consensus capabilities");
            }
            CapabilityType::Combined => {
                warn!(capability_id, "combined capability without method configs, nothing to wire");
            }
        }
        Ok(Outcome::Wired)
    }

    // =========================================================================
    // V1: one method per capability
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn add_remote_trigger(
        &self,
        state: &mut LauncherState,
        snapshot: &RegistrySnapshot,
        my_don: &DonInfo,
        remote_don: &DonInfo,
        capability_id: &str,
        trigger_config: Option<RemoteTriggerConfig>,
        cancel: &CancellationToken,
    ) -> Result<(), WiringError> {
        let policy = select_trigger_policy(capability_id, remote_don, snapshot)?;
        let aggregator = build_aggregator(policy);
        let info = CapabilityInfo::remote(capability_id, CapabilityType::Trigger, remote_don)?;
        let key = ShimKey::new(capability_id, remote_don.id);

        if let Some(subscriber) = state.cache.trigger_subscribers.get(&key) {
            subscriber.set_config(trigger_config, info, my_don.id, remote_don.clone(), aggregator)?;
            debug!(%key, members = remote_don.members.len(), "reconfigured trigger subscriber");
            return Ok(());
        }

        let subscriber = Arc::new(TriggerSubscriber::new(
            capability_id,
            "",
            Arc::clone(&self.deps.dispatcher),
        ));
        subscriber.set_config(trigger_config, info, my_don.id, remote_don.clone(), aggregator)?;
        let owned = self
            .install_remote_shim(
                RegisteredCapability::Trigger(subscriber.clone()),
                subscriber.clone(),
                subscriber.clone(),
                capability_id,
                remote_don,
                cancel,
            )
            .await?;
        if owned {
            state.sub_services.push(subscriber.clone());
        }
        state.cache.trigger_subscribers.insert(key, subscriber);
        Ok(())
    }

    async fn add_remote_executable(
        &self,
        state: &mut LauncherState,
        my_don: &DonInfo,
        remote_don: &DonInfo,
        capability_id: &str,
        capability_type: CapabilityType,
        cancel: &CancellationToken,
    ) -> Result<(), WiringError> {
        let info = CapabilityInfo::remote(capability_id, capability_type, remote_don)?;
        let timeout = self.config.default_request_timeout;
        let key = ShimKey::new(capability_id, remote_don.id);

        // No transmission override: single-method clients take the
        // schedule from each request.
        if let Some(client) = state.cache.executable_clients.get(&key) {
            client.set_config(info, my_don.clone(), timeout, None)?;
            debug!(%key, members = remote_don.members.len(), "reconfigured executable client");
            return Ok(());
        }

        let client = Arc::new(ExecutableClient::new(
            capability_id,
            "",
            Arc::clone(&self.deps.dispatcher),
        ));
        client.set_config(info, my_don.clone(), timeout, None)?;
        let owned = self
            .install_remote_shim(
                RegisteredCapability::Executable(client.clone()),
                client.clone(),
                client.clone(),
                capability_id,
                remote_don,
                cancel,
            )
            .await?;
        if owned {
            state.sub_services.push(client.clone());
        }
        state.cache.executable_clients.insert(key, client);
        Ok(())
    }

    /// Registry add, start, dispatcher receiver.
    ///
    /// Returns `false` when the registry already held the ID: the shim is
    /// then kept for reconfiguration but neither started nor owned.
    async fn install_remote_shim(
        &self,
        capability: RegisteredCapability,
        service: Arc<dyn Service>,
        receiver: Arc<dyn Receiver>,
        capability_id: &str,
        remote_don: &DonInfo,
        cancel: &CancellationToken,
    ) -> Result<bool, WiringError> {
        match cancellable(cancel, self.deps.registry.add(capability)).await? {
            Ok(()) => {}
            Err(RegistryError::AlreadyExists(_)) => {
                debug!(capability_id, "capability already registered");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        let started = match cancellable(cancel, service.start()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WiringError::Start(e)),
            Err(cancelled) => Err(cancelled),
        };
        if let Err(e) = started {
            self.rollback_registry(capability_id).await;
            return Err(e);
        }

        if let Err(e) = self
            .deps
            .dispatcher
            .set_receiver(capability_id, remote_don.id, receiver)
        {
            if let Err(close_err) = service.close().await {
                warn!(capability_id, error = %close_err, "failed to close shim after receiver error");
            }
            self.rollback_registry(capability_id).await;
            return Err(e.into());
        }

        info!(
            capability_id,
            don_id = remote_don.id,
            shim = %service.name(),
            "added remote capability"
        );
        Ok(true)
    }

    async fn rollback_registry(&self, capability_id: &str) {
        if let Err(e) = self.deps.registry.remove(capability_id).await {
            warn!(capability_id, error = %e, "failed to remove capability after wiring error");
        }
    }

    // =========================================================================
    // V2: several methods behind one combined client
    // =========================================================================

    async fn add_remote_capability_v2(
        &self,
        state: &mut LauncherState,
        my_don: &DonInfo,
        remote_don: &DonInfo,
        capability_id: &str,
        methods: &BTreeMap<String, MethodConfig>,
        cancel: &CancellationToken,
    ) -> Result<(), WiringError> {
        let info = CapabilityInfo::remote(capability_id, CapabilityType::Combined, remote_don)?;
        let key = ShimKey::new(capability_id, remote_don.id);
        let (combined, is_new) = match state.cache.combined_clients.get(&key) {
            Some(existing) => {
                existing.set_info(info.clone());
                (Arc::clone(existing), false)
            }
            None => (Arc::new(CombinedClient::new(info.clone())), true),
        };

        let mut failed = Vec::new();
        for (method, method_config) in methods {
            if cancel.is_cancelled() {
                return Err(WiringError::Cancelled);
            }
            let result = match method_config.remote() {
                Some(MethodRemote::Trigger(config)) => {
                    self.add_method_subscriber(
                        state, &combined, &info, my_don, remote_don, method, config, cancel,
                    )
                    .await
                }
                Some(MethodRemote::Executable(config)) => {
                    self.add_method_client(
                        state, &combined, &info, my_don, remote_don, method, config, cancel,
                    )
                    .await
                }
                None => Err(WiringError::EmptyMethodConfig(method.clone())),
            };
            match result {
                Ok(()) => {}
                Err(WiringError::Cancelled) => return Err(WiringError::Cancelled),
                Err(e) => {
                    error!(capability_id, method = %method, error = %e, "failed to wire remote method");
                    failed.push(method.clone());
                }
            }
        }

        if is_new {
            match cancellable(
                cancel,
                self.deps
                    .registry
                    .add(RegisteredCapability::Combined(combined.clone())),
            )
            .await?
            {
                Ok(()) => info!(capability_id, don_id = remote_don.id, "added combined client"),
                Err(RegistryError::AlreadyExists(_)) => {
                    debug!(capability_id, "combined client already registered")
                }
                Err(e) => return Err(e.into()),
            }
            state.cache.combined_clients.insert(key, combined);
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(WiringError::MethodsFailed {
                capability_id: capability_id.to_string(),
                methods: failed,
            })
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn add_method_subscriber(
        &self,
        state: &mut LauncherState,
        combined: &CombinedClient,
        info: &CapabilityInfo,
        my_don: &DonInfo,
        remote_don: &DonInfo,
        method: &str,
        config: &RemoteTriggerConfig,
        cancel: &CancellationToken,
    ) -> Result<(), WiringError> {
        let min_identical = match config.min_responses_to_aggregate {
            0 => remote_don.threshold(),
            n => n,
        };
        let aggregator: Arc<dyn Aggregator> = Arc::new(DefaultModeAggregator::new(min_identical));
        let key = ShimKey::for_method(&info.id, remote_don.id, method);

        if let Some(subscriber) = state.cache.trigger_subscribers.get(&key) {
            subscriber.set_config(
                Some(config.clone()),
                info.clone(),
                my_don.id,
                remote_don.clone(),
                aggregator,
            )?;
            combined.set_trigger_subscriber(method, subscriber.clone());
            return Ok(());
        }

        let subscriber = Arc::new(TriggerSubscriber::new(
            &info.id,
            method,
            Arc::clone(&self.deps.dispatcher),
        ));
        subscriber.set_config(
            Some(config.clone()),
            info.clone(),
            my_don.id,
            remote_don.clone(),
            aggregator,
        )?;
        self.start_method_shim(subscriber.clone(), subscriber.clone(), &info.id, remote_don, method, cancel)
            .await?;
        combined.set_trigger_subscriber(method, subscriber.clone());
        state.sub_services.push(subscriber.clone());
        state.cache.trigger_subscribers.insert(key, subscriber);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn add_method_client(
        &self,
        state: &mut LauncherState,
        combined: &CombinedClient,
        info: &CapabilityInfo,
        my_don: &DonInfo,
        remote_don: &DonInfo,
        method: &str,
        config: &RemoteExecutableConfig,
        cancel: &CancellationToken,
    ) -> Result<(), WiringError> {
        let transmission = TransmissionConfig {
            schedule: config.schedule(),
            delta_stage: config.delta_stage,
        };
        let key = ShimKey::for_method(&info.id, remote_don.id, method);

        if let Some(client) = state.cache.executable_clients.get(&key) {
            client.set_config(info.clone(), my_don.clone(), config.request_timeout, Some(transmission))?;
            combined.set_executable_client(method, client.clone());
            return Ok(());
        }

        let client = Arc::new(ExecutableClient::new(
            &info.id,
            method,
            Arc::clone(&self.deps.dispatcher),
        ));
        client.set_config(info.clone(), my_don.clone(), config.request_timeout, Some(transmission))?;
        self.start_method_shim(client.clone(), client.clone(), &info.id, remote_don, method, cancel)
            .await?;
        combined.set_executable_client(method, client.clone());
        state.sub_services.push(client.clone());
        state.cache.executable_clients.insert(key, client);
        Ok(())
    }

    /// Start, then route `method` to the shim. Closes the shim if routing
    /// fails.
    async fn start_method_shim(
        &self,
        service: Arc<dyn Service>,
        receiver: Arc<dyn Receiver>,
        capability_id: &str,
        don: &DonInfo,
        method: &str,
        cancel: &CancellationToken,
    ) -> Result<(), WiringError> {
        cancellable(cancel, service.start()).await??;
        if let Err(e) = self
            .deps
            .dispatcher
            .set_receiver_for_method(capability_id, don.id, method, receiver)
        {
            if let Err(close_err) = service.close().await {
                warn!(capability_id, method, error = %close_err, "failed to close shim after receiver error");
            }
            return Err(e.into());
        }
        info!(capability_id, don_id = don.id, method, shim = %service.name(), "started method shim");
        Ok(())
    }
}
