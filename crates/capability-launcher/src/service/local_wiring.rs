//! # Exposing Local Capabilities
//!
//! Builds trigger publishers and executable servers for the capabilities of
//! the local capability DONs, so the remote workflow DONs can reach them.
//! The underlying capability is looked up in the capability registry.

use super::core::{Launcher, LauncherState};
use super::reconcile::cancellable;
use crate::domain::{
    DispatcherError, Direction, LauncherError, Outcome, ReconciliationReport, ShimKey,
    WiringError,
};
use crate::ports::Receiver;
use crate::remote::{hasher_for, ExecutableServer, TriggerPublisher};
use capability_types::{
    CapabilityConfig, CapabilityInfo, CapabilityType, Don, DonId, DonInfo, ExecutableCapability,
    MethodConfig, MethodRemote, RegisteredCapability, RegistrySnapshot, RemoteExecutableConfig,
    RemoteTriggerConfig, Service, TriggerCapability,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const TRIGGER_CONTRACT: &str = "TriggerCapability";
const EXECUTABLE_CONTRACT: &str = "ExecutableCapability";

impl Launcher {
    /// Expose every capability of `my_don` to `workflow_dons`. Only
    /// cancellation is returned; everything else is recorded per capability.
    pub(super) async fn serve_capabilities(
        &self,
        state: &mut LauncherState,
        snapshot: &RegistrySnapshot,
        my_don: &Don,
        workflow_dons: &HashMap<DonId, DonInfo>,
        cancel: &CancellationToken,
        report: &mut ReconciliationReport,
    ) -> Result<(), LauncherError> {
        for (capability_id, blob) in &my_don.capability_configurations {
            if cancel.is_cancelled() {
                return Err(LauncherError::Cancelled);
            }
            let outcome = match self
                .serve_capability(
                    state,
                    snapshot,
                    &my_don.info,
                    workflow_dons,
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
                        don_id = my_don.id(),
                        error = %e,
                        "failed to serve capability"
                    );
                    Outcome::Failed(e)
                }
            };
            self.deps
                .metrics
                .record_local_capability_exposed(capability_id, outcome.result());
            report.push(capability_id, my_don.id(), Direction::Expose, outcome);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn serve_capability(
        &self,
        state: &mut LauncherState,
        snapshot: &RegistrySnapshot,
        my_don: &DonInfo,
        workflow_dons: &HashMap<DonId, DonInfo>,
        capability_id: &str,
        raw_config: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Outcome, WiringError> {
        let config = CapabilityConfig::decode(raw_config)?;
        if config.local_only {
            debug!(capability_id, don_id = my_don.id, "skipping local-only capability");
            return Ok(Outcome::Skipped);
        }
        let capability = snapshot
            .capability(capability_id)
            .ok_or_else(|| WiringError::UnknownCapability(capability_id.to_string()))?;

        if let Some(methods) = config.method_configs() {
            self.expose_capability_v2(state, my_don, workflow_dons, capability_id, methods, cancel)
                .await?;
            return Ok(Outcome::Wired);
        }

        match capability.capability_type {
            CapabilityType::Trigger => {
                self.serve_trigger(
                    state,
                    my_don,
                    workflow_dons,
                    capability_id,
                    config.trigger_config().cloned(),
                    cancel,
                )
                .await?
            }
            capability_type @ (CapabilityType::Action | CapabilityType::Target) => {
                let excluded = config
                    .target_config()
                    .map(|t| t.request_hash_excluded_attributes.clone())
                    .unwrap_or_default();
                self.serve_executable(
                    state,
                    my_don,
                    workflow_dons,
                    capability_id,
                    capability_type,
                    excluded,
                    cancel,
                )
                .await?
            }
            CapabilityType::Consensus => {
                debug!(capability_id, "consensus capabilities are not exposed remotely");
            }
            CapabilityType::Combined => {
                warn!(capability_id, "combined capability without method configs, nothing to expose");
            }
        }
        Ok(Outcome::Wired)
    }

    async fn underlying(
        &self,
        capability_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RegisteredCapability, WiringError> {
        Ok(cancellable(cancel, self.deps.registry.get(capability_id)).await??)
    }

    // =========================================================================
    // V1: one method per capability
    // =========================================================================

    async fn serve_trigger(
        &self,
        state: &mut LauncherState,
        my_don: &DonInfo,
        workflow_dons: &HashMap<DonId, DonInfo>,
        capability_id: &str,
        trigger_config: Option<RemoteTriggerConfig>,
        cancel: &CancellationToken,
    ) -> Result<(), WiringError> {
        let underlying = self
            .underlying(capability_id, cancel)
            .await?
            .as_trigger()
            .ok_or_else(|| contract_mismatch(capability_id, TRIGGER_CONTRACT))?;
        let key = ShimKey::new(capability_id, my_don.id);

        if let Some(publisher) = state.cache.trigger_publishers.get(&key) {
            publisher.set_config(trigger_config, underlying, my_don.clone(), workflow_dons.clone())?;
            debug!(%key, "reconfigured trigger publisher");
            return Ok(());
        }

        let publisher = Arc::new(TriggerPublisher::new(
            capability_id,
            "",
            Arc::clone(&self.deps.dispatcher),
        ));
        publisher.set_config(trigger_config, underlying, my_don.clone(), workflow_dons.clone())?;
        if self
            .install_local_shim(publisher.clone(), publisher.clone(), capability_id, my_don, "", cancel)
            .await?
        {
            state.sub_services.push(publisher.clone());
            state.cache.trigger_publishers.insert(key, publisher);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn serve_executable(
        &self,
        state: &mut LauncherState,
        my_don: &DonInfo,
        workflow_dons: &HashMap<DonId, DonInfo>,
        capability_id: &str,
        capability_type: CapabilityType,
        request_hash_excluded_attributes: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<(), WiringError> {
        let underlying = self
            .underlying(capability_id, cancel)
            .await?
            .as_executable()
            .ok_or_else(|| contract_mismatch(capability_id, EXECUTABLE_CONTRACT))?;
        let info = CapabilityInfo::remote(capability_id, capability_type, my_don)?;
        let remote = RemoteExecutableConfig {
            request_timeout: self.config.default_request_timeout,
            server_max_parallel_requests: self.config.default_max_parallel_requests,
            request_hash_excluded_attributes,
            ..Default::default()
        };
        let key = ShimKey::new(capability_id, my_don.id);

        if let Some(server) = state.cache.executable_servers.get(&key) {
            server.set_config(remote, underlying, info, my_don.clone(), workflow_dons.clone(), None)?;
            debug!(%key, "reconfigured executable server");
            return Ok(());
        }

        let server = Arc::new(ExecutableServer::new(
            capability_id,
            "",
            Arc::clone(&self.deps.dispatcher),
        ));
        server.set_config(remote, underlying, info, my_don.clone(), workflow_dons.clone(), None)?;
        if self
            .install_local_shim(server.clone(), server.clone(), capability_id, my_don, "", cancel)
            .await?
        {
            state.sub_services.push(server.clone());
            state.cache.executable_servers.insert(key, server);
        }
        Ok(())
    }

    // =========================================================================
    // V2: one shim per method
    // =========================================================================

    async fn expose_capability_v2(
        &self,
        state: &mut LauncherState,
        my_don: &DonInfo,
        workflow_dons: &HashMap<DonId, DonInfo>,
        capability_id: &str,
        methods: &BTreeMap<String, MethodConfig>,
        cancel: &CancellationToken,
    ) -> Result<(), WiringError> {
        let info = CapabilityInfo::remote(capability_id, CapabilityType::Combined, my_don)?;
        let underlying = self.underlying(capability_id, cancel).await?;

        let mut failed = Vec::new();
        for (method, method_config) in methods {
            if cancel.is_cancelled() {
                return Err(WiringError::Cancelled);
            }
            let result = match method_config.remote() {
                Some(MethodRemote::Trigger(config)) => {
                    let trigger = underlying
                        .as_trigger()
                        .ok_or_else(|| contract_mismatch(capability_id, TRIGGER_CONTRACT))?;
                    self.expose_method_publisher(
                        state, trigger, my_don, workflow_dons, capability_id, method, config, cancel,
                    )
                    .await
                }
                Some(MethodRemote::Executable(config)) => {
                    let executable = underlying
                        .as_executable()
                        .ok_or_else(|| contract_mismatch(capability_id, EXECUTABLE_CONTRACT))?;
                    self.expose_method_server(
                        state, executable, &info, my_don, workflow_dons, method, config, cancel,
                    )
                    .await
                }
                None => Err(WiringError::EmptyMethodConfig(method.clone())),
            };
            match result {
                Ok(()) => {}
                Err(WiringError::Cancelled) => return Err(WiringError::Cancelled),
                Err(e) => {
                    error!(capability_id, method = %method, error = %e, "failed to expose method");
                    failed.push(method.clone());
                }
            }
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
    async fn expose_method_publisher(
        &self,
        state: &mut LauncherState,
        underlying: Arc<dyn TriggerCapability>,
        my_don: &DonInfo,
        workflow_dons: &HashMap<DonId, DonInfo>,
        capability_id: &str,
        method: &str,
        config: &RemoteTriggerConfig,
        cancel: &CancellationToken,
    ) -> Result<(), WiringError> {
        let key = ShimKey::for_method(capability_id, my_don.id, method);
        if let Some(publisher) = state.cache.trigger_publishers.get(&key) {
            publisher.set_config(Some(config.clone()), underlying, my_don.clone(), workflow_dons.clone())?;
            return Ok(());
        }

        let publisher = Arc::new(TriggerPublisher::new(
            capability_id,
            method,
            Arc::clone(&self.deps.dispatcher),
        ));
        publisher.set_config(Some(config.clone()), underlying, my_don.clone(), workflow_dons.clone())?;
        if self
            .install_local_shim(publisher.clone(), publisher.clone(), capability_id, my_don, method, cancel)
            .await?
        {
            state.sub_services.push(publisher.clone());
            state.cache.trigger_publishers.insert(key, publisher);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn expose_method_server(
        &self,
        state: &mut LauncherState,
        underlying: Arc<dyn ExecutableCapability>,
        info: &CapabilityInfo,
        my_don: &DonInfo,
        workflow_dons: &HashMap<DonId, DonInfo>,
        method: &str,
        config: &RemoteExecutableConfig,
        cancel: &CancellationToken,
    ) -> Result<(), WiringError> {
        let hasher = hasher_for(config.hasher_type(), &config.request_hash_excluded_attributes);
        let key = ShimKey::for_method(&info.id, my_don.id, method);
        if let Some(server) = state.cache.executable_servers.get(&key) {
            server.set_config(
                config.clone(),
                underlying,
                info.clone(),
                my_don.clone(),
                workflow_dons.clone(),
                Some(hasher),
            )?;
            return Ok(());
        }

        let server = Arc::new(ExecutableServer::new(
            &info.id,
            method,
            Arc::clone(&self.deps.dispatcher),
        ));
        server.set_config(
            config.clone(),
            underlying,
            info.clone(),
            my_don.clone(),
            workflow_dons.clone(),
            Some(hasher),
        )?;
        if self
            .install_local_shim(server.clone(), server.clone(), &info.id, my_don, method, cancel)
            .await?
        {
            state.sub_services.push(server.clone());
            state.cache.executable_servers.insert(key, server);
        }
        Ok(())
    }

    /// Start the shim, then route inbound messages to it.
    ///
    /// Returns `false` when a receiver is already routed for the key: the
    /// capability was exposed by an earlier pass and the new shim is closed
    /// again.
    async fn install_local_shim(
        &self,
        service: Arc<dyn Service>,
        receiver: Arc<dyn Receiver>,
        capability_id: &str,
        my_don: &DonInfo,
        method: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, WiringError> {
        match cancellable(cancel, service.start()).await? {
            Ok(()) => {}
            Err(e) => return Err(WiringError::Start(e)),
        }

        let routed = if method.is_empty() {
            self.deps
                .dispatcher
                .set_receiver(capability_id, my_don.id, receiver)
        } else {
            self.deps
                .dispatcher
                .set_receiver_for_method(capability_id, my_don.id, method, receiver)
        };
        if let Err(e) = routed {
            if let Err(close_err) = service.close().await {
                warn!(capability_id, method, error = %close_err, "failed to close unrouted shim");
            }
            return match e {
                DispatcherError::ReceiverExists { .. } => {
                    debug!(capability_id, method, error = %e, "receiver already exists");
                    Ok(false)
                }
                e => Err(e.into()),
            };
        }

        info!(
            capability_id,
            don_id = my_don.id,
            method,
            shim = %service.name(),
            "enabled external access for capability"
        );
        Ok(true)
    }
}

fn contract_mismatch(capability_id: &str, expected: &'static str) -> WiringError {
    WiringError::ContractMismatch {
        capability_id: capability_id.to_string(),
        expected,
    }
}
