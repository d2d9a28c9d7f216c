//! # Combined Client
//!
//! Registry entry for a remote multi-method capability. Holds one trigger
//! subscriber or executable client per method and routes each call by
//! `request.method`.

use async_trait::async_trait;
use capability_types::{
    BaseCapability, CapabilityError, CapabilityInfo, CapabilityRequest, CapabilityResponse,
    ExecutableCapability, TriggerCapability, TriggerRegistrationRequest, TriggerResponse,
    WorkflowRegistration,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct CombinedClient {
    info: RwLock<CapabilityInfo>,
    trigger_subscribers: RwLock<HashMap<String, Arc<dyn TriggerCapability>>>,
    executable_clients: RwLock<HashMap<String, Arc<dyn ExecutableCapability>>>,
}

impl CombinedClient {
    pub fn new(info: CapabilityInfo) -> Self {
        Self {
            info: RwLock::new(info),
            trigger_subscribers: RwLock::new(HashMap::new()),
            executable_clients: RwLock::new(HashMap::new()),
        }
    }

    /// Refresh the descriptor after a membership change of the capability DON.
    pub fn set_info(&self, info: CapabilityInfo) {
        *self.info.write() = info;
    }

    pub fn set_trigger_subscriber(&self, method: impl Into<String>, subscriber: Arc<dyn TriggerCapability>) {
        self.trigger_subscribers.write().insert(method.into(), subscriber);
    }

    pub fn set_executable_client(&self, method: impl Into<String>, client: Arc<dyn ExecutableCapability>) {
        self.executable_clients.write().insert(method.into(), client);
    }

    pub fn trigger_subscriber(&self, method: &str) -> Option<Arc<dyn TriggerCapability>> {
        self.trigger_subscribers.read().get(method).cloned()
    }

    pub fn executable_client(&self, method: &str) -> Option<Arc<dyn ExecutableCapability>> {
        self.executable_clients.read().get(method).cloned()
    }

    /// All wired methods, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self
            .trigger_subscribers
            .read()
            .keys()
            .chain(self.executable_clients.read().keys())
            .cloned()
            .collect();
        methods.sort();
        methods.dedup();
        methods
    }

    fn undefined(&self, method: &str) -> CapabilityError {
        CapabilityError::MethodNotDefined {
            capability_id: self.info.read().id.clone(),
            method: method.to_string(),
        }
    }
}

impl BaseCapability for CombinedClient {
    fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        Ok(self.info.read().clone())
    }
}

#[async_trait]
impl TriggerCapability for CombinedClient {
    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<mpsc::Receiver<TriggerResponse>, CapabilityError> {
        let subscriber = self
            .trigger_subscriber(&request.method)
            .ok_or_else(|| self.undefined(&request.method))?;
        subscriber.register_trigger(request).await
    }

    async fn unregister_trigger(&self, request: TriggerRegistrationRequest) -> Result<(), CapabilityError> {
        let subscriber = self
            .trigger_subscriber(&request.method)
            .ok_or_else(|| self.undefined(&request.method))?;
        subscriber.unregister_trigger(request).await
    }
}

#[async_trait]
impl ExecutableCapability for CombinedClient {
    async fn execute(&self, request: CapabilityRequest) -> Result<CapabilityResponse, CapabilityError> {
        let client = self
            .executable_client(&request.method)
            .ok_or_else(|| self.undefined(&request.method))?;
        client.execute(request).await
    }

    async fn register_to_workflow(&self, _request: WorkflowRegistration) -> Result<(), CapabilityError> {
        Err(CapabilityError::NotSupported(
            "register_to_workflow is not supported by remote capabilities".into(),
        ))
    }

    async fn unregister_from_workflow(&self, _request: WorkflowRegistration) -> Result<(), CapabilityError> {
        Err(CapabilityError::NotSupported(
            "unregister_from_workflow is not supported by remote capabilities".into(),
        ))
    }
}
