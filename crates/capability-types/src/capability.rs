//! # Capability Contracts
//!
//! The traits every capability (local implementation or remote shim)
//! implements, and the closed [`RegisteredCapability`] variant stored in the
//! capability registry. Checking that an underlying capability honours a
//! given contract is a match on that variant.

use crate::entities::DonInfo;
use crate::errors::CapabilityError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Declared type of a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityType {
    Trigger,
    Action,
    Target,
    Consensus,
    Combined,
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::Target => "target",
            Self::Consensus => "consensus",
            Self::Combined => "combined",
        };
        f.write_str(s)
    }
}

/// Descriptor returned by [`BaseCapability::info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub id: String,
    pub capability_type: CapabilityType,
    pub description: String,
    /// DON the capability is served from. `None` for purely local ones.
    pub don: Option<DonInfo>,
    pub is_local: bool,
}

impl CapabilityInfo {
    /// Info for a capability served by the local node.
    pub fn local(
        id: impl Into<String>,
        capability_type: CapabilityType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            capability_type,
            description: description.into(),
            don: None,
            is_local: true,
        }
    }

    /// Info for the remote proxy of `id` served by `don`.
    pub fn remote(
        id: impl Into<String>,
        capability_type: CapabilityType,
        don: &DonInfo,
    ) -> Result<Self, CapabilityError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CapabilityError::EmptyId);
        }
        if don.members.is_empty() {
            return Err(CapabilityError::EmptyDon(don.id));
        }
        Ok(Self {
            description: format!("Remote Capability for {}", id),
            id,
            capability_type,
            don: Some(don.clone()),
            is_local: false,
        })
    }
}

// =============================================================================
// REQUESTS & RESPONSES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRegistrationRequest {
    pub workflow_id: String,
    /// Method name for multi-method capabilities, empty otherwise.
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub event: TriggerEvent,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub workflow_id: String,
    pub workflow_execution_id: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Per-request transmission schedule (`allAtOnce` / `oneAtATime`),
    /// honoured by clients configured without a schedule.
    #[serde(default)]
    pub transmission_schedule: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityResponse {
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRegistration {
    pub workflow_id: String,
    #[serde(default)]
    pub config: Vec<u8>,
}

// =============================================================================
// CONTRACTS
// =============================================================================

pub trait BaseCapability: Send + Sync {
    fn info(&self) -> Result<CapabilityInfo, CapabilityError>;
}

#[async_trait]
pub trait TriggerCapability: BaseCapability {
    /// Register a workflow; trigger events are delivered on the returned channel.
    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<mpsc::Receiver<TriggerResponse>, CapabilityError>;

    async fn unregister_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<(), CapabilityError>;
}

/// Action and target capabilities.
#[async_trait]
pub trait ExecutableCapability: BaseCapability {
    async fn execute(&self, request: CapabilityRequest)
        -> Result<CapabilityResponse, CapabilityError>;

    async fn register_to_workflow(
        &self,
        request: WorkflowRegistration,
    ) -> Result<(), CapabilityError>;

    async fn unregister_from_workflow(
        &self,
        request: WorkflowRegistration,
    ) -> Result<(), CapabilityError>;
}

/// Multi-method capability that can both trigger and execute.
pub trait CombinedCapability: TriggerCapability + ExecutableCapability {
    fn into_trigger(self: Arc<Self>) -> Arc<dyn TriggerCapability>;
    fn into_executable(self: Arc<Self>) -> Arc<dyn ExecutableCapability>;
}

impl<T> CombinedCapability for T
where
    T: TriggerCapability + ExecutableCapability + 'static,
{
    fn into_trigger(self: Arc<Self>) -> Arc<dyn TriggerCapability> {
        self
    }

    fn into_executable(self: Arc<Self>) -> Arc<dyn ExecutableCapability> {
        self
    }
}

/// What the capability registry stores.
#[derive(Clone)]
pub enum RegisteredCapability {
    Trigger(Arc<dyn TriggerCapability>),
    Executable(Arc<dyn ExecutableCapability>),
    Combined(Arc<dyn CombinedCapability>),
}

impl RegisteredCapability {
    pub fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        match self {
            Self::Trigger(c) => c.info(),
            Self::Executable(c) => c.info(),
            Self::Combined(c) => c.info(),
        }
    }

    /// The trigger contract, if this capability honours it.
    pub fn as_trigger(&self) -> Option<Arc<dyn TriggerCapability>> {
        match self {
            Self::Trigger(c) => Some(Arc::clone(c)),
            Self::Combined(c) => Some(Arc::clone(c).into_trigger()),
            Self::Executable(_) => None,
        }
    }

    /// The action/target contract, if this capability honours it.
    pub fn as_executable(&self) -> Option<Arc<dyn ExecutableCapability>> {
        match self {
            Self::Executable(c) => Some(Arc::clone(c)),
            Self::Combined(c) => Some(Arc::clone(c).into_executable()),
            Self::Trigger(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Trigger(_) => "trigger",
            Self::Executable(_) => "executable",
            Self::Combined(_) => "combined",
        }
    }
}

impl fmt::Debug for RegisteredCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.info().map(|i| i.id).unwrap_or_default();
        f.debug_struct("RegisteredCapability")
            .field("kind", &self.kind())
            .field("id", &id)
            .finish()
    }
}
