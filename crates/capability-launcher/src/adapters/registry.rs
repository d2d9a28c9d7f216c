//! In-memory capability registry.

use crate::domain::RegistryError;
use crate::ports::CapabilityRegistry;
use async_trait::async_trait;
use capability_types::{RegisteredCapability, RegistrySnapshot};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Node-local registry keyed by capability ID.
#[derive(Default)]
pub struct InMemoryCapabilityRegistry {
    capabilities: RwLock<HashMap<String, RegisteredCapability>>,
    snapshot: RwLock<Option<Arc<RegistrySnapshot>>>,
}

impl InMemoryCapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot installed by the last reconciliation pass.
    pub fn local_registry(&self) -> Option<Arc<RegistrySnapshot>> {
        self.snapshot.read().clone()
    }

    /// Registered IDs, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.capabilities.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.capabilities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.read().is_empty()
    }
}

#[async_trait]
impl CapabilityRegistry for InMemoryCapabilityRegistry {
    fn set_local_registry(&self, snapshot: Arc<RegistrySnapshot>) {
        *self.snapshot.write() = Some(snapshot);
    }

    async fn add(&self, capability: RegisteredCapability) -> Result<(), RegistryError> {
        let info = capability
            .info()
            .map_err(|e| RegistryError::Invalid(e.to_string()))?;
        let mut capabilities = self.capabilities.write();
        if capabilities.contains_key(&info.id) {
            return Err(RegistryError::AlreadyExists(info.id));
        }
        debug!(capability_id = %info.id, kind = capability.kind(), "capability added");
        capabilities.insert(info.id, capability);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<RegisteredCapability, RegistryError> {
        self.capabilities
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    async fn remove(&self, id: &str) -> Result<(), RegistryError> {
        self.capabilities
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capability_types::{
        BaseCapability, CapabilityError, CapabilityInfo, CapabilityRequest, CapabilityResponse,
        CapabilityType, ExecutableCapability, WorkflowRegistration,
    };

    struct Noop(&'static str);

    impl BaseCapability for Noop {
        fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
            Ok(CapabilityInfo::local(self.0, CapabilityType::Action, ""))
        }
    }

    #[async_trait]
    impl ExecutableCapability for Noop {
        async fn execute(&self, _r: CapabilityRequest) -> Result<CapabilityResponse, CapabilityError> {
            Ok(CapabilityResponse { payload: vec![] })
        }

        async fn register_to_workflow(&self, _r: WorkflowRegistration) -> Result<(), CapabilityError> {
            Ok(())
        }

        async fn unregister_from_workflow(&self, _r: WorkflowRegistration) -> Result<(), CapabilityError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let registry = InMemoryCapabilityRegistry::new();
        let cap = RegisteredCapability::Executable(Arc::new(Noop("write@1.0.0")));

        registry.add(cap.clone()).await.unwrap();
        assert_eq!(
            registry.add(cap).await,
            Err(RegistryError::AlreadyExists("write@1.0.0".into()))
        );
        assert_eq!(registry.get("write@1.0.0").await.unwrap().kind(), "executable");

        registry.remove("write@1.0.0").await.unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get("write@1.0.0").await,
            Err(RegistryError::NotFound(_))
        ));
    }
}
