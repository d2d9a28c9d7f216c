//! Shims the launcher created, one map per shim kind.
//!
//! A key is never mapped to two shims: a later pass finds the cached shim
//! and reconfigures it.

use crate::domain::ShimKey;
use crate::remote::{
    CombinedClient, ExecutableClient, ExecutableServer, TriggerPublisher, TriggerSubscriber,
};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct ShimCache {
    pub(crate) trigger_subscribers: HashMap<ShimKey, Arc<TriggerSubscriber>>,
    pub(crate) executable_clients: HashMap<ShimKey, Arc<ExecutableClient>>,
    pub(crate) combined_clients: HashMap<ShimKey, Arc<CombinedClient>>,
    pub(crate) trigger_publishers: HashMap<ShimKey, Arc<TriggerPublisher>>,
    pub(crate) executable_servers: HashMap<ShimKey, Arc<ExecutableServer>>,
}

impl ShimCache {
    pub(crate) fn len(&self) -> usize {
        self.trigger_subscribers.len()
            + self.executable_clients.len()
            + self.combined_clients.len()
            + self.trigger_publishers.len()
            + self.executable_servers.len()
    }

    pub(crate) fn clear(&mut self) {
        self.trigger_subscribers.clear();
        self.executable_clients.clear();
        self.combined_clients.clear();
        self.trigger_publishers.clear();
        self.executable_servers.clear();
    }
}
