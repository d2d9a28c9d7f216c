//! DON membership notifications.

use capability_launcher::DonNotifier;
use capability_types::DonInfo;
use parking_lot::RwLock;
use tracing::info;

/// Remembers the workflow DON the launcher last reported.
#[derive(Default)]
pub struct WorkflowDonNotifier {
    current: RwLock<Option<DonInfo>>,
}

impl WorkflowDonNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<DonInfo> {
        self.current.read().clone()
    }
}

impl DonNotifier for WorkflowDonNotifier {
    fn notify_don_set(&self, don: DonInfo) {
        let mut current = self.current.write();
        if current.as_ref() != Some(&don) {
            info!(don_id = don.id, members = don.members.len(), f = don.f, "workflow DON set");
        }
        *current = Some(don);
    }
}
