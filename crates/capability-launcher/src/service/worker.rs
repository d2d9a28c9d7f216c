//! # Registry Update Worker
//!
//! Feeds snapshots from the registry synchronizer to a [`RegistryListener`]
//! one at a time. Snapshots that queue up while a pass runs are coalesced:
//! only the newest one is reconciled, since every snapshot is complete.

use crate::domain::LauncherError;
use crate::ports::RegistryListener;
use capability_types::RegistrySnapshot;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Handle for submitting snapshots to a [`RegistryUpdateWorker`].
#[derive(Clone)]
pub struct RegistryUpdateSender {
    tx: mpsc::Sender<Arc<RegistrySnapshot>>,
}

impl RegistryUpdateSender {
    /// Queue a snapshot, waiting for capacity.
    pub async fn send(&self, snapshot: Arc<RegistrySnapshot>) -> Result<(), LauncherError> {
        self.tx.send(snapshot).await.map_err(|_| LauncherError::Closed)
    }

    /// Queue a snapshot without waiting. A full queue drops the snapshot
    /// and returns `Ok(false)`.
    pub fn try_send(&self, snapshot: Arc<RegistrySnapshot>) -> Result<bool, LauncherError> {
        match self.tx.try_send(snapshot) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(LauncherError::Closed),
        }
    }
}

pub struct RegistryUpdateWorker {
    listener: Arc<dyn RegistryListener>,
    rx: mpsc::Receiver<Arc<RegistrySnapshot>>,
    cancel: CancellationToken,
}

impl RegistryUpdateWorker {
    pub fn new(
        listener: Arc<dyn RegistryListener>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, RegistryUpdateSender) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                listener,
                rx,
                cancel,
            },
            RegistryUpdateSender { tx },
        )
    }

    /// Run until cancelled or every sender is dropped. Returns the number of
    /// passes that completed.
    pub async fn run(mut self) -> usize {
        let mut passes = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.rx.recv() => next,
            };
            let Some(mut snapshot) = next else { break };
            let mut skipped = 0usize;
            while let Ok(newer) = self.rx.try_recv() {
                snapshot = newer;
                skipped += 1;
            }
            if skipped > 0 {
                debug!(skipped, "coalesced queued registry snapshots");
            }

            match self.listener.on_new_registry(snapshot, &self.cancel).await {
                Ok(report) => {
                    passes += 1;
                    debug!(
                        outcomes = report.outcomes.len(),
                        failures = report.failures().count(),
                        "registry update applied"
                    );
                }
                Err(LauncherError::Cancelled) => break,
                Err(e) => error!(error = %e, "registry update failed"),
            }
        }
        info!(passes, "registry update worker stopped");
        passes
    }
}
