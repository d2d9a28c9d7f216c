//! # Reconciliation Report
//!
//! Per-capability outcomes of one pass. The pass itself only fails on the
//! fatal errors in [`LauncherError`](super::LauncherError); everything else
//! ends up here.

use super::errors::WiringError;
use capability_types::DonId;

/// Which side of the wiring a capability was processed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remote capability wired for local workflows.
    Consume,
    /// Local capability exposed to remote workflow DONs.
    Expose,
}

/// Label values of the launcher counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WiringResult {
    Success,
    Failure,
    Skipped,
}

impl WiringResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Wired,
    /// `local_only` capability.
    Skipped,
    Failed(WiringError),
}

impl Outcome {
    pub fn result(&self) -> WiringResult {
        match self {
            Self::Wired => WiringResult::Success,
            Self::Skipped => WiringResult::Skipped,
            Self::Failed(_) => WiringResult::Failure,
        }
    }
}

#[derive(Debug)]
pub struct CapabilityOutcome {
    pub capability_id: String,
    pub don_id: DonId,
    pub direction: Direction,
    pub outcome: Outcome,
}

/// Everything a pass did, in processing order.
#[derive(Debug, Default)]
pub struct ReconciliationReport {
    pub outcomes: Vec<CapabilityOutcome>,
    /// Size of the flat peer set handed to the peer, if one is configured.
    pub peer_count: Option<usize>,
    /// Number of DON pairs handed to the shared peer, if one is configured.
    pub don_pair_count: Option<usize>,
}

impl ReconciliationReport {
    pub fn push(
        &mut self,
        capability_id: &str,
        don_id: DonId,
        direction: Direction,
        outcome: Outcome,
    ) {
        self.outcomes.push(CapabilityOutcome {
            capability_id: capability_id.to_string(),
            don_id,
            direction,
            outcome,
        });
    }

    pub fn count(&self, result: WiringResult) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.result() == result)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&CapabilityOutcome, &WiringError)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Outcome::Failed(e) => Some((o, e)),
            _ => None,
        })
    }

    /// Outcome for `capability_id` on the given side, if it was processed.
    pub fn outcome(&self, capability_id: &str, direction: Direction) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.capability_id == capability_id && o.direction == direction)
            .map(|o| &o.outcome)
    }
}
