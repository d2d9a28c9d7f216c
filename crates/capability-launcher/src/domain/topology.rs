//! # Topology Planner
//!
//! Decides which peers the node keeps connections to.
//!
//! Two models, selected by which transport is configured:
//!
//! - **Flat peer set** ([`peers`]): one physical peer connects to every
//!   member of every public DON that passes [`filter_don2don`].
//! - **DON pairs** ([`don_pairs_to_update`]): a shared peer maintains one
//!   channel per pair of DONs that need to talk (workflow DON to
//!   capability DON).
//!
//! Bootstrap nodes bypass the role filters in both models.

use super::classifier::families_overlap;
use capability_types::{Don, DonPair, PeerId, StreamConfig};
use std::collections::BTreeMap;
use tracing::warn;

/// Whether `candidate` is filtered out of the flat peer set.
///
/// Rules, first match wins:
/// 1. member of a workflow and a capability DON: keep everything
/// 2. member of neither: drop everything
/// 3. workflow-only: drop DONs without capability configurations
/// 4. capability-only: drop DONs that do not accept workflows
/// 5. keep
pub fn filter_don2don(
    belongs_to_capability_don: bool,
    belongs_to_workflow_don: bool,
    candidate: &Don,
) -> bool {
    match (belongs_to_capability_don, belongs_to_workflow_don) {
        (true, true) => false,
        (false, false) => {
            warn!(
                don_id = candidate.id(),
                "node belongs to neither a workflow nor a capability DON; filtering out all peers"
            );
            true
        }
        (false, true) => !candidate.exposes_capabilities(),
        (true, false) => !candidate.info.accepts_workflows,
    }
}

/// Flat peer set for the single-peer transport.
///
/// Walks the public DONs of `dons` (expected sorted) and adds every member
/// of the ones that survive [`filter_don2don`], each with `stream_config`.
pub fn peers(
    dons: &[&Don],
    belongs_to_capability_don: bool,
    belongs_to_workflow_don: bool,
    is_bootstrap: bool,
    stream_config: StreamConfig,
) -> BTreeMap<PeerId, StreamConfig> {
    let mut out = BTreeMap::new();
    for don in dons.iter().filter(|d| d.info.is_public) {
        if !is_bootstrap
            && filter_don2don(belongs_to_capability_don, belongs_to_workflow_don, don)
        {
            continue;
        }
        for member in &don.info.members {
            out.insert(*member, stream_config);
        }
    }
    out
}

/// DON pairs the shared-peer transport must connect.
///
/// Pairs are emitted in the traversal order of `dons` (`i < j`), so each
/// unordered pair appears at most once and never with itself. A pair is
/// kept when one side accepts workflows and the other exposes
/// capabilities, and their families overlap. Non-bootstrap nodes only
/// consider pairs they are a member of.
pub fn don_pairs_to_update(dons: &[&Don], me: &PeerId, is_bootstrap: bool) -> Vec<DonPair> {
    let mut pairs = Vec::new();
    for (i, a) in dons.iter().enumerate() {
        for b in &dons[i + 1..] {
            if !is_bootstrap && !a.info.contains(me) && !b.info.contains(me) {
                continue;
            }
            let connects = (a.info.accepts_workflows && b.exposes_capabilities())
                || (b.info.accepts_workflows && a.exposes_capabilities());
            if connects && families_overlap(&a.info.families, &b.info.families) {
                pairs.push(DonPair(a.info.clone(), b.info.clone()));
            }
        }
    }
    pairs
}
