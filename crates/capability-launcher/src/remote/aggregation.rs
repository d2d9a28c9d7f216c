//! # Trigger Event Aggregation
//!
//! A trigger subscriber receives the same event from several members of
//! the remote DON and hands exactly one response to the workflow engine.
//!
//! - [`DefaultModeAggregator`]: the most common payload, once seen
//!   `min_identical` times.
//! - [`ReportAggregator`]: streams reports. Per feed, the newest report
//!   carrying enough distinct known signers wins. The signed variant also
//!   drops reports older than a max age.
//!
//! Signatures are matched by signer address only; verifying them is the
//! report consumer's job.

use crate::domain::{AggregationPolicy, SignerAddress};
use capability_types::{TriggerEvent, TriggerResponse};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("not enough identical responses: got {got}, need {required}")]
    NotEnoughResponses { got: u32, required: u32 },

    #[error("failed to decode response: {0}")]
    Codec(String),

    #[error("no report reached the signer threshold")]
    NoValidReport,
}

pub trait Aggregator: Send + Sync + fmt::Debug {
    fn aggregate(
        &self,
        trigger_event_id: &str,
        responses: &[Vec<u8>],
    ) -> Result<TriggerResponse, AggregationError>;
}

/// Build the aggregator for a policy picked by the launcher.
pub fn build_aggregator(policy: AggregationPolicy) -> Arc<dyn Aggregator> {
    match policy {
        AggregationPolicy::DefaultMode { min_identical } => {
            Arc::new(DefaultModeAggregator::new(min_identical))
        }
        AggregationPolicy::LegacyReport {
            signers,
            min_signers,
        } => Arc::new(ReportAggregator::legacy(signers, min_signers)),
        AggregationPolicy::SignedReport {
            signers,
            min_signers,
            max_age,
        } => Arc::new(ReportAggregator::signed(signers, min_signers, max_age)),
    }
}

/// The most frequent element, if it occurs at least `min_identical` times.
///
/// Ties go to the lexicographically smallest element so every node picks
/// the same one.
pub fn aggregate_mode_raw(
    elements: &[Vec<u8>],
    min_identical: u32,
) -> Result<Vec<u8>, AggregationError> {
    let mut counts: BTreeMap<&[u8], u32> = BTreeMap::new();
    for e in elements {
        *counts.entry(e.as_slice()).or_default() += 1;
    }
    let mut best: Option<(&[u8], u32)> = None;
    for (payload, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((payload, count));
        }
    }
    match best {
        Some((payload, count)) if count >= min_identical => Ok(payload.to_vec()),
        Some((_, count)) => Err(AggregationError::NotEnoughResponses {
            got: count,
            required: min_identical,
        }),
        None => Err(AggregationError::NotEnoughResponses {
            got: 0,
            required: min_identical,
        }),
    }
}

// =============================================================================
// DEFAULT MODE
// =============================================================================

#[derive(Debug, Clone)]
pub struct DefaultModeAggregator {
    min_identical: u32,
}

impl DefaultModeAggregator {
    pub fn new(min_identical: u32) -> Self {
        Self { min_identical }
    }
}

impl Aggregator for DefaultModeAggregator {
    fn aggregate(
        &self,
        _trigger_event_id: &str,
        responses: &[Vec<u8>],
    ) -> Result<TriggerResponse, AggregationError> {
        let raw = aggregate_mode_raw(responses, self.min_identical)?;
        serde_json::from_slice(&raw).map_err(|e| AggregationError::Codec(e.to_string()))
    }
}

// =============================================================================
// STREAMS REPORTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSignature {
    pub signer: SignerAddress,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedReport {
    pub feed_id: String,
    /// Unix seconds.
    pub observation_timestamp: u64,
    pub report: Vec<u8>,
    pub signatures: Vec<ReportSignature>,
}

/// Event payload of a streams trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportBatch {
    pub reports: Vec<SignedReport>,
}

#[derive(Debug, Clone)]
pub struct ReportAggregator {
    signers: HashSet<SignerAddress>,
    min_signers: u32,
    /// `None` for the legacy format, which has no staleness bound.
    max_age: Option<Duration>,
}

impl ReportAggregator {
    pub fn legacy(signers: Vec<SignerAddress>, min_signers: u32) -> Self {
        Self {
            signers: signers.into_iter().collect(),
            min_signers,
            max_age: None,
        }
    }

    pub fn signed(signers: Vec<SignerAddress>, min_signers: u32, max_age: Duration) -> Self {
        Self {
            signers: signers.into_iter().collect(),
            min_signers,
            max_age: Some(max_age),
        }
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    fn known_signers(&self, report: &SignedReport) -> usize {
        report
            .signatures
            .iter()
            .map(|s| s.signer)
            .filter(|s| self.signers.contains(s))
            .collect::<HashSet<_>>()
            .len()
    }

    /// Aggregate as of `now_secs`.
    pub fn aggregate_at(
        &self,
        trigger_event_id: &str,
        responses: &[Vec<u8>],
        now_secs: u64,
    ) -> Result<TriggerResponse, AggregationError> {
        let mut latest: BTreeMap<String, SignedReport> = BTreeMap::new();

        for raw in responses {
            let response: TriggerResponse = serde_json::from_slice(raw)
                .map_err(|e| AggregationError::Codec(e.to_string()))?;
            let batch: ReportBatch = match serde_json::from_slice(&response.event.payload) {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping undecodable report batch");
                    continue;
                }
            };
            for report in batch.reports {
                if self.known_signers(&report) < self.min_signers as usize {
                    continue;
                }
                if let Some(max_age) = self.max_age {
                    if now_secs.saturating_sub(report.observation_timestamp) > max_age.as_secs() {
                        continue;
                    }
                }
                let newer = latest
                    .get(&report.feed_id)
                    .map_or(true, |r| report.observation_timestamp > r.observation_timestamp);
                if newer {
                    latest.insert(report.feed_id.clone(), report);
                }
            }
        }

        if latest.is_empty() {
            return Err(AggregationError::NoValidReport);
        }
        let batch = ReportBatch {
            reports: latest.into_values().collect(),
        };
        let payload =
            serde_json::to_vec(&batch).map_err(|e| AggregationError::Codec(e.to_string()))?;
        Ok(TriggerResponse {
            event: TriggerEvent {
                id: trigger_event_id.to_string(),
                payload,
            },
            error: None,
        })
    }
}

impl Aggregator for ReportAggregator {
    fn aggregate(
        &self,
        trigger_event_id: &str,
        responses: &[Vec<u8>],
    ) -> Result<TriggerResponse, AggregationError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.aggregate_at(trigger_event_id, responses, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: &str, payload: &[u8]) -> Vec<u8> {
        serde_json::to_vec(&TriggerResponse {
            event: TriggerEvent {
                id: id.to_string(),
                payload: payload.to_vec(),
            },
            error: None,
        })
        .unwrap()
    }

    fn signer(b: u8) -> SignerAddress {
        [b; 20]
    }

    fn report(feed: &str, ts: u64, signers: &[u8]) -> SignedReport {
        SignedReport {
            feed_id: feed.to_string(),
            observation_timestamp: ts,
            report: format!("{}-{}", feed, ts).into_bytes(),
            signatures: signers
                .iter()
                .map(|b| ReportSignature {
                    signer: signer(*b),
                    signature: vec![*b],
                })
                .collect(),
        }
    }

    fn batch_response(reports: Vec<SignedReport>) -> Vec<u8> {
        response("ev-1", &serde_json::to_vec(&ReportBatch { reports }).unwrap())
    }

    #[test]
    fn test_mode_picks_majority() {
        let elems = vec![b"a".to_vec(), b"b".to_vec(), b"a".to_vec()];
        assert_eq!(aggregate_mode_raw(&elems, 2).unwrap(), b"a".to_vec());
        assert_eq!(
            aggregate_mode_raw(&elems, 3).unwrap_err(),
            AggregationError::NotEnoughResponses { got: 2, required: 3 }
        );
        assert!(aggregate_mode_raw(&[], 1).is_err());
    }

    #[test]
    fn test_mode_tie_is_deterministic() {
        let elems = vec![b"b".to_vec(), b"a".to_vec()];
        assert_eq!(aggregate_mode_raw(&elems, 1).unwrap(), b"a".to_vec());
    }

    #[test]
    fn test_default_mode_decodes_response() {
        let agg = DefaultModeAggregator::new(2);
        let r = response("ev-1", b"x");
        let out = agg.aggregate("ev-1", &[r.clone(), r]).unwrap();
        assert_eq!(out.event.payload, b"x".to_vec());
    }

    #[test]
    fn test_default_mode_rejects_garbage() {
        let agg = DefaultModeAggregator::new(1);
        assert!(matches!(
            agg.aggregate("ev-1", &[b"not json".to_vec()]),
            Err(AggregationError::Codec(_))
        ));
    }

    #[test]
    fn test_legacy_reports_need_known_signers() {
        let agg = ReportAggregator::legacy(vec![signer(1), signer(2), signer(3)], 2);
        let responses = vec![
            // one known signer plus an outsider
            batch_response(vec![report("feed-a", 10, &[1, 9])]),
            batch_response(vec![report("feed-b", 10, &[1, 2])]),
        ];
        let out = agg.aggregate_at("ev-1", &responses, 1_000).unwrap();
        let batch: ReportBatch = serde_json::from_slice(&out.event.payload).unwrap();
        assert_eq!(batch.reports.len(), 1);
        assert_eq!(batch.reports[0].feed_id, "feed-b");
        assert_eq!(out.event.id, "ev-1");
    }

    #[test]
    fn test_reports_keep_newest_per_feed() {
        let agg = ReportAggregator::legacy(vec![signer(1), signer(2)], 2);
        let responses = vec![
            batch_response(vec![report("feed-a", 10, &[1, 2])]),
            batch_response(vec![report("feed-a", 20, &[1, 2])]),
        ];
        let out = agg.aggregate_at("ev-1", &responses, 1_000).unwrap();
        let batch: ReportBatch = serde_json::from_slice(&out.event.payload).unwrap();
        assert_eq!(batch.reports[0].observation_timestamp, 20);
    }

    #[test]
    fn test_signed_reports_drop_stale() {
        let agg = ReportAggregator::signed(vec![signer(1), signer(2)], 2, Duration::from_secs(120));
        let responses = vec![batch_response(vec![report("feed-a", 100, &[1, 2])])];
        assert!(agg.aggregate_at("ev-1", &responses, 200).is_ok());
        assert_eq!(
            agg.aggregate_at("ev-1", &responses, 221).unwrap_err(),
            AggregationError::NoValidReport
        );
    }

    #[test]
    fn test_duplicate_signatures_count_once() {
        let agg = ReportAggregator::legacy(vec![signer(1), signer(2)], 2);
        let responses = vec![batch_response(vec![report("feed-a", 10, &[1, 1])])];
        assert_eq!(
            agg.aggregate_at("ev-1", &responses, 0).unwrap_err(),
            AggregationError::NoValidReport
        );
    }

    #[test]
    fn test_build_from_policy() {
        let agg = build_aggregator(AggregationPolicy::DefaultMode { min_identical: 1 });
        let out = agg.aggregate("ev", &[response("ev", b"p")]).unwrap();
        assert_eq!(out.event.payload, b"p".to_vec());
    }
}
