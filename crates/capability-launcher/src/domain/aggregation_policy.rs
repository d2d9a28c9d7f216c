//! # Trigger Aggregation Policy
//!
//! Chooses how a single-method trigger subscriber merges the events it
//! receives from the members of a remote DON.
//!
//! Streams triggers are recognised by their ID prefix; the major version
//! after the last `@` picks the report format:
//!
//! | ID | Aggregation |
//! |----|-------------|
//! | `streams-trigger@1.x.y` | legacy signed reports, `F + 1` known signers |
//! | `streams-trigger@2.x.y` | signed reports, `F + 1` signers, max age 120s |
//! | `streams-trigger@N.x.y` | rejected |
//! | anything else | `F + 1` identical payloads |

use super::errors::WiringError;
use capability_types::{DonInfo, RegistrySnapshot};
use std::time::Duration;

pub const STREAMS_TRIGGER_PREFIX: &str = "streams-trigger";

/// Oldest signed report the v2 streams aggregator accepts.
pub const SIGNED_REPORT_MAX_AGE: Duration = Duration::from_secs(120);

/// A 20-byte signer address.
pub type SignerAddress = [u8; 20];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationPolicy {
    /// Most common payload wins once it was seen `min_identical` times.
    DefaultMode { min_identical: u32 },
    LegacyReport {
        signers: Vec<SignerAddress>,
        min_signers: u32,
    },
    SignedReport {
        signers: Vec<SignerAddress>,
        min_signers: u32,
        max_age: Duration,
    },
}

/// Policy for a single-method trigger served by `remote_don`.
pub fn select_trigger_policy(
    capability_id: &str,
    remote_don: &DonInfo,
    snapshot: &RegistrySnapshot,
) -> Result<AggregationPolicy, WiringError> {
    let threshold = remote_don.threshold();
    if !capability_id.starts_with(STREAMS_TRIGGER_PREFIX) {
        return Ok(AggregationPolicy::DefaultMode {
            min_identical: threshold,
        });
    }

    let version = capability_version(capability_id)?;
    match version.major {
        1 => Ok(AggregationPolicy::LegacyReport {
            signers: signers(remote_don, snapshot)?,
            min_signers: threshold,
        }),
        2 => Ok(AggregationPolicy::SignedReport {
            signers: signers(remote_don, snapshot)?,
            min_signers: threshold,
            max_age: SIGNED_REPORT_MAX_AGE,
        }),
        _ => Err(WiringError::UnsupportedStreamTrigger(
            capability_id.to_string(),
        )),
    }
}

/// Parse the semantic version after the last `@` of a capability ID.
pub fn capability_version(capability_id: &str) -> Result<semver::Version, WiringError> {
    let suffix = capability_id
        .rsplit_once('@')
        .map(|(_, v)| v)
        .ok_or_else(|| WiringError::InvalidVersion {
            capability_id: capability_id.to_string(),
            reason: "missing '@' separator".to_string(),
        })?;
    semver::Version::parse(suffix).map_err(|e| WiringError::InvalidVersion {
        capability_id: capability_id.to_string(),
        reason: e.to_string(),
    })
}

/// Signer addresses of every member of `don`, in member order.
pub fn signers(
    don: &DonInfo,
    snapshot: &RegistrySnapshot,
) -> Result<Vec<SignerAddress>, WiringError> {
    don.members
        .iter()
        .map(|member| {
            snapshot
                .node(member)
                .map(|node| node.signer_address())
                .ok_or(WiringError::UnknownNode(*member))
        })
        .collect()
}
