//! # Domain Layer
//!
//! Pure planning logic: which DONs the node belongs to, which peers it
//! connects to, and how remote capabilities are keyed and aggregated.
//! Nothing here performs I/O.

pub mod aggregation_policy;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod report;
pub mod shim_key;
pub mod topology;

pub use aggregation_policy::{
    capability_version, select_trigger_policy, signers, AggregationPolicy, SignerAddress,
    SIGNED_REPORT_MAX_AGE, STREAMS_TRIGGER_PREFIX,
};
pub use classifier::{
    all_dons, families_overlap, filter_dons_by_families, public_dons, DonClassification,
};
pub use config::{
    LauncherConfig, DEFAULT_LAUNCHER_NAME, DEFAULT_MAX_PARALLEL_REQUESTS, DEFAULT_REQUEST_TIMEOUT,
};
pub use errors::{
    DispatcherError, LauncherError, RegistryError, ShimError, TransportError, WiringError,
};
pub use report::{CapabilityOutcome, Direction, Outcome, ReconciliationReport, WiringResult};
pub use shim_key::ShimKey;
pub use topology::{don_pairs_to_update, filter_don2don, peers};
