//! Launcher metrics adapters.
//!
//! - `NoopLauncherMetrics` - discards everything
//! - `PrometheusLauncherMetrics` - process-wide counters (requires "metrics" feature)

use crate::domain::WiringResult;
use crate::ports::LauncherMetrics;

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLauncherMetrics;

impl LauncherMetrics for NoopLauncherMetrics {
    fn record_remote_capability_added(&self, _capability_id: &str, _don_name: &str, _result: WiringResult) {}

    fn record_local_capability_exposed(&self, _capability_id: &str, _result: WiringResult) {}

    fn increment_completed_updates(&self) {}
}

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use super::*;
    use capability_telemetry::{
        metric_inc, COMPLETED_UPDATES, LOCAL_CAPABILITY_EXPOSED, REMOTE_CAPABILITY_ADDED,
    };

    /// Writes to the counters registered by `capability_telemetry::register_metrics`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct PrometheusLauncherMetrics;

    impl LauncherMetrics for PrometheusLauncherMetrics {
        fn record_remote_capability_added(&self, capability_id: &str, don_name: &str, result: WiringResult) {
            metric_inc!(
                REMOTE_CAPABILITY_ADDED,
                &[capability_id, don_name, result.as_str()]
            );
        }

        fn record_local_capability_exposed(&self, capability_id: &str, result: WiringResult) {
            metric_inc!(LOCAL_CAPABILITY_EXPOSED, &[capability_id, result.as_str()]);
        }

        fn increment_completed_updates(&self) {
            metric_inc!(COMPLETED_UPDATES);
        }
    }

}

#[cfg(feature = "metrics")]
pub use prometheus_metrics::PrometheusLauncherMetrics;
