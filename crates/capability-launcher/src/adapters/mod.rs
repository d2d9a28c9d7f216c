//! # Adapters
//!
//! In-process implementations of the outbound ports: a capability
//! registry, a dispatcher that routes between nodes in one process,
//! metrics sinks and config providers. The host node swaps in its own
//! transport-backed versions.

pub mod config;
pub mod dispatcher;
pub mod metrics;
pub mod registry;

pub use config::StaticConfigProvider;
#[cfg(feature = "toml-config")]
pub use config::{ConfigError, TomlConfigProvider};
pub use dispatcher::{InMemoryDispatcher, InMemoryNetwork};
#[cfg(feature = "metrics")]
pub use metrics::PrometheusLauncherMetrics;
pub use metrics::NoopLauncherMetrics;
pub use registry::InMemoryCapabilityRegistry;
