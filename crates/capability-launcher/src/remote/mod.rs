//! # Remote Capability Shims
//!
//! Proxies that make a capability served by another DON usable locally,
//! and servers that expose a local capability to other DONs. Every shim
//! receives its messages through the [`Dispatcher`](crate::ports::Dispatcher)
//! and is configured in place with `set_config`, so the launcher can
//! reconfigure a running shim when the registry changes.
//!
//! | Direction | Trigger              | Action / target      |
//! |-----------|----------------------|----------------------|
//! | consume   | [`TriggerSubscriber`] | [`ExecutableClient`] |
//! | expose    | [`TriggerPublisher`]  | [`ExecutableServer`] |

pub mod aggregation;
pub mod combined_client;
pub mod executable;
pub mod message_cache;
pub mod trigger_publisher;
pub mod trigger_subscriber;


pub use aggregation::{
    aggregate_mode_raw, build_aggregator, AggregationError, Aggregator, DefaultModeAggregator,
    ReportAggregator, ReportBatch, ReportSignature, SignedReport,
};
pub use combined_client::CombinedClient;
pub use executable::{
    hasher_for, ExecutableClient, ExecutableServer, MessageHasher, TransmissionConfig,
};
pub use message_cache::MessageCache;
pub use trigger_publisher::TriggerPublisher;
pub use trigger_subscriber::TriggerSubscriber;
