//! # Capability Node Runtime
//!
//! Runs the capabilities launcher of one node.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (logging, metrics registry, metrics endpoint)
//! 2. Load node configuration from the environment
//! 3. Load the launcher TOML file, if any
//! 4. Start the node (dispatcher, launcher, registry update worker)
//! 5. Apply the registry snapshot, if any
//! 6. Run until Ctrl+C, then shut down in reverse order
//!
//! See `container::config` for the `CAP_*` variables read in step 2 and
//! `capability_telemetry` for the ones read in step 1.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use capability_launcher::adapters::{InMemoryNetwork, StaticConfigProvider, TomlConfigProvider};
use capability_launcher::ConfigProvider;
use capability_telemetry::{init_telemetry, serve_metrics, TelemetryConfig};
use node_runtime::{load_snapshot, CapabilityNode, NodeConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

fn config_provider(config: &NodeConfig) -> Result<Box<dyn ConfigProvider>> {
    match &config.launcher_config {
        Some(path) => {
            let provider = TomlConfigProvider::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            info!(path = %path.display(), "loaded launcher configuration");
            Ok(Box::new(provider))
        }
        None => Ok(Box::new(StaticConfigProvider::default())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    let _guard = init_telemetry(&telemetry)?;

    let metrics_shutdown = CancellationToken::new();
    if let Some(port) = telemetry.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let shutdown = metrics_shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(addr, shutdown).await {
                error!(error = %e, "metrics endpoint stopped");
            }
        });
    }

    let config = NodeConfig::from_env()?;
    let launcher_config = config_provider(&config)?.launcher_config();

    let network = InMemoryNetwork::new();
    let node = CapabilityNode::new(config.clone(), launcher_config, &network);
    node.start().await?;

    if let Some(path) = &config.registry_snapshot {
        let snapshot = load_snapshot(path)?;
        info!(
            dons = snapshot.ids_to_dons.len(),
            capabilities = snapshot.ids_to_capabilities.len(),
            "applying registry snapshot"
        );
        node.apply(snapshot).await?;
    }

    info!("node is running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    node.shutdown().await;
    metrics_shutdown.cancel();
    Ok(())
}
