//! Prometheus metrics for the capability launcher.
//!
//! All metrics follow the naming convention: `capabilities_launcher_<metric>_<unit>`
//!
//! ## Metrics Exported
//!
//! - `capabilities_launcher_remote_capability_added_total{capability_id, don_name, result}`
//! - `capabilities_launcher_local_capability_exposed_total{capability_id, result}`
//! - `capabilities_launcher_completed_updates_total`

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::TelemetryError;

lazy_static! {
    /// Registry the launcher metrics are gathered from
    pub static ref REGISTRY: Registry = Registry::new();

    /// Remote capabilities wired for local consumption, by outcome
    pub static ref REMOTE_CAPABILITY_ADDED: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "capabilities_launcher_remote_capability_added_total",
            "Remote capabilities processed for local consumption"
        ),
        &["capability_id", "don_name", "result"]  // result: success/failure/skipped
    ).expect("metric creation failed");

    /// Local capabilities exposed to remote DONs, by outcome
    pub static ref LOCAL_CAPABILITY_EXPOSED: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "capabilities_launcher_local_capability_exposed_total",
            "Local capabilities processed for remote exposure"
        ),
        &["capability_id", "result"]
    ).expect("metric creation failed");

    /// Reconciliation passes that ran to completion
    pub static ref COMPLETED_UPDATES: IntCounter = IntCounter::new(
        "capabilities_launcher_completed_updates_total",
        "Registry updates fully processed by the launcher"
    ).expect("metric creation failed");
}

/// Register all launcher metrics with [`REGISTRY`].
///
/// Idempotent: metrics that are already registered are left alone.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(REMOTE_CAPABILITY_ADDED.clone()),
        Box::new(LOCAL_CAPABILITY_EXPOSED.clone()),
        Box::new(COMPLETED_UPDATES.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Serve the text exposition on `addr` until `shutdown` fires.
///
/// Every request gets the full metrics page regardless of path.
pub async fn serve_metrics(
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), TelemetryError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| TelemetryError::MetricsServer(e.to_string()))?;
    tracing::info!(%addr, "metrics endpoint listening");

    loop {
        let (mut stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "metrics accept failed");
                    continue;
                }
            },
        };

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            // Request contents are irrelevant; drain what the client sent.
            let _ = stream.read(&mut buf).await;
            let body = encode_metrics().unwrap_or_default();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            if let Err(e) = stream.write_all(response.as_bytes()).await {
                tracing::debug!(%peer, error = %e, "metrics response failed");
            }
        });
    }
}
