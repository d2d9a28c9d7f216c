//! # Service Lifecycle
//!
//! Contract shared by every long-lived component the launcher owns: the
//! launcher itself and each shim it starts. Components are started once,
//! closed once, and report readiness and health on demand.
//!
//! ```rust,ignore
//! use capability_types::{Service, ServiceError, ServiceState};
//! use async_trait::async_trait;
//!
//! pub struct MyShim { state: ServiceState }
//!
//! #[async_trait]
//! impl Service for MyShim {
//!     fn name(&self) -> String { "MyShim".into() }
//!     async fn start(&self) -> Result<(), ServiceError> { self.state.start_once(&self.name()) }
//!     async fn close(&self) -> Result<(), ServiceError> { self.state.stop_once(&self.name()) }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Error type for service lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceError {
    /// Name of the service that failed.
    pub service: String,
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(
        service: impl Into<String>,
        kind: ServiceErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn not_configured(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service, ServiceErrorKind::NotConfigured, message)
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.service, self.kind, self.message)
    }
}

impl std::error::Error for ServiceError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceErrorKind {
    /// `start` called on a service that is running or stopped.
    AlreadyStarted,
    /// `close` called on a service that was never started or already closed.
    NotStarted,
    /// Required configuration missing at start.
    NotConfigured,
    StartFailed,
    CloseFailed,
    Unhealthy,
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStarted => write!(f, "AlreadyStarted"),
            Self::NotStarted => write!(f, "NotStarted"),
            Self::NotConfigured => write!(f, "NotConfigured"),
            Self::StartFailed => write!(f, "StartFailed"),
            Self::CloseFailed => write!(f, "CloseFailed"),
            Self::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Unstarted,
    Running,
    Stopped,
}

/// Per-component health, keyed by service name.
pub type HealthReport = BTreeMap<String, Result<(), ServiceError>>;

#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> String;

    async fn start(&self) -> Result<(), ServiceError>;

    async fn close(&self) -> Result<(), ServiceError>;

    fn ready(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    fn health_report(&self) -> HealthReport {
        let mut report = HealthReport::new();
        report.insert(self.name(), self.ready());
        report
    }
}

/// Start-once / stop-once guard.
#[derive(Debug, Default)]
pub struct ServiceState(AtomicU8);

const UNSTARTED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

impl ServiceState {
    pub fn new() -> Self {
        Self(AtomicU8::new(UNSTARTED))
    }

    pub fn start_once(&self, service: &str) -> Result<(), ServiceError> {
        self.0
            .compare_exchange(UNSTARTED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| {
                ServiceError::new(service, ServiceErrorKind::AlreadyStarted, "start called twice")
            })
    }

    /// Roll a failed start back so it can be retried.
    pub fn reset_start(&self) {
        let _ = self
            .0
            .compare_exchange(RUNNING, UNSTARTED, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn stop_once(&self, service: &str) -> Result<(), ServiceError> {
        self.0
            .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| {
                ServiceError::new(service, ServiceErrorKind::NotStarted, "close called while not running")
            })
    }

    pub fn status(&self) -> ServiceStatus {
        match self.0.load(Ordering::Acquire) {
            RUNNING => ServiceStatus::Running,
            STOPPED => ServiceStatus::Stopped,
            _ => ServiceStatus::Unstarted,
        }
    }

    pub fn ready(&self, service: &str) -> Result<(), ServiceError> {
        match self.status() {
            ServiceStatus::Running => Ok(()),
            status => Err(ServiceError::new(
                service,
                ServiceErrorKind::Unhealthy,
                format!("service is {:?}", status),
            )),
        }
    }
}
