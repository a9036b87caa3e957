//! Service supervision seam.
//!
//! The engine never starts daemons itself; it asks a [`ServiceSupervisor`]
//! to (re)configure and (re)start a service and to probe its health.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use stratum_placement::{ServiceName, ServicePlacement};
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// Supervisor errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    /// Service could not be configured or started
    #[error("Activation of {service} failed: {reason}")]
    ActivationFailed {
        /// Service
        service: ServiceName,
        /// Cause reported by the supervisor
        reason: String,
    },

    /// Supervisor itself could not run
    #[error("Supervisor unavailable: {0}")]
    Unavailable(String),
}

/// Health of a supervised service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceHealth {
    /// Not running
    Stopped,
    /// Started, not yet serving
    Starting,
    /// Live and serving
    Live,
    /// Crashed or unhealthy
    Failed(String),
}

impl ServiceHealth {
    /// Whether the service is serving
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

/// Starts services and probes their health
#[async_trait]
pub trait ServiceSupervisor: Send + Sync {
    /// Apply `placement` and (re)start its service
    ///
    /// # Errors
    ///
    /// Returns error if the service could not be configured or started
    async fn activate(&self, placement: &ServicePlacement) -> Result<(), SupervisorError>;

    /// Probe the service
    async fn health(&self, service: ServiceName) -> ServiceHealth;
}

#[derive(Debug, Clone)]
struct Started {
    at: Instant,
    placement: ServicePlacement,
}

/// In-memory supervisor with configurable startup time and failure
/// injection
pub struct SimulatedSupervisor {
    startup_delay: Duration,
    activation_delay: Duration,
    started: Arc<RwLock<HashMap<ServiceName, Started>>>,
    failures: Arc<RwLock<HashMap<ServiceName, String>>>,
    activations: Arc<RwLock<Vec<ServicePlacement>>>,
}

impl SimulatedSupervisor {
    /// Create a supervisor whose services are live immediately
    #[must_use]
    pub fn new() -> Self {
        Self {
            startup_delay: Duration::ZERO,
            activation_delay: Duration::ZERO,
            started: Arc::new(RwLock::new(HashMap::new())),
            failures: Arc::new(RwLock::new(HashMap::new())),
            activations: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Time between activation and the service reporting live
    #[must_use]
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Time `activate` itself takes
    #[must_use]
    pub fn with_activation_delay(mut self, delay: Duration) -> Self {
        self.activation_delay = delay;
        self
    }

    /// Make every activation of `service` fail with `reason`
    pub async fn fail_with(&self, service: ServiceName, reason: impl Into<String>) {
        self.failures.write().await.insert(service, reason.into());
    }

    /// Stop injecting failures for `service`
    pub async fn clear_failure(&self, service: ServiceName) {
        self.failures.write().await.remove(&service);
    }

    /// Number of activations attempted, successful or not
    pub async fn activation_count(&self) -> usize {
        self.activations.read().await.len()
    }

    /// Placements passed to `activate`, in order
    pub async fn activations(&self) -> Vec<ServicePlacement> {
        self.activations.read().await.clone()
    }

    /// Placement the running service was last started with
    pub async fn running_placement(&self, service: ServiceName) -> Option<ServicePlacement> {
        self.started
            .read()
            .await
            .get(&service)
            .map(|s| s.placement.clone())
    }
}

impl Default for SimulatedSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceSupervisor for SimulatedSupervisor {
    async fn activate(&self, placement: &ServicePlacement) -> Result<(), SupervisorError> {
        let service = placement.service();
        self.activations.write().await.push(placement.clone());
        if !self.activation_delay.is_zero() {
            tokio::time::sleep(self.activation_delay).await;
        }

        if let Some(reason) = self.failures.read().await.get(&service).cloned() {
            self.started.write().await.remove(&service);
            return Err(SupervisorError::ActivationFailed { service, reason });
        }

        self.started.write().await.insert(
            service,
            Started {
                at: Instant::now(),
                placement: placement.clone(),
            },
        );
        debug!(service = %service, "simulated activation");
        Ok(())
    }

    async fn health(&self, service: ServiceName) -> ServiceHealth {
        match self.started.read().await.get(&service) {
            None => ServiceHealth::Stopped,
            Some(started) if started.at.elapsed() >= self.startup_delay => ServiceHealth::Live,
            Some(_) => ServiceHealth::Starting,
        }
    }
}

/// Exit code a health hook uses for "starting"
pub const HOOK_STARTING_CODE: i32 = 2;

/// Supervisor that delegates to an external program
///
/// The program is invoked as `<program> activate <service> <payload>` and
/// `<program> health <service>`. Activation succeeds on exit status 0.
/// Health maps exit 0 to live, [`HOOK_STARTING_CODE`] to starting and
/// anything else to stopped. A hook whose call is abandoned, for example
/// on an activation timeout, is killed.
#[derive(Debug, Clone)]
pub struct HookSupervisor {
    program: PathBuf,
}

impl HookSupervisor {
    /// Create a supervisor driving `program`
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Hook program path
    #[must_use]
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

#[async_trait]
impl ServiceSupervisor for HookSupervisor {
    async fn activate(&self, placement: &ServicePlacement) -> Result<(), SupervisorError> {
        let service = placement.service();
        let payload = placement
            .encode()
            .map_err(|e| SupervisorError::Unavailable(e.to_string()))?;

        let output = Command::new(&self.program)
            .arg("activate")
            .arg(service.as_str())
            .arg(&payload)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SupervisorError::Unavailable(format!("{}: {}", self.program.display(), e)))?;

        if output.status.success() {
            info!(service = %service, hook = %self.program.display(), "hook activated service");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                format!("hook exited with {}", output.status)
            } else {
                stderr
            };
            Err(SupervisorError::ActivationFailed { service, reason })
        }
    }

    async fn health(&self, service: ServiceName) -> ServiceHealth {
        let status = Command::new(&self.program)
            .arg("health")
            .arg(service.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(status) => match status.code() {
                Some(0) => ServiceHealth::Live,
                Some(HOOK_STARTING_CODE) => ServiceHealth::Starting,
                _ => ServiceHealth::Stopped,
            },
            Err(e) => ServiceHealth::Failed(e.to_string()),
        }
    }
}
