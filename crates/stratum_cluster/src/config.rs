//! Cluster configuration.
//!
//! The cluster file names the local node, lists the members the protocol
//! may talk to and carries the deadlines used by dispatch, waiting and
//! activation. Every section except `local_node` and `members` is optional.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use stratum_core::{CoreError, CoreResult, NodeName};

/// A cluster member entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberConfig {
    /// Member name
    pub name: NodeName,
    /// Protocol address (`host:port`)
    pub address: String,
}

impl MemberConfig {
    /// Create a member entry
    #[must_use]
    pub fn new(name: NodeName, address: impl Into<String>) -> Self {
        Self {
            name,
            address: address.into(),
        }
    }
}

/// Dispatch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-node request deadline in milliseconds
    pub timeout_ms: u64,
}

impl DispatchConfig {
    /// Set the per-node deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Per-node deadline
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

/// Readiness wait configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Interval between status polls in milliseconds
    pub poll_interval_ms: u64,
    /// Default wait deadline in milliseconds
    pub deadline_ms: u64,
}

impl WaitConfig {
    /// Set the poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    /// Set the default deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }

    /// Poll interval
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Default deadline
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            deadline_ms: 120_000,
        }
    }
}

/// Per-node state machine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on a single supervisor activation in milliseconds
    pub activation_timeout_ms: u64,
    /// Upper bound on a single supervisor health probe in milliseconds
    pub health_timeout_ms: u64,
}

impl EngineConfig {
    /// Set the activation bound
    #[must_use]
    pub fn with_activation_timeout(mut self, timeout_ms: u64) -> Self {
        self.activation_timeout_ms = timeout_ms;
        self
    }

    /// Set the health probe bound
    #[must_use]
    pub fn with_health_timeout(mut self, timeout_ms: u64) -> Self {
        self.health_timeout_ms = timeout_ms;
        self
    }

    /// Activation bound
    #[must_use]
    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }

    /// Health probe bound
    #[must_use]
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            activation_timeout_ms: 60_000,
            health_timeout_ms: 5_000,
        }
    }
}

/// Cluster configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Member this process runs on (or, for the CLI, is attached to)
    pub local_node: NodeName,
    /// Known members
    pub members: Vec<MemberConfig>,
    /// Dispatch settings
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Readiness wait settings
    #[serde(default)]
    pub wait: WaitConfig,
    /// State machine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl ClusterConfig {
    /// Create a config for `local_node` with the given members
    #[must_use]
    pub fn new(local_node: NodeName, members: Vec<MemberConfig>) -> Self {
        Self {
            local_node,
            members,
            dispatch: DispatchConfig::default(),
            wait: WaitConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Replace the wait settings
    #[must_use]
    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    /// Replace the dispatch settings
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Parse and validate a JSON cluster file body
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or the config is inconsistent
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a cluster file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or fails validation
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path).map_err(|e| CoreError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json(&body)
    }

    /// Check internal consistency
    ///
    /// # Errors
    ///
    /// Returns error on duplicate members, a local node missing from the
    /// member list, or zero deadlines
    pub fn validate(&self) -> CoreResult<()> {
        let mut seen = HashSet::new();
        for member in &self.members {
            if !seen.insert(&member.name) {
                return Err(CoreError::validation(
                    "members",
                    format!("duplicate member {}", member.name),
                ));
            }
            if member.address.is_empty() {
                return Err(CoreError::validation(
                    "members",
                    format!("member {} has no address", member.name),
                ));
            }
        }
        if !seen.contains(&self.local_node) {
            return Err(CoreError::validation(
                "local_node",
                format!("{} is not a listed member", self.local_node),
            ));
        }
        if self.dispatch.timeout_ms == 0 {
            return Err(CoreError::validation("dispatch.timeout_ms", "must be positive"));
        }
        if self.wait.poll_interval_ms == 0 {
            return Err(CoreError::validation("wait.poll_interval_ms", "must be positive"));
        }
        if self.engine.activation_timeout_ms == 0 {
            return Err(CoreError::validation(
                "engine.activation_timeout_ms",
                "must be positive",
            ));
        }
        if self.engine.health_timeout_ms == 0 {
            return Err(CoreError::validation("engine.health_timeout_ms", "must be positive"));
        }
        Ok(())
    }

    /// Look up a member entry
    #[must_use]
    pub fn member(&self, name: &NodeName) -> Option<&MemberConfig> {
        self.members.iter().find(|m| &m.name == name)
    }
}
