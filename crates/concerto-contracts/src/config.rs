//! Runtime configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Example:
//!
//! ```toml
//! [bus]
//! default_ttl_seconds = 300
//!
//! [communicator]
//! workers = 4
//! task_timeout_secs = 30
//! collaboration_timeout_secs = 60
//!
//! [workflow]
//! parallel_workers = 8
//! branch_timeout_secs = 300
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestraError, OrchestraResult};
use crate::message::DEFAULT_TTL_SECONDS;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub bus: BusConfig,
    pub communicator: CommunicatorConfig,
    pub orchestrator: OrchestratorConfig,
    pub workflow: WorkflowConfig,
}

impl RuntimeConfig {
    /// Parse a TOML document. Missing sections and fields take their defaults.
    pub fn from_toml_str(s: &str) -> OrchestraResult<Self> {
        let config: RuntimeConfig = toml::from_str(s).map_err(|e| OrchestraError::ConfigError {
            reason: format!("failed to parse runtime TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> OrchestraResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| OrchestraError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject values that would leave a component with no workers.
    pub fn validate(&self) -> OrchestraResult<()> {
        let pools = [
            ("communicator.workers", self.communicator.workers),
            ("orchestrator.collaboration_workers", self.orchestrator.collaboration_workers),
            ("workflow.parallel_workers", self.workflow.parallel_workers),
        ];
        for (name, workers) in pools {
            if workers == 0 {
                return Err(OrchestraError::ConfigError {
                    reason: format!("{} must be at least 1", name),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// TTL stamped on messages built by the communicator.
    pub default_ttl_seconds: u64,
    /// How long the dispatch worker sleeps waiting for work before re-checking shutdown.
    pub poll_interval_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            poll_interval_ms: 100,
        }
    }
}

impl BusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicatorConfig {
    pub workers: usize,
    pub task_timeout_secs: u64,
    pub collaboration_timeout_secs: u64,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            task_timeout_secs: 30,
            collaboration_timeout_secs: 60,
        }
    }
}

impl CommunicatorConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn collaboration_timeout(&self) -> Duration {
        Duration::from_secs(self.collaboration_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Workers that deliver collaboration offers in the background.
    pub collaboration_workers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { collaboration_workers: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub parallel_workers: usize,
    pub branch_timeout_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            parallel_workers: 8,
            branch_timeout_secs: 300,
        }
    }
}

impl WorkflowConfig {
    pub fn branch_timeout(&self) -> Duration {
        Duration::from_secs(self.branch_timeout_secs)
    }
}
