//! Backend configuration.
//!
//! Every section has defaults, so a config file only needs the runner identifier:
//!
//! ```json
//! { "runner": { "identifier": "worker-01" } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::RunnerId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub runner: RunnerConfig,
    pub buckets: BucketNames,
    pub dispatch: DispatchConfig,
    pub jobs: JobStoreConfig,
}

/// Identity this backend stamps on the jobs it claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub identifier: RunnerId,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            identifier: RunnerId::new("runner-0"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketNames {
    pub workflows: String,
    pub jobs: String,
    pub runners: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            workflows: "wf_workflows".to_string(),
            jobs: "wf_jobs".to_string(),
            runners: "wf_runners".to_string(),
        }
    }
}

impl BucketNames {
    pub fn all(&self) -> [&str; 3] {
        [self.workflows.as_str(), self.jobs.as_str(), self.runners.as_str()]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Candidates fetched per claim query.
    pub batch_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStoreConfig {
    /// Read-check-write cycles for completion / cancel before an etag race is reported.
    pub max_write_attempts: u32,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: 5,
        }
    }
}

impl BackendConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Same config with a different runner identity.
    pub fn for_runner(&self, identifier: impl Into<String>) -> Self {
        let mut config = self.clone();
        config.runner.identifier = RunnerId::new(identifier);
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.identifier.as_str().trim().is_empty() {
            return Err(ConfigError::Invalid("runner.identifier must not be empty".into()));
        }
        if self.dispatch.batch_size == 0 {
            return Err(ConfigError::Invalid("dispatch.batch_size must be > 0".into()));
        }
        if self.jobs.max_write_attempts == 0 {
            return Err(ConfigError::Invalid("jobs.max_write_attempts must be > 0".into()));
        }
        let names = self.buckets.all();
        if names.iter().any(|n| n.is_empty()) {
            return Err(ConfigError::Invalid("bucket names must not be empty".into()));
        }
        if names[0] == names[1] || names[1] == names[2] || names[0] == names[2] {
            return Err(ConfigError::Invalid("bucket names must be distinct".into()));
        }
        Ok(())
    }
}
