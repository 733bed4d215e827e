//! Bucket and index provisioning.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::BucketNames;
use crate::domain::ExecutionState;
use crate::domain::job::fields;
use crate::error::Result;
use crate::ports::{BucketConfig, Filter, IndexSpec, KvStore, StoreError};

/// Unique index on `Workflow.name`.
pub const WORKFLOW_NAME_INDEX: &str = "workflow_name";

/// Unique index on `(Job.workflow_uuid, Job.target)` over active jobs.
pub const JOB_TARGET_INDEX: &str = "job_target";

pub struct SchemaManager {
    store: Arc<dyn KvStore>,
    buckets: BucketNames,
}

impl SchemaManager {
    pub fn new(store: Arc<dyn KvStore>, buckets: BucketNames) -> Self {
        Self { store, buckets }
    }

    /// Declarations for the three buckets.
    pub fn bucket_configs(&self) -> Vec<BucketConfig> {
        let active: Vec<Value> = ExecutionState::active_states()
            .iter()
            .map(|s| Value::from(s.as_str()))
            .collect();

        vec![
            BucketConfig::new(&self.buckets.workflows)
                .index(IndexSpec::unique(WORKFLOW_NAME_INDEX, ["name"])),
            BucketConfig::new(&self.buckets.jobs)
                .index(
                    IndexSpec::unique(JOB_TARGET_INDEX, [fields::WORKFLOW_UUID, fields::TARGET])
                        .scoped(Filter::any_of(fields::EXECUTION, active)),
                )
                .index(IndexSpec::secondary(fields::EXECUTION))
                .index(IndexSpec::secondary(fields::EXEC_AFTER))
                .index(IndexSpec::secondary(fields::WORKFLOW_UUID))
                .index(IndexSpec::secondary(fields::RUNNER_ID)),
            BucketConfig::new(&self.buckets.runners).index(IndexSpec::secondary("active_at")),
        ]
    }

    /// Create every missing bucket. Existing buckets are left as they are.
    pub async fn ensure_schema(&self) -> Result<()> {
        for config in self.bucket_configs() {
            let name = config.name.clone();
            if self.store.bucket_exists(&name).await? {
                debug!(bucket = %name, "bucket already exists");
                continue;
            }
            match self.store.create_bucket(config).await {
                Ok(()) => info!(bucket = %name, "created bucket"),
                // Another backend won the race between our check and create.
                Err(StoreError::BucketExists(_)) => debug!(bucket = %name, "bucket created concurrently"),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub async fn bucket_exists(&self, name: &str) -> Result<bool> {
        Ok(self.store.bucket_exists(name).await?)
    }

    /// Teardown: delete each of the three buckets that exists.
    pub async fn drop_schema(&self) -> Result<()> {
        for name in self.buckets.all() {
            if !self.store.bucket_exists(name).await? {
                continue;
            }
            match self.store.delete_bucket(name).await {
                Ok(()) => info!(bucket = %name, "deleted bucket"),
                Err(StoreError::BucketNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
