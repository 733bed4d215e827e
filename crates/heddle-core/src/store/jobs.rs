//! Jobs bucket: creation, reads, and the completion path.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use super::decode;
use crate::domain::job::fields;
use crate::domain::{ExecutionState, Job, JobId, JobOutcome, NewJob, RunnerId};
use crate::error::{BackendError, Result};
use crate::ports::{
    Clock, Filter, FindOptions, IdGenerator, KvStore, PutCondition, SortKey, StoreError,
};

pub struct JobStore {
    store: Arc<dyn KvStore>,
    bucket: String,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    max_write_attempts: u32,
}

impl JobStore {
    pub fn new(
        store: Arc<dyn KvStore>,
        bucket: impl Into<String>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        max_write_attempts: u32,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            ids,
            clock,
            max_write_attempts: max_write_attempts.max(1),
        }
    }

    /// Persist a new queued job.
    ///
    /// Fails with `DuplicateTarget` while another queued/running job of the same
    /// workflow has the same target, whatever the params.
    pub async fn create(&self, new: NewJob) -> Result<Job> {
        let job = new.into_job(self.ids.generate_job_id(), self.clock.now());

        let doc = serde_json::to_value(&job)?;
        match self
            .store
            .put_object(&self.bucket, &job.uuid.key(), doc, PutCondition::Absent)
            .await
        {
            Ok(_) => {
                info!(job = %job.uuid, workflow = %job.workflow_uuid, target = %job.target, "created job");
                Ok(job)
            }
            Err(StoreError::UniqueViolation { .. }) => Err(BackendError::DuplicateTarget {
                workflow: job.workflow_uuid,
                target: job.target,
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, uuid: JobId) -> Result<Job> {
        let object = self
            .store
            .get_object(&self.bucket, &uuid.key())
            .await?
            .ok_or_else(|| BackendError::job_not_found(uuid))?;
        decode(object.value)
    }

    /// Read one persisted field in a single round trip.
    ///
    /// The store projects the field server-side; the chain never leaves the store
    /// and nothing is decoded into a `Job`. `Ok(None)` means the job exists but
    /// the field is unset.
    pub async fn get_property(&self, uuid: JobId, name: &str) -> Result<Option<Value>> {
        let mut projected = self
            .store
            .get_fields(&self.bucket, &uuid.key(), &[name])
            .await?
            .ok_or_else(|| BackendError::job_not_found(uuid))?;
        Ok(projected.remove(name))
    }

    /// Record the terminal outcome reported by the runner holding the job.
    pub async fn finish(&self, uuid: JobId, runner: &RunnerId, outcome: JobOutcome) -> Result<Job> {
        let to = ExecutionState::from(outcome);
        let job = self
            .transition(uuid, |job, now| {
                if job.runner_id.as_ref() != Some(runner) {
                    return Err(BackendError::NotOwner {
                        job: job.uuid,
                        runner: runner.clone(),
                    });
                }
                if job.execution != ExecutionState::Running {
                    return Err(BackendError::InvalidTransition {
                        job: job.uuid,
                        from: job.execution,
                        to,
                    });
                }
                job.finish(to, now);
                Ok(())
            })
            .await?;
        info!(job = %job.uuid, runner = %runner, execution = %job.execution, "job finished");
        Ok(job)
    }

    /// Cancel a job nobody has claimed yet.
    pub async fn cancel(&self, uuid: JobId) -> Result<Job> {
        let job = self
            .transition(uuid, |job, now| {
                if !job.execution.is_runnable() {
                    return Err(BackendError::InvalidTransition {
                        job: job.uuid,
                        from: job.execution,
                        to: ExecutionState::Canceled,
                    });
                }
                job.finish(ExecutionState::Canceled, now);
                Ok(())
            })
            .await?;
        info!(job = %job.uuid, "job canceled");
        Ok(job)
    }

    /// Jobs in one state, earliest `exec_after` first.
    pub async fn list_by_execution(
        &self,
        execution: ExecutionState,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Job>> {
        let options = FindOptions::sorted_by([SortKey::asc(fields::EXEC_AFTER), SortKey::insertion()])
            .offset(offset)
            .limit(limit);
        self.store
            .find_objects(
                &self.bucket,
                &Filter::eq(fields::EXECUTION, execution.as_str()),
                &options,
            )
            .await?
            .into_iter()
            .map(|o| decode(o.value))
            .collect()
    }

    /// Read, check, write guarded by the etag that was read.
    ///
    /// Losing the etag race re-reads so `check` always sees the latest owner.
    async fn transition<F>(&self, uuid: JobId, mut check: F) -> Result<Job>
    where
        F: FnMut(&mut Job, chrono::DateTime<chrono::Utc>) -> Result<()>,
    {
        let key = uuid.key();
        let mut last_conflict = None;
        for attempt in 1..=self.max_write_attempts {
            let object = self
                .store
                .get_object(&self.bucket, &key)
                .await?
                .ok_or_else(|| BackendError::job_not_found(uuid))?;
            let mut job: Job = decode(object.value)?;
            check(&mut job, self.clock.now())?;

            let doc = serde_json::to_value(&job)?;
            match self
                .store
                .put_object(&self.bucket, &key, doc, PutCondition::Matches(object.etag))
                .await
            {
                Ok(_) => return Ok(job),
                Err(conflict @ StoreError::EtagConflict { .. }) => {
                    debug!(job = %uuid, attempt, "job changed underneath; re-reading");
                    last_conflict = Some(conflict);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_conflict
            .map(BackendError::Store)
            .unwrap_or_else(|| BackendError::job_not_found(uuid)))
    }
}
