//! Factory - WorkflowSpec / JobSpec から Workflow / Job を作る
//!
//! 構造チェックをしてから各ストアに渡します。一意性チェックはストア側の仕事です。

use tracing::debug;

use crate::backend::Backend;
use crate::domain::{Job, JobSpec, NewJob, NewWorkflow, Task, Workflow, WorkflowSpec};
use crate::error::{BackendError, Result};

pub struct Factory<'a> {
    backend: &'a Backend,
}

impl<'a> Factory<'a> {
    pub fn new(backend: &'a Backend) -> Self {
        Self { backend }
    }

    pub async fn workflow(&self, spec: WorkflowSpec) -> Result<Workflow> {
        validate_workflow(&spec)?;
        self.backend
            .workflows()
            .await?
            .create(NewWorkflow {
                name: spec.name,
                chain: spec.chain,
                onerror: spec.onerror,
                timeout: spec.timeout,
            })
            .await
    }

    /// Queue a job; the workflow's chain is copied into it.
    pub async fn job(&self, spec: JobSpec) -> Result<Job> {
        if spec.target.trim().is_empty() {
            return Err(BackendError::Validation("job target must not be empty".into()));
        }
        let workflow = self.backend.get_workflow(spec.workflow).await?;
        debug!(workflow = %workflow.uuid, target = %spec.target, "creating job from workflow");

        self.backend
            .jobs()
            .await?
            .create(NewJob {
                workflow_uuid: workflow.uuid,
                name: workflow.name,
                target: spec.target,
                params: spec.params,
                chain: workflow.chain,
                onerror: workflow.onerror,
                timeout: workflow.timeout,
                exec_after: spec.exec_after,
            })
            .await
    }
}

fn validate_workflow(spec: &WorkflowSpec) -> Result<()> {
    if spec.name.trim().is_empty() {
        return Err(BackendError::Validation("workflow name must not be empty".into()));
    }
    if spec.chain.is_empty() {
        return Err(BackendError::Validation(format!(
            "workflow {:?} has an empty chain",
            spec.name
        )));
    }
    spec.chain
        .iter()
        .chain(spec.onerror.iter())
        .try_for_each(validate_task)
}

fn validate_task(task: &Task) -> Result<()> {
    if task.name.trim().is_empty() {
        return Err(BackendError::Validation("task name must not be empty".into()));
    }
    if task.body.is_empty() {
        return Err(BackendError::Validation(format!(
            "task {:?} has an empty body",
            task.name
        )));
    }
    Ok(())
}
