use thiserror::Error;

use crate::domain::{ExecutionState, JobId, RunnerId, WorkflowId};
use crate::ports::StoreError;

pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{kind} not found (uuid={uuid})")]
    NotFound { kind: &'static str, uuid: String },

    #[error("workflow name {0:?} is already taken")]
    DuplicateName(String),

    #[error("workflow {workflow} already has an active job for target {target:?}")]
    DuplicateTarget { workflow: WorkflowId, target: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("backend is not connected; call init() first")]
    NotConnected,

    #[error("{job} is not held by runner {runner}")]
    NotOwner { job: JobId, runner: RunnerId },

    #[error("{job} cannot go from {from} to {to}")]
    InvalidTransition {
        job: JobId,
        from: ExecutionState,
        to: ExecutionState,
    },

    #[error("invalid definition: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("document encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackendError {
    pub fn workflow_not_found(uuid: WorkflowId) -> Self {
        BackendError::NotFound {
            kind: "workflow",
            uuid: uuid.key(),
        }
    }

    pub fn job_not_found(uuid: JobId) -> Self {
        BackendError::NotFound {
            kind: "job",
            uuid: uuid.key(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }
}

/// Connectivity failures keep their own variant; everything else is wrapped.
impl From<StoreError> for BackendError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => BackendError::StoreUnavailable(reason),
            other => BackendError::Store(other),
        }
    }
}
