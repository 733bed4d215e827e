//! Job instances.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExecutionState, JobId, RunnerId, Task, WorkflowId};

/// Persisted field names the store indexes, filters or projects on.
pub mod fields {
    pub const WORKFLOW_UUID: &str = "workflow_uuid";
    pub const TARGET: &str = "target";
    pub const EXECUTION: &str = "execution";
    pub const EXEC_AFTER: &str = "exec_after";
    pub const RUNNER_ID: &str = "runner_id";
}

/// One execution of a workflow against a target.
///
/// Design:
/// - `chain` / `onerror` are copied from the workflow at creation time.
/// - `workflow_uuid` is a reference only; deleting the workflow leaves jobs alone.
/// - `runner_id` is stamped by the claim and checked on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub uuid: JobId,
    pub workflow_uuid: WorkflowId,

    /// Workflow name at the time the job was created.
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub chain: Vec<Task>,
    #[serde(default)]
    pub onerror: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    pub execution: ExecutionState,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub exec_after: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_id: Option<RunnerId>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Mark as running on behalf of `runner`.
    pub fn claim(&mut self, runner: RunnerId, now: DateTime<Utc>) {
        self.execution = ExecutionState::Running;
        self.runner_id = Some(runner);
        self.started_at = Some(now);
    }

    /// Move to a terminal state.
    pub fn finish(&mut self, state: ExecutionState, now: DateTime<Utc>) {
        debug_assert!(state.is_terminal());
        self.execution = state;
        self.finished_at = Some(now);
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.exec_after <= now
    }
}

/// Job as handed to the store; the store fills in id, state and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub workflow_uuid: WorkflowId,
    pub name: String,
    pub target: String,
    pub params: BTreeMap<String, String>,
    pub chain: Vec<Task>,
    pub onerror: Vec<Task>,
    pub timeout: Option<u64>,

    /// `None` means "due now".
    pub exec_after: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn into_job(self, uuid: JobId, now: DateTime<Utc>) -> Job {
        Job {
            uuid,
            workflow_uuid: self.workflow_uuid,
            name: self.name,
            target: self.target,
            params: self.params,
            chain: self.chain,
            onerror: self.onerror,
            timeout: self.timeout,
            execution: ExecutionState::Queued,
            exec_after: self.exec_after.unwrap_or(now),
            created_at: now,
            runner_id: None,
            started_at: None,
            finished_at: None,
        }
    }
}
