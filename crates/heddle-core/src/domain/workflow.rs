//! Workflow definitions.

use serde::{Deserialize, Serialize};

use super::{Task, TaskId, WorkflowId};

/// A named, reusable chain of tasks with an error-handling chain.
///
/// `name` is unique across every workflow in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub uuid: WorkflowId,
    pub name: String,
    pub chain: Vec<Task>,
    #[serde(default)]
    pub onerror: Vec<Task>,

    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Workflow {
    /// Give every task in `chain` and `onerror` that lacks an id a fresh one.
    ///
    /// Tasks that already carry an id keep it, so updates don't churn ids.
    pub fn assign_task_ids(&mut self, mut next_id: impl FnMut() -> TaskId) {
        for task in self.chain.iter_mut().chain(self.onerror.iter_mut()) {
            if task.uuid.is_none() {
                task.uuid = Some(next_id());
            }
        }
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.chain.iter().chain(self.onerror.iter())
    }
}

/// Workflow as handed to the store before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkflow {
    pub name: String,
    pub chain: Vec<Task>,
    pub onerror: Vec<Task>,
    pub timeout: Option<u64>,
}

impl NewWorkflow {
    pub fn into_workflow(self, uuid: WorkflowId) -> Workflow {
        Workflow {
            uuid,
            name: self.name,
            chain: self.chain,
            onerror: self.onerror,
            timeout: self.timeout,
        }
    }
}
