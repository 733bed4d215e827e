//! Input specs for the factory (Workflow / Job).
//!
//! These are what callers hand in before anything is persisted; they are
//! deserializable so definitions can live in JSON files.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Task, WorkflowId};

/// Definition of a workflow to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    pub chain: Vec<Task>,

    #[serde(default, alias = "onError")]
    pub onerror: Vec<Task>,

    /// Seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl WorkflowSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: Vec::new(),
            onerror: Vec::new(),
            timeout: None,
        }
    }

    pub fn task(mut self, task: Task) -> Self {
        self.chain.push(task);
        self
    }

    pub fn on_error(mut self, task: Task) -> Self {
        self.onerror.push(task);
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }
}

/// Request to run a workflow against a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub workflow: WorkflowId,
    pub target: String,

    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Delay the job until this instant. Defaults to "now".
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub exec_after: Option<DateTime<Utc>>,
}

impl JobSpec {
    pub fn new(workflow: WorkflowId, target: impl Into<String>) -> Self {
        Self {
            workflow,
            target: target.into(),
            params: BTreeMap::new(),
            exec_after: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn exec_after(mut self, at: DateTime<Utc>) -> Self {
        self.exec_after = Some(at);
        self
    }
}
