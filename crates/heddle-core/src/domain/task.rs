use serde::{Deserialize, Serialize};
use std::fmt;

use super::TaskId;

/// Serialized executable text of a task.
///
/// The core never interprets it; an external `TaskExecutor` turns it back into
/// something callable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskBody(String);

impl TaskBody {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TaskBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single unit of work inside a chain.
///
/// `uuid` stays `None` until the task is persisted as part of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<TaskId>,
    pub name: String,
    pub body: TaskBody,

    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
}

impl Task {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            uuid: None,
            name: name.into(),
            body: TaskBody::new(body),
            timeout: None,
            retry: None,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }
}
