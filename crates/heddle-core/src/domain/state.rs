//! Job execution state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution state of a job.
///
/// State transitions:
/// - Queued -> Running (claim, dispatch queue only)
/// - Running -> Succeeded | Failed | Canceled (completion by the claiming runner)
/// - Queued -> Canceled (operator cancel before any claim)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl ExecutionState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Canceled
        )
    }

    /// Is this job eligible for a claim?
    pub fn is_runnable(self) -> bool {
        matches!(self, ExecutionState::Queued)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Queued => "queued",
            ExecutionState::Running => "running",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
            ExecutionState::Canceled => "canceled",
        }
    }

    pub fn active_states() -> [ExecutionState; 2] {
        [ExecutionState::Queued, ExecutionState::Running]
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome a runner reports for a job it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Canceled,
}

impl From<JobOutcome> for ExecutionState {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Succeeded => ExecutionState::Succeeded,
            JobOutcome::Failed => ExecutionState::Failed,
            JobOutcome::Canceled => ExecutionState::Canceled,
        }
    }
}
