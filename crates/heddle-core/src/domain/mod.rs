//! Domain model (ids, tasks, workflows, jobs, runners, input specs).

pub mod ids;
pub mod job;
pub mod runner;
pub mod spec;
pub mod state;
pub mod task;
pub mod workflow;

pub use ids::{JobId, RunnerId, TaskId, WorkflowId};
pub use job::{Job, NewJob};
pub use runner::Runner;
pub use spec::{JobSpec, WorkflowSpec};
pub use state::{ExecutionState, JobOutcome};
pub use task::{Task, TaskBody};
pub use workflow::{NewWorkflow, Workflow};
