//! TaskExecutor port - タスク本体の実行契約
//!
//! タスク本体はシリアライズされたテキストとして保存されるだけで、
//! このクレートは解釈しません。実行可能な形への復元は外部の executor の責務です。

use async_trait::async_trait;

use crate::domain::{Job, Task};

/// Runs one task of a claimed job.
///
/// `Ok(())` advances the chain; `Err(reason)` sends the job to its `onerror` chain.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task, job: &Job) -> Result<(), String>;
}
