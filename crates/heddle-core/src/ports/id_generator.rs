//! IdGenerator port - ID 生成の抽象化
//!
//! 複数の backend（= 複数のワーカープロセス）が調整なしで ID を発行できるよう、
//! ULID を使います。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use std::sync::Arc;

use crate::domain::{JobId, TaskId, WorkflowId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散システムで使える ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから共有される）
pub trait IdGenerator: Send + Sync {
    fn generate_workflow_id(&self) -> WorkflowId;

    fn generate_job_id(&self) -> JobId;

    fn generate_task_id(&self) -> TaskId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// timestamp 部分は Clock から取るので、FixedClock を使うと
/// timestamp が固定された（ランダム部は異なる）ID になります。
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        // ULID timestamps can't go below the epoch.
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_workflow_id(&self) -> WorkflowId {
        WorkflowId::from(self.next_ulid())
    }

    fn generate_job_id(&self) -> JobId {
        JobId::from(self.next_ulid())
    }

    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }
}
