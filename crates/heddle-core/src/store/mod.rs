//! Store - バケット上の各コンポーネント
//!
//! - **SchemaManager**: バケットとインデックスの用意（起動時に 1 回、冪等）
//! - **WorkflowStore**: ワークフロー定義の CRUD（name の一意性）
//! - **JobStore**: ジョブの CRUD（アクティブな `(workflow_uuid, target)` の一意性）
//! - **DispatchQueue**: 次のジョブの選択とアトミックな claim
//! - **RunnerRegistry**: ランナーの登録
//!
//! どのコンポーネントもロックを持ちません。排他はストアの条件付き書き込みだけで行います。

pub mod dispatch;
pub mod jobs;
pub mod runners;
pub mod schema;
pub mod workflows;

pub use self::dispatch::DispatchQueue;
pub use self::jobs::JobStore;
pub use self::runners::RunnerRegistry;
pub use self::schema::SchemaManager;
pub use self::workflows::WorkflowStore;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}
