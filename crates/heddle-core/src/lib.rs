//! heddle-core
//!
//! Persistence and dispatch layer of the Heddle workflow engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, workflow, job, state, runner, spec）
//! - **ports**: 抽象化レイヤー（KvStore, Clock, IdGenerator, TaskExecutor）
//! - **store**: バケット上のコンポーネント（schema, workflows, jobs, dispatch, runners）
//! - **backend**: 接続のライフサイクルと組み立て
//! - **factory**: WorkflowSpec / JobSpec からの Workflow / Job 作成
//! - **impls**: 実装（開発・テスト用の InMemoryServer）

pub mod backend;
pub mod config;
pub mod domain;
pub mod error;
pub mod factory;
pub mod impls;
pub mod ports;
pub mod store;

pub use backend::Backend;
pub use config::{BackendConfig, ConfigError};
pub use error::{BackendError, Result};
pub use factory::Factory;
