//! Ports - 抽象化レイヤー
//!
//! 外部システムへのインターフェースを trait として定義し、実装の詳細を隠蔽します。
//!
//! - **KvStore / StoreConnector**: バケット・インデックス・条件付き書き込みを持つ KV ストア
//! - **Clock**: 現在時刻（テストでは FixedClock）
//! - **IdGenerator**: ULID ベースの ID 発行
//! - **TaskExecutor**: タスク本体の実行契約（実装は外部）

pub mod clock;
pub mod executor;
pub mod id_generator;
pub mod kv_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::TaskExecutor;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::kv_store::{
    BucketConfig, Etag, Filter, FindOptions, IndexSpec, KvStore, PutCondition, SortKey,
    SortOrder, StoreConnector, StoreError, StoredObject,
};
