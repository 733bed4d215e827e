//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryServer / InMemoryClient**: 開発・テスト用の KV ストア
//!
//! 本番用のストアクライアントは `KvStore` / `StoreConnector` を実装した別クレートに置きます。

pub mod memory_store;

pub use self::memory_store::{InMemoryClient, InMemoryServer};
