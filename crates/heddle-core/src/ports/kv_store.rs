//! KvStore port - リモートのスキーマレス KV ストア
//!
//! バケット（名前付きのドキュメント集合）、インデックス、条件付き書き込みを
//! 提供するストアの抽象です。backend 側はロックを持たず、排他はすべて
//! ここでの条件付き書き込み（etag による compare-and-swap）に委ねます。
//!
//! # 設計原則
//! - 1 メソッド呼び出し = 1 リクエスト（ストア側でアトミック）
//! - 一意制約はストアのインデックスで強制する（`PutCondition::Absent` と組み合わせる）
//! - フィルタ・ソートに使うフィールドはインデックス済みであること

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Version token issued by the store on every successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Etag(u64);

impl Etag {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A document as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub value: Value,
    pub etag: Etag,

    /// Insertion sequence within the bucket; never reused, kept across updates.
    pub id: u64,
}

/// Precondition for `put_object`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Unconditional upsert.
    Any,
    /// Only create; fails with `AlreadyExists` if the key is taken.
    Absent,
    /// Only replace; fails with `ObjectNotFound` if the key is missing.
    Present,
    /// Compare-and-swap; fails with `EtagConflict` unless the current etag matches.
    Matches(Etag),
}

/// Filter expression evaluated by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    Le(String, Value),
    Ge(String, Value),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn any_of(field: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Filter::In(field.into(), values.into_iter().collect())
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Le(field.into(), value.into())
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ge(field.into(), value.into())
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    /// Matches every document.
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }

    /// Does `doc` satisfy this filter?
    ///
    /// Missing fields never match. Values of different JSON types never compare.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::Eq(field, expected) => doc
                .get(field)
                .is_some_and(|v| compare(v, expected) == Some(Ordering::Equal)),
            Filter::In(field, allowed) => doc.get(field).is_some_and(|v| {
                allowed
                    .iter()
                    .any(|a| compare(v, a) == Some(Ordering::Equal))
            }),
            Filter::Le(field, bound) => doc
                .get(field)
                .is_some_and(|v| matches!(compare(v, bound), Some(Ordering::Less | Ordering::Equal))),
            Filter::Ge(field, bound) => doc.get(field).is_some_and(|v| {
                matches!(compare(v, bound), Some(Ordering::Greater | Ordering::Equal))
            }),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }

    /// Every field the filter reads.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Filter::Eq(field, _)
            | Filter::In(field, _)
            | Filter::Le(field, _)
            | Filter::Ge(field, _) => vec![field.as_str()],
            Filter::And(filters) => filters.iter().flat_map(Filter::fields).collect(),
        }
    }
}

/// Total-ish ordering used by filters and sorts.
///
/// Numbers compare numerically, strings lexicographically, booleans false < true.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    /// An indexed document field.
    Field(String, SortOrder),
    /// Insertion order within the bucket.
    Insertion(SortOrder),
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        SortKey::Field(field.into(), SortOrder::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        SortKey::Field(field.into(), SortOrder::Desc)
    }

    pub fn insertion() -> Self {
        SortKey::Insertion(SortOrder::Asc)
    }
}

/// Paging and ordering for `find_objects`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Vec<SortKey>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn sorted_by(sort: impl IntoIterator<Item = SortKey>) -> Self {
        Self {
            sort: sort.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Index declaration of a bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,

    /// Documents outside the scope are not indexed (partial index).
    pub scope: Option<Filter>,
}

impl IndexSpec {
    pub fn secondary(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            name: field.clone(),
            fields: vec![field],
            unique: false,
            scope: None,
        }
    }

    pub fn unique<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique: true,
            scope: None,
        }
    }

    pub fn scoped(mut self, scope: Filter) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn covers(&self, doc: &Value) -> bool {
        self.scope.as_ref().is_none_or(|scope| scope.matches(doc))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketConfig {
    pub name: String,
    pub indexes: Vec<IndexSpec>,
}

impl BucketConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.indexes
            .iter()
            .any(|idx| idx.fields.iter().any(|f| f == field))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("bucket {0} does not exist")]
    BucketNotFound(String),

    #[error("bucket {0} already exists")]
    BucketExists(String),

    #[error("object {key} already exists in {bucket}")]
    AlreadyExists { bucket: String, key: String },

    #[error("object {key} not found in {bucket}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("etag conflict on {key} in {bucket}")]
    EtagConflict { bucket: String, key: String },

    #[error("unique index {index} violated in {bucket}")]
    UniqueViolation { bucket: String, index: String },

    #[error("field {field} is not indexed in {bucket}")]
    NotIndexed { bucket: String, field: String },

    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

/// Client side of the remote store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn create_bucket(&self, config: BucketConfig) -> Result<(), StoreError>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Write a whole document; returns the new etag.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        value: Value,
        condition: PutCondition,
    ) -> Result<Etag, StoreError>;

    async fn get_object(&self, bucket: &str, key: &str)
    -> Result<Option<StoredObject>, StoreError>;

    /// Server-side projection: only the named top-level fields travel back.
    async fn get_fields(
        &self,
        bucket: &str,
        key: &str,
        fields: &[&str],
    ) -> Result<Option<Map<String, Value>>, StoreError>;

    async fn find_objects(
        &self,
        bucket: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<StoredObject>, StoreError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// Release the connection. Later calls fail with `Unavailable`.
    async fn close(&self);
}

/// Opens client connections.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn KvStore>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::eq_hit(Filter::eq("execution", "queued"), true)]
    #[case::eq_miss(Filter::eq("execution", "running"), false)]
    #[case::le_equal(Filter::le("exec_after", 100), true)]
    #[case::le_below(Filter::le("exec_after", 99), false)]
    #[case::ge(Filter::ge("exec_after", 50), true)]
    #[case::in_hit(Filter::any_of("execution", [json!("running"), json!("queued")]), true)]
    #[case::missing_field(Filter::eq("runner_id", "r1"), false)]
    #[case::type_mismatch(Filter::le("exec_after", "100"), false)]
    #[case::and(Filter::and([Filter::eq("execution", "queued"), Filter::le("exec_after", 100)]), true)]
    fn filter_matches(#[case] filter: Filter, #[case] expected: bool) {
        let doc = json!({ "execution": "queued", "exec_after": 100 });
        assert_eq!(filter.matches(&doc), expected);
    }

    #[test]
    fn filter_reports_fields() {
        let filter = Filter::and([Filter::eq("execution", "queued"), Filter::le("exec_after", 1)]);
        assert_eq!(filter.fields(), vec!["execution", "exec_after"]);
    }

    #[test]
    fn compare_handles_mixed_numbers() {
        assert_eq!(compare(&json!(1), &json!(1.5)), Some(Ordering::Less));
        assert_eq!(compare(&json!(true), &json!(1)), None);
    }

    #[test]
    fn scoped_index_only_covers_matching_docs() {
        let idx = IndexSpec::unique("job_target", ["workflow_uuid", "target"])
            .scoped(Filter::eq("execution", "queued"));

        assert!(idx.covers(&json!({ "execution": "queued" })));
        assert!(!idx.covers(&json!({ "execution": "failed" })));
    }
}
