//! In-memory KV store.
//!
//! `InMemoryServer` plays the remote store: it owns every bucket and is shared by
//! any number of `InMemoryClient` connections (one per backend / worker).
//!
//! Design:
//! - Every client call is one atomic step under the server lock, like one request.
//! - Clients yield to the scheduler before each request so concurrent callers
//!   interleave between requests, the way they would over a network.
//! - Etags come from a server-wide counter, so they never repeat.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::ports::kv_store::compare;
use crate::ports::{
    BucketConfig, Etag, Filter, FindOptions, KvStore, PutCondition, SortKey, SortOrder,
    StoreConnector, StoreError, StoredObject,
};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    etag: Etag,
    id: u64,
}

#[derive(Debug)]
struct Bucket {
    config: BucketConfig,
    objects: HashMap<String, Entry>,
    next_id: u64,
}

impl Bucket {
    fn new(config: BucketConfig) -> Self {
        Self {
            config,
            objects: HashMap::new(),
            next_id: 1,
        }
    }

    fn stored(&self, key: &str, entry: &Entry) -> StoredObject {
        StoredObject {
            key: key.to_string(),
            value: entry.value.clone(),
            etag: entry.etag,
            id: entry.id,
        }
    }

    /// Reject `value` if it collides with another document on a unique index.
    fn check_unique(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        for index in self.config.indexes.iter().filter(|idx| idx.unique) {
            if !index.covers(value) {
                continue;
            }
            let Some(tuple) = index_tuple(&index.fields, value) else {
                continue;
            };
            let taken = self.objects.iter().any(|(other_key, other)| {
                other_key != key
                    && index.covers(&other.value)
                    && index_tuple(&index.fields, &other.value).is_some_and(|other_tuple| {
                        tuple
                            .iter()
                            .zip(other_tuple.iter())
                            .all(|(a, b)| compare(a, b) == Some(Ordering::Equal))
                    })
            });
            if taken {
                return Err(StoreError::UniqueViolation {
                    bucket: self.config.name.clone(),
                    index: index.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_indexed<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> Result<(), StoreError> {
        for field in fields {
            if !self.config.is_indexed(field) {
                return Err(StoreError::NotIndexed {
                    bucket: self.config.name.clone(),
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Values of `fields` in `doc`, or `None` if any is missing or null.
fn index_tuple<'a>(fields: &[String], doc: &'a Value) -> Option<Vec<&'a Value>> {
    fields
        .iter()
        .map(|f| doc.get(f).filter(|v| !v.is_null()))
        .collect()
}

fn sort_entries(entries: &mut [(&String, &Entry)], sort: &[SortKey]) {
    entries.sort_by(|(_, a), (_, b)| {
        for key in sort {
            let (ordering, order) = match key {
                SortKey::Field(field, order) => {
                    let ordering = match (a.value.get(field), b.value.get(field)) {
                        (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                        // Missing values sort last.
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    };
                    (ordering, *order)
                }
                SortKey::Insertion(order) => (a.id.cmp(&b.id), *order),
            };
            let ordering = match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.id.cmp(&b.id)
    });
}

/// In-memory server state.
#[derive(Debug)]
struct ServerState {
    buckets: HashMap<String, Bucket>,
    next_etag: u64,
    available: bool,
}

impl ServerState {
    fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            next_etag: 1,
            available: true,
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store is down".to_string()))
        }
    }

    fn bucket(&self, name: &str) -> Result<&Bucket, StoreError> {
        self.buckets
            .get(name)
            .ok_or_else(|| StoreError::BucketNotFound(name.to_string()))
    }

    fn allocate_etag(&mut self) -> Etag {
        let etag = Etag::new(self.next_etag);
        self.next_etag += 1;
        etag
    }

    fn put(
        &mut self,
        bucket_name: &str,
        key: &str,
        value: Value,
        condition: PutCondition,
    ) -> Result<Etag, StoreError> {
        if !value.is_object() {
            return Err(StoreError::InvalidDocument(format!(
                "{key} in {bucket_name} is not a JSON object"
            )));
        }
        let etag = self.allocate_etag();
        let bucket = self
            .buckets
            .get_mut(bucket_name)
            .ok_or_else(|| StoreError::BucketNotFound(bucket_name.to_string()))?;

        let current = bucket.objects.get(key);
        match (condition, current) {
            (PutCondition::Any, _) => {}
            (PutCondition::Absent, None) => {}
            (PutCondition::Absent, Some(_)) => {
                return Err(StoreError::AlreadyExists {
                    bucket: bucket_name.to_string(),
                    key: key.to_string(),
                });
            }
            (PutCondition::Present, Some(_)) => {}
            (PutCondition::Present, None) => {
                return Err(StoreError::ObjectNotFound {
                    bucket: bucket_name.to_string(),
                    key: key.to_string(),
                });
            }
            (PutCondition::Matches(expected), Some(entry)) if entry.etag == expected => {}
            (PutCondition::Matches(_), _) => {
                return Err(StoreError::EtagConflict {
                    bucket: bucket_name.to_string(),
                    key: key.to_string(),
                });
            }
        }

        bucket.check_unique(key, &value)?;

        let id = match bucket.objects.get(key) {
            Some(entry) => entry.id,
            None => {
                let id = bucket.next_id;
                bucket.next_id += 1;
                id
            }
        };
        bucket
            .objects
            .insert(key.to_string(), Entry { value, etag, id });
        Ok(etag)
    }
}

/// The shared store. Cloning hands out another handle to the same data.
#[derive(Clone)]
pub struct InMemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl InMemoryServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState::new())),
        }
    }

    /// Open a client connection without going through `StoreConnector`.
    pub fn client(&self) -> InMemoryClient {
        InMemoryClient {
            server: self.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub async fn set_available(&self, available: bool) {
        self.state.lock().await.available = available;
    }

    /// Number of documents in a bucket (`None` if the bucket is missing).
    pub async fn object_count(&self, bucket: &str) -> Option<usize> {
        let state = self.state.lock().await;
        state.buckets.get(bucket).map(|b| b.objects.len())
    }
}

impl Default for InMemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreConnector for InMemoryServer {
    async fn connect(&self) -> Result<Arc<dyn KvStore>, StoreError> {
        self.state.lock().await.check_available()?;
        Ok(Arc::new(self.client()))
    }
}

/// One connection to an `InMemoryServer`.
pub struct InMemoryClient {
    server: InMemoryServer,
    closed: AtomicBool,
}

impl InMemoryClient {
    /// Common prologue of every request.
    async fn request(&self) -> Result<tokio::sync::MutexGuard<'_, ServerState>, StoreError> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(StoreError::Unavailable("client is closed".to_string()));
        }
        tokio::task::yield_now().await;
        let state = self.server.state.lock().await;
        state.check_available()?;
        Ok(state)
    }
}

#[async_trait]
impl KvStore for InMemoryClient {
    async fn create_bucket(&self, config: BucketConfig) -> Result<(), StoreError> {
        let mut state = self.request().await?;
        if state.buckets.contains_key(&config.name) {
            return Err(StoreError::BucketExists(config.name));
        }
        state.buckets.insert(config.name.clone(), Bucket::new(config));
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        let state = self.request().await?;
        Ok(state.buckets.contains_key(bucket))
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut state = self.request().await?;
        state
            .buckets
            .remove(bucket)
            .map(|_| ())
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        value: Value,
        condition: PutCondition,
    ) -> Result<Etag, StoreError> {
        let mut state = self.request().await?;
        state.put(bucket, key, value, condition)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<StoredObject>, StoreError> {
        let state = self.request().await?;
        let bucket = state.bucket(bucket)?;
        Ok(bucket.objects.get(key).map(|entry| bucket.stored(key, entry)))
    }

    async fn get_fields(
        &self,
        bucket: &str,
        key: &str,
        fields: &[&str],
    ) -> Result<Option<Map<String, Value>>, StoreError> {
        let state = self.request().await?;
        let bucket = state.bucket(bucket)?;
        Ok(bucket.objects.get(key).map(|entry| {
            fields
                .iter()
                .filter_map(|f| entry.value.get(*f).map(|v| (f.to_string(), v.clone())))
                .collect()
        }))
    }

    async fn find_objects(
        &self,
        bucket: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<StoredObject>, StoreError> {
        let state = self.request().await?;
        let bucket = state.bucket(bucket)?;

        bucket.check_indexed(filter.fields())?;
        bucket.check_indexed(options.sort.iter().filter_map(|key| match key {
            SortKey::Field(field, _) => Some(field.as_str()),
            SortKey::Insertion(_) => None,
        }))?;

        let mut hits: Vec<(&String, &Entry)> = bucket
            .objects
            .iter()
            .filter(|(_, entry)| filter.matches(&entry.value))
            .collect();
        sort_entries(&mut hits, &options.sort);

        Ok(hits
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .map(|(key, entry)| bucket.stored(key, entry))
            .collect())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let mut state = self.request().await?;
        let bucket_name = bucket;
        let bucket = state
            .buckets
            .get_mut(bucket_name)
            .ok_or_else(|| StoreError::BucketNotFound(bucket_name.to_string()))?;
        bucket
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::ObjectNotFound {
                bucket: bucket_name.to_string(),
                key: key.to_string(),
            })
    }

    async fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
    }
}
