//! Runner registry, keyed by identifier.

use std::sync::Arc;

use tracing::debug;

use super::decode;
use crate::domain::{Runner, RunnerId};
use crate::error::Result;
use crate::ports::{Clock, Filter, FindOptions, KvStore, PutCondition, SortKey, StoreError};

pub struct RunnerRegistry {
    store: Arc<dyn KvStore>,
    bucket: String,
    clock: Arc<dyn Clock>,
}

impl RunnerRegistry {
    pub fn new(store: Arc<dyn KvStore>, bucket: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            clock,
        }
    }

    /// Announce `identifier`; re-registering refreshes `active_at`.
    pub async fn register(&self, identifier: RunnerId) -> Result<Runner> {
        let runner = Runner {
            identifier,
            active_at: self.clock.now(),
        };
        self.store
            .put_object(
                &self.bucket,
                runner.identifier.as_str(),
                serde_json::to_value(&runner)?,
                PutCondition::Any,
            )
            .await?;
        debug!(runner = %runner.identifier, "registered runner");
        Ok(runner)
    }

    pub async fn get(&self, identifier: &RunnerId) -> Result<Option<Runner>> {
        self.store
            .get_object(&self.bucket, identifier.as_str())
            .await?
            .map(|o| decode(o.value))
            .transpose()
    }

    pub async fn exists(&self, identifier: &RunnerId) -> Result<bool> {
        Ok(self.get(identifier).await?.is_some())
    }

    /// Most recently active first.
    pub async fn list(&self) -> Result<Vec<Runner>> {
        self.store
            .find_objects(
                &self.bucket,
                &Filter::all(),
                &FindOptions::sorted_by([SortKey::desc("active_at"), SortKey::insertion()]),
            )
            .await?
            .into_iter()
            .map(|o| decode(o.value))
            .collect()
    }

    /// Returns `false` if the runner was not registered.
    pub async fn unregister(&self, identifier: &RunnerId) -> Result<bool> {
        match self.store.delete_object(&self.bucket, identifier.as_str()).await {
            Ok(()) => {
                debug!(runner = %identifier, "unregistered runner");
                Ok(true)
            }
            Err(StoreError::ObjectNotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    use crate::config::BucketNames;
    use crate::impls::InMemoryServer;
    use crate::ports::FixedClock;
    use crate::store::SchemaManager;

    async fn registry(server: &InMemoryServer) -> (RunnerRegistry, Arc<FixedClock>) {
        let client: Arc<dyn KvStore> = Arc::new(server.client());
        SchemaManager::new(client.clone(), BucketNames::default())
            .ensure_schema()
            .await
            .unwrap();
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        (RunnerRegistry::new(client, "wf_runners", clock.clone()), clock)
    }

    #[tokio::test]
    async fn register_is_an_upsert() {
        let server = InMemoryServer::new();
        let (runners, clock) = registry(&server).await;
        let id = RunnerId::new("runner-a");

        assert!(!runners.exists(&id).await.unwrap());

        runners.register(id.clone()).await.unwrap();
        clock.advance(Duration::seconds(30));
        let again = runners.register(id.clone()).await.unwrap();

        assert_eq!(runners.get(&id).await.unwrap(), Some(again));
        assert_eq!(
            runners.get(&id).await.unwrap().map(|r| r.active_at),
            Some(clock.now())
        );
        assert_eq!(server.object_count("wf_runners").await, Some(1));
        assert!(runners.get(&RunnerId::new("runner-b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_puts_the_latest_announcement_first() {
        let server = InMemoryServer::new();
        let (runners, clock) = registry(&server).await;

        for name in ["runner-a", "runner-b", "runner-c"] {
            runners.register(RunnerId::new(name)).await.unwrap();
            clock.advance(Duration::seconds(10));
        }
        runners.register(RunnerId::new("runner-a")).await.unwrap();

        let order: Vec<String> = runners
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.identifier.as_str().to_string())
            .collect();
        assert_eq!(order, ["runner-a", "runner-c", "runner-b"]);
    }

    #[tokio::test]
    async fn unregister_reports_whether_the_runner_was_known() {
        let server = InMemoryServer::new();
        let (runners, _) = registry(&server).await;
        let id = RunnerId::new("runner-a");
        runners.register(id.clone()).await.unwrap();

        assert!(runners.unregister(&id).await.unwrap());
        assert!(!runners.exists(&id).await.unwrap());
        assert!(!runners.unregister(&id).await.unwrap());
        assert_eq!(server.object_count("wf_runners").await, Some(0));
    }
}
