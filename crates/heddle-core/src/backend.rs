//! Backend - ストアへの接続とコンポーネントの組み立て
//!
//! 1 つの `Backend` が 1 つのストア接続と 1 つの runner identity を持ちます。
//! ワーカーごとに別の `Backend` を作り、同じストアを共有させるのが基本形です。
//!
//! # ライフサイクル
//! - `init()`: 接続してスキーマを用意（2 回目以降は何もしない）
//! - `quit()`: 接続を閉じる（2 回目以降は何もしない）
//! - 未接続の間は全操作が `NotConnected`

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::BackendConfig;
use crate::domain::{Job, JobId, RunnerId, Workflow, WorkflowId};
use crate::error::{BackendError, Result};
use crate::ports::{Clock, IdGenerator, KvStore, StoreConnector, SystemClock, UlidGenerator};
use crate::store::{DispatchQueue, JobStore, RunnerRegistry, SchemaManager, WorkflowStore};

pub struct Backend {
    config: BackendConfig,
    connector: Arc<dyn StoreConnector>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    client: Mutex<Option<Arc<dyn KvStore>>>,
}

impl Backend {
    pub fn new(config: BackendConfig, connector: Arc<dyn StoreConnector>) -> Self {
        Self::with_clock(config, connector, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: BackendConfig,
        connector: Arc<dyn StoreConnector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        Self {
            config,
            connector,
            clock,
            ids,
            client: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn runner_id(&self) -> &RunnerId {
        &self.config.runner.identifier
    }

    /// Connect and make sure every bucket exists.
    pub async fn init(&self) -> Result<()> {
        let mut slot = self.client.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let client = self.connector.connect().await?;
        let schema = SchemaManager::new(client.clone(), self.config.buckets.clone());
        if let Err(e) = schema.ensure_schema().await {
            warn!(runner = %self.runner_id(), error = %e, "schema setup failed; closing connection");
            client.close().await;
            return Err(e);
        }

        *slot = Some(client);
        info!(runner = %self.runner_id(), "backend initialized");
        Ok(())
    }

    /// Close the connection.
    pub async fn quit(&self) -> Result<()> {
        if let Some(client) = self.client.lock().await.take() {
            client.close().await;
            info!(runner = %self.runner_id(), "backend closed");
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    async fn client(&self) -> Result<Arc<dyn KvStore>> {
        self.client
            .lock()
            .await
            .clone()
            .ok_or(BackendError::NotConnected)
    }

    pub async fn schema(&self) -> Result<SchemaManager> {
        Ok(SchemaManager::new(
            self.client().await?,
            self.config.buckets.clone(),
        ))
    }

    pub async fn workflows(&self) -> Result<WorkflowStore> {
        Ok(WorkflowStore::new(
            self.client().await?,
            self.config.buckets.workflows.clone(),
            self.ids.clone(),
        ))
    }

    pub async fn jobs(&self) -> Result<JobStore> {
        Ok(JobStore::new(
            self.client().await?,
            self.config.buckets.jobs.clone(),
            self.ids.clone(),
            self.clock.clone(),
            self.config.jobs.max_write_attempts,
        ))
    }

    pub async fn dispatch(&self) -> Result<DispatchQueue> {
        Ok(DispatchQueue::new(
            self.client().await?,
            self.config.buckets.jobs.clone(),
            self.runner_id().clone(),
            self.clock.clone(),
            self.config.dispatch.batch_size,
        ))
    }

    pub async fn runners(&self) -> Result<RunnerRegistry> {
        Ok(RunnerRegistry::new(
            self.client().await?,
            self.config.buckets.runners.clone(),
            self.clock.clone(),
        ))
    }

    pub async fn get_workflow(&self, uuid: WorkflowId) -> Result<Workflow> {
        self.workflows().await?.get(uuid).await
    }

    pub async fn update_workflow(&self, workflow: Workflow) -> Result<Workflow> {
        self.workflows().await?.update(workflow).await
    }

    pub async fn get_job_property(&self, uuid: JobId, name: &str) -> Result<Option<Value>> {
        self.jobs().await?.get_property(uuid, name).await
    }

    pub async fn next_job(&self, offset: usize) -> Result<Option<Job>> {
        self.dispatch().await?.next_job(offset).await
    }

    pub async fn next_jobs(&self, offset: usize, limit: usize) -> Result<Vec<Job>> {
        self.dispatch().await?.next_jobs(offset, limit).await
    }

    pub async fn bucket_exists(&self, name: &str) -> Result<bool> {
        self.schema().await?.bucket_exists(name).await
    }
}
