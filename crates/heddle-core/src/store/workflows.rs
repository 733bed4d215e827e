//! Workflow definitions bucket.

use std::sync::Arc;

use tracing::{debug, info};

use super::decode;
use crate::domain::{NewWorkflow, Workflow, WorkflowId};
use crate::error::{BackendError, Result};
use crate::ports::{Filter, FindOptions, IdGenerator, KvStore, PutCondition, SortKey, StoreError};

pub struct WorkflowStore {
    store: Arc<dyn KvStore>,
    bucket: String,
    ids: Arc<dyn IdGenerator>,
}

impl WorkflowStore {
    pub fn new(store: Arc<dyn KvStore>, bucket: impl Into<String>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            ids,
        }
    }

    /// Persist a new workflow.
    ///
    /// Every task gets an id. Fails with `DuplicateName` (store untouched) if the
    /// name is taken.
    pub async fn create(&self, new: NewWorkflow) -> Result<Workflow> {
        let mut workflow = new.into_workflow(self.ids.generate_workflow_id());
        workflow.assign_task_ids(|| self.ids.generate_task_id());

        let doc = serde_json::to_value(&workflow)?;
        match self
            .store
            .put_object(&self.bucket, &workflow.uuid.key(), doc, PutCondition::Absent)
            .await
        {
            Ok(_) => {
                info!(workflow = %workflow.uuid, name = %workflow.name, "created workflow");
                Ok(workflow)
            }
            Err(StoreError::UniqueViolation { .. }) => Err(BackendError::DuplicateName(workflow.name)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, uuid: WorkflowId) -> Result<Workflow> {
        let object = self
            .store
            .get_object(&self.bucket, &uuid.key())
            .await?
            .ok_or_else(|| BackendError::workflow_not_found(uuid))?;
        decode(object.value)
    }

    /// Replace the whole document. Newly appended tasks get ids.
    ///
    /// The uuid is the key, so it can't change; renaming onto a taken name is a
    /// `DuplicateName`.
    pub async fn update(&self, mut workflow: Workflow) -> Result<Workflow> {
        workflow.assign_task_ids(|| self.ids.generate_task_id());

        let doc = serde_json::to_value(&workflow)?;
        match self
            .store
            .put_object(&self.bucket, &workflow.uuid.key(), doc, PutCondition::Present)
            .await
        {
            Ok(_) => {
                debug!(workflow = %workflow.uuid, "updated workflow");
                Ok(workflow)
            }
            Err(StoreError::ObjectNotFound { .. }) => {
                Err(BackendError::workflow_not_found(workflow.uuid))
            }
            Err(StoreError::UniqueViolation { .. }) => Err(BackendError::DuplicateName(workflow.name)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Workflow>> {
        let found = self
            .store
            .find_objects(&self.bucket, &Filter::eq("name", name), &FindOptions::default().limit(1))
            .await?;
        found.into_iter().next().map(|o| decode(o.value)).transpose()
    }

    /// Every workflow, oldest first.
    pub async fn list(&self) -> Result<Vec<Workflow>> {
        self.store
            .find_objects(
                &self.bucket,
                &Filter::all(),
                &FindOptions::sorted_by([SortKey::insertion()]),
            )
            .await?
            .into_iter()
            .map(|o| decode(o.value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BucketNames;
    use crate::domain::Task;
    use crate::impls::InMemoryServer;
    use crate::ports::{SystemClock, UlidGenerator};
    use crate::store::SchemaManager;

    async fn store(server: &InMemoryServer) -> WorkflowStore {
        let client: Arc<dyn KvStore> = Arc::new(server.client());
        SchemaManager::new(client.clone(), BucketNames::default())
            .ensure_schema()
            .await
            .unwrap();
        WorkflowStore::new(
            client,
            "wf_workflows",
            Arc::new(UlidGenerator::new(Arc::new(SystemClock))),
        )
    }

    fn a_workflow(name: &str) -> NewWorkflow {
        NewWorkflow {
            name: name.to_string(),
            chain: vec![Task::new("A Task", "cb(null)").with_timeout(30).with_retry(3)],
            onerror: vec![Task::new("Fallback task", "cb('Workflow error')")],
            timeout: Some(180),
        }
    }

    #[tokio::test]
    async fn create_assigns_task_ids() {
        let server = InMemoryServer::new();
        let workflows = store(&server).await;

        let wf = workflows.create(a_workflow("A workflow")).await.unwrap();

        assert!(wf.chain[0].uuid.is_some());
        assert!(wf.onerror[0].uuid.is_some());
        assert_eq!(workflows.get(wf.uuid).await.unwrap(), wf);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_without_writing() {
        let server = InMemoryServer::new();
        let workflows = store(&server).await;

        workflows.create(a_workflow("A workflow")).await.unwrap();
        let err = workflows.create(a_workflow("A workflow")).await.unwrap_err();

        assert!(matches!(err, BackendError::DuplicateName(ref n) if n == "A workflow"));
        assert_eq!(server.object_count("wf_workflows").await, Some(1));
    }

    #[tokio::test]
    async fn get_missing_names_the_uuid() {
        let server = InMemoryServer::new();
        let workflows = store(&server).await;
        let missing = WorkflowId::from_ulid(ulid::Ulid::new());

        let err = workflows.get(missing).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains(&missing.key()));
    }

    #[tokio::test]
    async fn update_appends_and_renames() {
        let server = InMemoryServer::new();
        let workflows = store(&server).await;
        let mut wf = workflows.create(a_workflow("A workflow")).await.unwrap();
        let first_task = wf.chain[0].uuid;

        wf.chain.push(Task::new("Another task", "cb(null)"));
        wf.name = "A workflow name".into();
        let updated = workflows.update(wf.clone()).await.unwrap();

        assert_eq!(updated.chain.len(), 2);
        assert_eq!(updated.chain[0].uuid, first_task);
        assert!(updated.chain[1].uuid.is_some());
        assert_eq!(workflows.get(wf.uuid).await.unwrap(), updated);
        assert!(workflows.find_by_name("A workflow").await.unwrap().is_none());
        assert_eq!(
            workflows.find_by_name("A workflow name").await.unwrap().map(|w| w.uuid),
            Some(wf.uuid)
        );
    }

    #[tokio::test]
    async fn update_rejects_missing_and_taken_names() {
        let server = InMemoryServer::new();
        let workflows = store(&server).await;
        let first = workflows.create(a_workflow("first")).await.unwrap();
        let second = workflows.create(a_workflow("second")).await.unwrap();

        let mut renamed = second.clone();
        renamed.name = "first".into();
        assert!(matches!(
            workflows.update(renamed).await,
            Err(BackendError::DuplicateName(_))
        ));
        assert_eq!(workflows.get(second.uuid).await.unwrap().name, "second");

        let mut ghost = first.clone();
        ghost.uuid = WorkflowId::from_ulid(ulid::Ulid::new());
        assert!(workflows.update(ghost).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_returns_creation_order() {
        let server = InMemoryServer::new();
        let workflows = store(&server).await;
        for name in ["one", "two", "three"] {
            workflows.create(a_workflow(name)).await.unwrap();
        }

        let names: Vec<_> = workflows
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, vec!["one", "two", "three"]);
    }
}
