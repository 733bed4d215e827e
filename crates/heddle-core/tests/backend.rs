//! End-to-end behaviour of the backend against the in-memory store.
//!
//! Each test builds one `InMemoryServer` and any number of `Backend`s that
//! share it, the way several worker processes share one remote store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use heddle_core::domain::{
    ExecutionState, Job, JobId, JobOutcome, JobSpec, RunnerId, Task, WorkflowSpec,
};
use heddle_core::impls::InMemoryServer;
use heddle_core::{Backend, BackendConfig, BackendError, Factory};

async fn backend_for(server: &InMemoryServer, runner: &str) -> Backend {
    backend_with(server, BackendConfig::default().for_runner(runner)).await
}

async fn backend_with(server: &InMemoryServer, config: BackendConfig) -> Backend {
    let backend = Backend::new(config, Arc::new(server.clone()));
    backend.init().await.unwrap();
    backend
}

/// Claim until the queue reports empty, then check nothing eligible is left.
async fn drain(backend: Backend) -> Vec<Job> {
    let mut claimed = Vec::new();
    while let Some(job) = backend.next_job(0).await.unwrap() {
        claimed.push(job);
    }
    assert!(
        backend.next_jobs(0, 1000).await.unwrap().is_empty(),
        "{} saw an empty queue while jobs were still eligible",
        backend.runner_id()
    );
    backend.quit().await.unwrap();
    claimed
}

fn a_workflow() -> WorkflowSpec {
    WorkflowSpec::new("A workflow")
        .task(
            Task::new("A Task", "function (job, cb) { return cb(null); }")
                .with_timeout(30)
                .with_retry(3),
        )
        .on_error(Task::new(
            "Fallback task",
            "function (job, cb) { return cb('Workflow error'); }",
        ))
        .timeout(180)
}

#[tokio::test]
async fn workflow_and_job_lifecycle() {
    let server = InMemoryServer::new();
    let backend = backend_for(&server, "runner-0").await;
    let factory = Factory::new(&backend);

    // Workflow with generated task ids.
    let wf = factory.workflow(a_workflow()).await.unwrap();
    assert!(wf.chain[0].uuid.is_some());
    assert!(wf.onerror[0].uuid.is_some());

    let err = factory.workflow(a_workflow()).await.unwrap_err();
    assert!(matches!(err, BackendError::DuplicateName(_)));
    assert_eq!(server.object_count("wf_workflows").await, Some(1));

    // get / update round trip.
    assert_eq!(backend.get_workflow(wf.uuid).await.unwrap(), wf);
    let mut edited = wf.clone();
    edited.name = "A workflow name".into();
    edited.chain.push(Task::new("Another task", "function (job, cb) { return cb(null); }"));
    let updated = backend.update_workflow(edited).await.unwrap();
    assert!(updated.chain[1].uuid.is_some());
    assert_eq!(backend.get_workflow(wf.uuid).await.unwrap(), updated);

    // Job.
    let job = factory
        .job(JobSpec::new(wf.uuid, "/foo/bar").param("a", "1").param("b", "2"))
        .await
        .unwrap();
    assert_eq!(job.execution, ExecutionState::Queued);
    assert_eq!(job.chain.len(), 2);
    assert_eq!(
        backend.get_job_property(job.uuid, "target").await.unwrap(),
        Some(serde_json::Value::from("/foo/bar"))
    );
    assert!(
        backend
            .get_job_property(job.uuid, "exec_after")
            .await
            .unwrap()
            .is_some()
    );

    let err = factory
        .job(JobSpec::new(wf.uuid, "/foo/bar").param("a", "2").param("b", "1"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::DuplicateTarget { .. }));

    let other = factory
        .job(JobSpec::new(wf.uuid, "/foo/baz"))
        .await
        .unwrap();

    // Preview does not claim.
    let preview = backend.next_jobs(0, 10).await.unwrap();
    assert_eq!(preview.len(), 2);
    for queued in &preview {
        assert_eq!(
            backend.get_job_property(queued.uuid, "execution").await.unwrap(),
            Some(serde_json::Value::from("queued"))
        );
    }

    // Two claims, then nothing.
    let first = backend.next_job(0).await.unwrap().unwrap();
    let second = backend.next_job(0).await.unwrap().unwrap();
    assert!(backend.next_job(0).await.unwrap().is_none());
    assert_eq!(
        HashSet::from([first.uuid, second.uuid]),
        HashSet::from([job.uuid, other.uuid])
    );

    // Teardown.
    let schema = backend.schema().await.unwrap();
    schema.drop_schema().await.unwrap();
    for bucket in ["wf_workflows", "wf_jobs", "wf_runners"] {
        assert!(!backend.bucket_exists(bucket).await.unwrap());
    }
    backend.quit().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_are_at_most_once() {
    const WORKERS: usize = 8;
    const JOBS: usize = 3;

    let server = InMemoryServer::new();
    let setup = backend_for(&server, "setup").await;
    let factory = Factory::new(&setup);
    let wf = factory.workflow(a_workflow()).await.unwrap();
    for i in 0..JOBS {
        factory
            .job(JobSpec::new(wf.uuid, format!("/target/{i}")))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for w in 0..WORKERS {
        let backend = backend_for(&server, &format!("runner-{w}")).await;
        handles.push(tokio::spawn(async move {
            let claimed = backend.next_job(0).await.unwrap();
            backend.quit().await.unwrap();
            claimed
        }));
    }

    let mut claimed = Vec::new();
    let mut empty = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Some(job) => claimed.push(job),
            None => empty += 1,
        }
    }

    assert_eq!(claimed.len(), JOBS);
    assert_eq!(empty, WORKERS - JOBS);
    let distinct: HashSet<_> = claimed.iter().map(|j| j.uuid).collect();
    assert_eq!(distinct.len(), JOBS);

    // Each stored job names the runner that got it.
    let jobs = setup.jobs().await.unwrap();
    for job in &claimed {
        let stored = jobs.get(job.uuid).await.unwrap();
        assert_eq!(stored.execution, ExecutionState::Running);
        assert_eq!(stored.runner_id, job.runner_id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn many_workers_drain_a_large_queue() {
    const WORKERS: usize = 32;
    const JOBS: usize = 400;

    let server = InMemoryServer::new();
    let setup = backend_for(&server, "setup").await;
    let factory = Factory::new(&setup);
    let wf = factory.workflow(a_workflow()).await.unwrap();
    for i in 0..JOBS {
        factory
            .job(JobSpec::new(wf.uuid, format!("/target/{i}")))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for w in 0..WORKERS {
        // Small pages make every worker fight over the same few candidates.
        let mut config = BackendConfig::default().for_runner(format!("runner-{w}"));
        config.dispatch.batch_size = 2;
        let backend = backend_with(&server, config).await;
        handles.push(tokio::spawn(drain(backend)));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(handle.await.unwrap());
    }

    assert_eq!(claimed.len(), JOBS);
    let distinct: HashSet<_> = claimed.iter().map(|j| j.uuid).collect();
    assert_eq!(distinct.len(), JOBS);
    assert!(setup.next_job(0).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn each_worker_claims_in_exec_after_order() {
    const WORKERS: usize = 6;
    const JOBS: i64 = 48;

    let server = InMemoryServer::new();
    let setup = backend_for(&server, "setup").await;
    let factory = Factory::new(&setup);
    let wf = factory.workflow(a_workflow()).await.unwrap();

    // Creation order and exec_after order disagree.
    let base = Utc::now() - Duration::minutes(5);
    let mut queued = HashSet::new();
    for i in 0..JOBS {
        let due = base + Duration::seconds((i * 7) % JOBS);
        let job = factory
            .job(JobSpec::new(wf.uuid, format!("/staggered/{i}")).exec_after(due))
            .await
            .unwrap();
        queued.insert(job.uuid);
    }

    let mut handles = Vec::new();
    for w in 0..WORKERS {
        let backend = backend_for(&server, &format!("runner-{w}")).await;
        handles.push(tokio::spawn(drain(backend)));
    }

    let mut claimed = HashSet::new();
    for handle in handles {
        let jobs = handle.await.unwrap();
        assert!(
            jobs.windows(2).all(|w| w[0].exec_after <= w[1].exec_after),
            "claims out of exec_after order: {:?}",
            jobs.iter().map(|j| j.exec_after).collect::<Vec<_>>()
        );
        for job in jobs {
            assert!(claimed.insert(job.uuid), "{} claimed twice", job.uuid);
        }
    }
    assert_eq!(claimed, queued);
}

#[tokio::test]
async fn only_the_claiming_runner_can_finish() {
    let server = InMemoryServer::new();
    let alice = backend_for(&server, "alice").await;
    let bob = backend_for(&server, "bob").await;
    let factory = Factory::new(&alice);
    let wf = factory.workflow(a_workflow()).await.unwrap();
    factory.job(JobSpec::new(wf.uuid, "/foo/bar")).await.unwrap();

    let job = alice.next_job(0).await.unwrap().unwrap();

    let err = bob
        .jobs()
        .await
        .unwrap()
        .finish(job.uuid, bob.runner_id(), JobOutcome::Failed)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::NotOwner { .. }));

    let done = alice
        .jobs()
        .await
        .unwrap()
        .finish(job.uuid, &RunnerId::new("alice"), JobOutcome::Succeeded)
        .await
        .unwrap();
    assert_eq!(done.execution, ExecutionState::Succeeded);

    // The target is free again once the job is terminal.
    factory.job(JobSpec::new(wf.uuid, "/foo/bar")).await.unwrap();
}

#[tokio::test]
async fn outage_is_reported_as_store_unavailable() {
    let server = InMemoryServer::new();
    let backend = backend_for(&server, "runner-0").await;
    let wf = Factory::new(&backend).workflow(a_workflow()).await.unwrap();

    server.set_available(false).await;
    assert!(matches!(
        backend.get_workflow(wf.uuid).await,
        Err(BackendError::StoreUnavailable(_))
    ));
    assert!(matches!(
        backend.next_job(0).await,
        Err(BackendError::StoreUnavailable(_))
    ));

    server.set_available(true).await;
    assert_eq!(backend.get_workflow(wf.uuid).await.unwrap().uuid, wf.uuid);
}

#[tokio::test]
async fn missing_job_property_names_the_uuid() {
    let server = InMemoryServer::new();
    let backend = backend_for(&server, "runner-0").await;
    let missing = JobId::from_ulid(ulid::Ulid::new());

    let err = backend.get_job_property(missing, "target").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains(&missing.key()));
}
