use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use heddle_core::domain::{ExecutionState, Job, JobOutcome, JobSpec, Task, WorkflowSpec};
use heddle_core::impls::InMemoryServer;
use heddle_core::ports::TaskExecutor;
use heddle_core::{Backend, BackendConfig, Factory};

#[derive(Debug, Parser)]
#[command(name = "heddle", about = "Workflow job store and dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a workflow over an in-memory store with several competing workers.
    Demo {
        #[arg(long, default_value_t = 4)]
        workers: usize,

        #[arg(long, default_value_t = 10)]
        jobs: usize,

        /// JSON backend config; the runner identifier is replaced per worker.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Logs each task instead of running its body. Chain tasks of jobs with
/// `mode=fail` fail.
struct LoggingExecutor;

#[async_trait]
impl TaskExecutor for LoggingExecutor {
    async fn execute(&self, task: &Task, job: &Job) -> Result<(), String> {
        info!(job = %job.uuid, task = %task.name, target = %job.target, "running task");
        let fail = job.params.get("mode").is_some_and(|m| m == "fail");
        if fail && job.chain.contains(task) {
            return Err(format!("task {:?} failed", task.name));
        }
        Ok(())
    }
}

/// Run the chain, falling back to `onerror` on the first failure.
async fn run_job(executor: &dyn TaskExecutor, job: &Job) -> JobOutcome {
    for task in &job.chain {
        if let Err(reason) = executor.execute(task, job).await {
            warn!(job = %job.uuid, task = %task.name, %reason, "task failed; running onerror chain");
            for fallback in &job.onerror {
                if let Err(reason) = executor.execute(fallback, job).await {
                    warn!(job = %job.uuid, task = %fallback.name, %reason, "onerror task failed");
                }
            }
            return JobOutcome::Failed;
        }
    }
    JobOutcome::Succeeded
}

/// 1 ワーカー = 1 Backend（= 1 接続）
async fn worker_loop(
    backend: Backend,
    executor: Arc<dyn TaskExecutor>,
) -> heddle_core::Result<Vec<ExecutionState>> {
    backend.init().await?;
    backend
        .runners()
        .await?
        .register(backend.runner_id().clone())
        .await?;

    let mut done = Vec::new();
    while let Some(job) = backend.next_job(0).await? {
        let outcome = run_job(executor.as_ref(), &job).await;
        let finished = backend
            .jobs()
            .await?
            .finish(job.uuid, backend.runner_id(), outcome)
            .await?;
        done.push(finished.execution);
    }

    backend.quit().await?;
    Ok(done)
}

async fn demo(workers: usize, jobs: usize, config: Option<PathBuf>) -> Result<()> {
    let config = match config {
        Some(path) => BackendConfig::load(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BackendConfig::default(),
    };

    let server = InMemoryServer::new();
    let admin = Backend::new(config.for_runner("admin"), Arc::new(server.clone()));
    admin.init().await?;

    let factory = Factory::new(&admin);
    let workflow = factory
        .workflow(
            WorkflowSpec::new("demo")
                .task(Task::new("fetch", "fetch(job.target)"))
                .task(Task::new("process", "process(job.params)"))
                .on_error(Task::new("report", "report(job)"))
                .timeout(180),
        )
        .await?;
    for i in 0..jobs {
        let mut spec = JobSpec::new(workflow.uuid, format!("/demo/{i}"));
        if i % 5 == 4 {
            spec = spec.param("mode", "fail");
        }
        factory.job(spec).await?;
    }
    info!(jobs, workers, "queued demo jobs");

    let executor: Arc<dyn TaskExecutor> = Arc::new(LoggingExecutor);
    let mut handles = Vec::new();
    for w in 0..workers {
        let backend = Backend::new(
            config.for_runner(format!("worker-{w}")),
            Arc::new(server.clone()),
        );
        handles.push(tokio::spawn(worker_loop(backend, executor.clone())));
    }

    let mut succeeded = 0;
    let mut failed = 0;
    for (w, handle) in handles.into_iter().enumerate() {
        let done = handle.await.context("worker panicked")??;
        println!("worker-{w}: {} jobs", done.len());
        for execution in done {
            match execution {
                ExecutionState::Succeeded => succeeded += 1,
                _ => failed += 1,
            }
        }
    }
    println!("succeeded={succeeded} failed={failed}");

    let runners = admin.runners().await?;
    for w in 0..workers {
        let id = config.for_runner(format!("worker-{w}")).runner.identifier;
        if !runners.exists(&id).await? {
            warn!(runner = %id, "worker never registered");
        }
    }
    for runner in runners.list().await? {
        println!("runner {} last active {}", runner.identifier, runner.active_at);
        runners.unregister(&runner.identifier).await?;
    }
    admin.quit().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Commands::Demo {
            workers,
            jobs,
            config,
        } => demo(workers, jobs, config).await,
    }
}
