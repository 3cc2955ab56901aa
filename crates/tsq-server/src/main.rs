//! tsqd: runs scheduled query tasks against an in-memory storage
//!
//! Reads config.yaml (or the file named by `TSQ_CONFIG`), seeds the storage and the
//! configured tasks, then ticks until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use prometheus::{Encoder, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tsq_execute::Dependencies;
use tsq_functions::{StorageRef, STORAGE_DEPENDENCY};
use tsq_query::{LocalQueryService, QueryEngine, QueryServiceBridge};
use tsq_task::{
    AsyncQueryServiceExecutor, Executor, InMemStore, QueryServiceExecutor, RunMetrics, Store,
};

mod config;
mod logging;
mod scheduler;

use config::{Config, ExecutorKind};
use scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let path = std::env::var("TSQ_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load_or_default(&path).with_context(|| format!("loading {path}"))?;
    config.apply_logging_env();
    logging::init()?;

    let storage: StorageRef = Arc::new(config.storage.build());
    let mut deps = Dependencies::new();
    deps.insert(STORAGE_DEPENDENCY, storage);
    let engine = QueryEngine::new(tsq_task::registries()?, deps)?
        .with_resources(config.execution.resources());
    let compiler = engine.compiler().clone();

    let store = Arc::new(InMemStore::new(compiler.clone()));
    for task in &config.tasks {
        let id = store
            .create_task(task.org, task.user, &task.script)
            .await
            .context("creating configured task")?;
        info!(task_id = %id, org = %task.org, "task created");
    }

    let registry = prometheus::Registry::new();
    let metrics = RunMetrics::new(&registry)?;
    let svc = LocalQueryService::new(engine);
    let executor: Arc<dyn Executor> = match config.scheduler.executor {
        ExecutorKind::Sync => Arc::new(
            QueryServiceExecutor::new(Arc::new(QueryServiceBridge::new(svc)), store.clone(), compiler)
                .with_metrics(metrics.clone()),
        ),
        ExecutorKind::Async => Arc::new(
            AsyncQueryServiceExecutor::new(Arc::new(svc), store.clone(), compiler)
                .with_metrics(metrics.clone()),
        ),
    };
    info!(
        executor = ?config.scheduler.executor,
        tasks = config.tasks.len(),
        "tsqd starting"
    );

    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(
        store,
        executor,
        config.scheduler.tick_interval.to_std(),
        config.scheduler.run_timeout.to_std(),
    );
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();
    handle.await?;

    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    debug!(metrics = %String::from_utf8_lossy(&buf), "final metrics");
    info!(active = metrics.active(), "tsqd stopped");
    Ok(())
}
