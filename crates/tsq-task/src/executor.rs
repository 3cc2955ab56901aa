//! Executors turning a queued run into a [`RunPromise`]
//!
//! [`QueryServiceExecutor`] drives an iterator based [`QueryService`] from a spawned task.
//! [`AsyncQueryServiceExecutor`] submits to an [`AsyncQueryService`] up front and only
//! follows the query afterwards; prefer it when the service supports it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, Instrument};
use tsq_compile::Compiler;
use tsq_ir::{Spec, Time};
use tsq_query::{AsyncQueryService, Query, QueryError, QueryService, Request};

use crate::metrics::RunMetrics;
use crate::model::{QueuedRun, RunResult, StoreTask};
use crate::promise::{ExecutorError, RunContext, RunPromise};
use crate::store::Store;

#[async_trait]
pub trait Executor: Send + Sync {
    /// Starts `run`. Errors are returned here when the run could not be started at all;
    /// everything later is reported through the promise.
    async fn execute(&self, ctx: &RunContext, run: QueuedRun) -> Result<RunPromise, ExecutorError>;
}

async fn find_task(store: &dyn Store, run: &QueuedRun) -> Result<StoreTask, ExecutorError> {
    store
        .find_task_by_id(run.task_id)
        .await?
        .ok_or(ExecutorError::TaskNotFound(run.task_id))
}

fn compile(compiler: &Compiler, task: &StoreTask, run: &QueuedRun) -> Result<Spec, QueryError> {
    Ok(compiler.compile(&task.script, Time::from_unix(run.now))?)
}

pub struct QueryServiceExecutor {
    svc: Arc<dyn QueryService>,
    store: Arc<dyn Store>,
    compiler: Compiler,
    metrics: Option<RunMetrics>,
}

impl QueryServiceExecutor {
    pub fn new(svc: Arc<dyn QueryService>, store: Arc<dyn Store>, compiler: Compiler) -> Self {
        Self {
            svc,
            store,
            compiler,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: RunMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl Executor for QueryServiceExecutor {
    async fn execute(&self, ctx: &RunContext, run: QueuedRun) -> Result<RunPromise, ExecutorError> {
        let task = find_task(self.store.as_ref(), &run).await?;

        let ctx = ctx.child();
        let promise = RunPromise::new(run, ctx.token().clone(), self.metrics.clone());
        let span = promise.span().clone();
        tokio::spawn(
            do_query(
                promise.clone(),
                self.svc.clone(),
                self.compiler.clone(),
                task,
                ctx.clone(),
            )
            .instrument(span.clone()),
        );
        tokio::spawn(cancel_on_context_done(promise.clone(), ctx).instrument(span));
        Ok(promise)
    }
}

async fn do_query(
    p: RunPromise,
    svc: Arc<dyn QueryService>,
    compiler: Compiler,
    task: StoreTask,
    ctx: RunContext,
) {
    let spec = match compile(&compiler, &task, p.run()) {
        Ok(spec) => spec,
        Err(e) => {
            p.finish(Err(e.into()));
            return;
        }
    };

    let request = Request::spec(task.org.to_string(), spec);
    let mut it = tokio::select! {
        _ = p.ready().cancelled() => return,
        res = svc.query(ctx.token().clone(), request) => match res {
            Ok(it) => it,
            Err(e) => {
                // submission failures are not part of the run result
                p.finish(Err(e.into()));
                return;
            }
        },
    };

    loop {
        tokio::select! {
            _ = p.ready().cancelled() => {
                it.cancel();
                return;
            }
            more = it.more() => {
                if !more {
                    break;
                }
                let _ = it.next();
            }
        }
    }
    p.finish(Ok(RunResult::new(it.err())));
}

async fn cancel_on_context_done(p: RunPromise, ctx: RunContext) {
    tokio::select! {
        _ = p.ready().cancelled() => {}
        // a no-op when the run already finished
        err = ctx.done() => {
            p.finish(Err(err));
        }
    }
}

pub struct AsyncQueryServiceExecutor {
    svc: Arc<dyn AsyncQueryService>,
    store: Arc<dyn Store>,
    compiler: Compiler,
    metrics: Option<RunMetrics>,
}

impl AsyncQueryServiceExecutor {
    pub fn new(svc: Arc<dyn AsyncQueryService>, store: Arc<dyn Store>, compiler: Compiler) -> Self {
        Self {
            svc,
            store,
            compiler,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: RunMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl Executor for AsyncQueryServiceExecutor {
    async fn execute(&self, ctx: &RunContext, run: QueuedRun) -> Result<RunPromise, ExecutorError> {
        let task = find_task(self.store.as_ref(), &run).await?;
        let spec = compile(&self.compiler, &task, &run)?;

        let ctx = ctx.child();
        let query = self
            .svc
            .query(ctx.token().clone(), Request::spec(task.org.to_string(), spec))
            .await?;

        let promise = RunPromise::new(run, ctx.token().clone(), self.metrics.clone());
        let span = promise.span().clone();
        tokio::spawn(follow_query(promise.clone(), query, ctx).instrument(span));
        Ok(promise)
    }
}

/// Resolves `p` from the query's outcome unless something else resolves it first.
/// The query is released with `done` in every case.
async fn follow_query(p: RunPromise, q: Arc<dyn Query>, ctx: RunContext) {
    tokio::select! {
        _ = p.ready().cancelled() => {
            q.cancel();
        }
        err = ctx.done() => {
            p.finish(Err(err));
            q.cancel();
        }
        results = q.ready() => {
            let res = match results {
                Some(_) => RunResult::success(),
                None => RunResult::new(q.err()),
            };
            p.finish(Ok(res));
        }
    }
    q.done().await;
    debug!("query released");
}
