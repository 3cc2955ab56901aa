//! Tick loop starting runs of due tasks

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tsq_ir::Time;
use tsq_task::{Executor, Id, QueuedRun, RunContext, SearchParams, Store, StoreError, StoreTask};

use crate::log_event;

/// Page size used while walking every task on a tick.
const PAGE_SIZE: i64 = 100;

pub struct Scheduler {
    store: Arc<dyn Store>,
    executor: Arc<dyn Executor>,
    tick_interval: Duration,
    run_timeout: Duration,
    /// Last scheduled instant per task.
    scheduled: HashMap<Id, Time>,
    runs: JoinSet<()>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<dyn Executor>,
        tick_interval: Duration,
        run_timeout: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            tick_interval,
            run_timeout,
            scheduled: HashMap::new(),
            runs: JoinSet::new(),
        }
    }

    /// Ticks until `shutdown` fires, then waits for the runs in progress. Those see the
    /// shutdown through their context and end canceled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let ctx = RunContext::with_token(shutdown.clone());
        let mut interval = tokio::time::interval(self.tick_interval);
        info!(tick_ms = self.tick_interval.as_millis() as u64, "scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick(&ctx, Time::now()).await {
                        warn!(error = %e, "tick failed");
                    }
                }
                Some(_) = self.runs.join_next(), if !self.runs.is_empty() => {}
            }
        }
        info!(in_progress = self.runs.len(), "scheduler stopping");
        while self.runs.join_next().await.is_some() {}
    }

    /// Starts a run for every task due at `now`. Returns the runs started.
    pub async fn tick(&mut self, ctx: &RunContext, now: Time) -> Result<Vec<QueuedRun>, StoreError> {
        let mut started = Vec::new();
        let mut after = None;
        loop {
            let page = self
                .store
                .list_tasks(SearchParams {
                    after,
                    page_size: PAGE_SIZE,
                    ..Default::default()
                })
                .await?;
            after = page.last().map(|t| t.id);
            for task in &page {
                if let Some(run) = self.start_if_due(ctx, task, now).await {
                    started.push(run);
                }
            }
            if page.len() < PAGE_SIZE as usize {
                break;
            }
        }
        Ok(started)
    }

    async fn start_if_due(&mut self, ctx: &RunContext, task: &StoreTask, now: Time) -> Option<QueuedRun> {
        let Some(every) = task.options.every else {
            debug!(task_id = %task.id, "cron schedules are not supported, skipping task");
            return None;
        };
        let scheduled = now.truncate(every);
        let delay = task.options.delay.unwrap_or_default();
        if now < scheduled + delay {
            return None;
        }
        if self.scheduled.get(&task.id).map_or(false, |last| *last >= scheduled) {
            return None;
        }

        let run = match self
            .store
            .create_run(task.id, scheduled.nanos() / 1_000_000_000)
            .await
        {
            Ok(run) => run,
            Err(e @ StoreError::MaxConcurrency { .. }) => {
                debug!(task_id = %task.id, reason = %e, "run skipped");
                return None;
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "could not create run");
                return None;
            }
        };
        self.scheduled.insert(task.id, scheduled);

        let store = self.store.clone();
        let executor = self.executor.clone();
        let ctx = ctx.with_timeout(self.run_timeout);
        let timeout = self.run_timeout;
        let name = task.name.clone();
        self.runs.spawn(async move {
            let outcome = execute(executor.as_ref(), &ctx, run, timeout).await;
            log_event!(
                level: Level::INFO,
                event: "run_finished",
                task: name,
                task_id: run.task_id.to_string(),
                run_id: run.run_id.to_string(),
                outcome: outcome
            );
            if let Err(e) = store.finish_run(run.task_id, run.run_id).await {
                warn!(task_id = %run.task_id, run_id = %run.run_id, error = %e, "could not finish run");
            }
        });
        Some(run)
    }
}

/// Runs `run` to completion and describes the outcome.
async fn execute(executor: &dyn Executor, ctx: &RunContext, run: QueuedRun, timeout: Duration) -> String {
    let promise = match executor.execute(ctx, run).await {
        Ok(p) => p,
        Err(e) => return format!("not started: {e}"),
    };
    let result = match tokio::time::timeout(timeout, promise.wait()).await {
        Ok(result) => result,
        Err(_) => {
            promise.cancel();
            promise.wait().await
        }
    };
    match result {
        Ok(res) => match res.err() {
            Some(e) => format!("failed: {e}"),
            None => "success".to_string(),
        },
        Err(e) => format!("error: {e}"),
    }
}
