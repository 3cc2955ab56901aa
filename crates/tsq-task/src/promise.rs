//! Run promises
//!
//! A [`RunPromise`] resolves exactly once. Whoever reaches [`RunPromise::finish`] first,
//! the query driver or a canceler, decides the outcome; later calls are ignored. Every
//! clone observes the same result.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, Span};
use tsq_query::QueryError;

use crate::metrics::{outcome, RunMetrics};
use crate::model::{Id, QueuedRun, RunResult};
use crate::store::StoreError;

#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("run canceled")]
    RunCanceled,

    #[error("context canceled")]
    ContextCanceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("task {0} not found")]
    TaskNotFound(Id),

    #[error(transparent)]
    Store(Arc<StoreError>),

    /// The query could not be compiled or submitted.
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl From<StoreError> for ExecutorError {
    fn from(e: StoreError) -> Self {
        ExecutorError::Store(Arc::new(e))
    }
}

/// Cancellation and optional deadline a run executes under.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Child context expiring after `timeout`, or earlier if `self` does.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The reason the context ended, if it did.
    pub fn err(&self) -> Option<ExecutorError> {
        if self.token.is_cancelled() {
            Some(ExecutorError::ContextCanceled)
        } else if self.deadline.map_or(false, |d| Instant::now() >= d) {
            Some(ExecutorError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Waits until the context is canceled or its deadline passes.
    pub async fn done(&self) -> ExecutorError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => ExecutorError::ContextCanceled,
                _ = tokio::time::sleep_until(deadline) => ExecutorError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ExecutorError::ContextCanceled
            }
        }
    }
}

type Outcome = Result<Arc<RunResult>, ExecutorError>;

struct Inner {
    run: QueuedRun,
    result: OnceLock<Outcome>,
    ready: CancellationToken,
    /// Stops work started on behalf of the run once it resolved.
    work: CancellationToken,
    span: Span,
    metrics: Option<RunMetrics>,
}

/// Single-assignment handle on a run's outcome.
#[derive(Clone)]
pub struct RunPromise {
    inner: Arc<Inner>,
}

impl RunPromise {
    pub(crate) fn new(run: QueuedRun, work: CancellationToken, metrics: Option<RunMetrics>) -> Self {
        let span = tracing::info_span!("execute", task_id = %run.task_id, run_id = %run.run_id);
        span.in_scope(|| info!(now = run.now, "Executing task"));
        if let Some(m) = &metrics {
            m.started();
        }
        Self {
            inner: Arc::new(Inner {
                run,
                result: OnceLock::new(),
                ready: CancellationToken::new(),
                work,
                span,
                metrics,
            }),
        }
    }

    pub fn run(&self) -> &QueuedRun {
        &self.inner.run
    }

    /// Waits for the outcome. Repeated calls return the same result. `Err` means no
    /// result could be produced; query failures are carried in [`RunResult::err`].
    pub async fn wait(&self) -> Result<Arc<RunResult>, ExecutorError> {
        loop {
            if let Some(result) = self.inner.result.get() {
                return result.clone();
            }
            self.inner.ready.cancelled().await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.result.get().is_some()
    }

    /// Resolves the promise with [`ExecutorError::RunCanceled`] unless it already
    /// resolved.
    pub fn cancel(&self) {
        self.finish(Err(ExecutorError::RunCanceled));
    }

    pub(crate) fn span(&self) -> &Span {
        &self.inner.span
    }

    pub(crate) fn ready(&self) -> &CancellationToken {
        &self.inner.ready
    }

    /// Sets the outcome if none was set yet. Returns whether this call won.
    pub(crate) fn finish(&self, result: Result<RunResult, ExecutorError>) -> bool {
        let inner = &self.inner;
        if inner.result.set(result.map(Arc::new)).is_err() {
            return false;
        }
        inner.ready.cancel();
        // interrupts a query still in flight, otherwise only releases it
        inner.work.cancel();

        let _entered = inner.span.enter();
        let label = match inner.result.get() {
            Some(Err(err)) => {
                info!(error = %err, "Execution failed to get result");
                outcome::RUN_ERROR
            }
            Some(Ok(res)) => match res.err() {
                Some(err) => {
                    info!(error = %err, "Got result with error");
                    outcome::QUERY_ERROR
                }
                None => {
                    info!("Completed successfully");
                    outcome::SUCCESS
                }
            },
            None => return true,
        };
        if let Some(m) = &inner.metrics {
            m.finished(label);
        }
        true
    }
}

impl std::fmt::Debug for RunPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPromise")
            .field("run", &self.inner.run)
            .field("result", &self.inner.result.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    fn promise(metrics: Option<RunMetrics>) -> (RunPromise, CancellationToken) {
        let work = CancellationToken::new();
        let run = QueuedRun {
            task_id: Id(1),
            run_id: Id(2),
            now: 123,
        };
        (RunPromise::new(run, work.clone(), metrics), work)
    }

    #[tokio::test]
    async fn test_cancel_after_complete_keeps_result() {
        let (p, work) = promise(None);
        assert!(p.finish(Ok(RunResult::success())));
        p.cancel();
        let res = p.wait().await.unwrap();
        assert!(res.err().is_none());
        assert!(work.is_cancelled());
    }

    #[tokio::test]
    async fn test_complete_after_cancel_is_ignored() {
        let (p, _) = promise(None);
        p.cancel();
        p.cancel();
        assert!(!p.finish(Ok(RunResult::success())));
        assert!(matches!(p.wait().await, Err(ExecutorError::RunCanceled)));
    }

    #[tokio::test]
    async fn test_concurrent_waits_see_same_result() {
        let (p, _) = promise(None);
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let p = p.clone();
                tokio::spawn(async move { p.wait().await })
            })
            .collect();
        tokio::task::yield_now().await;
        assert!(!p.is_finished());
        p.finish(Ok(RunResult::new(Some(QueryError::service("boom")))));

        let first = p.wait().await.unwrap();
        for w in waiters {
            let res = w.await.unwrap().unwrap();
            assert!(Arc::ptr_eq(&res, &first));
        }
    }

    #[tokio::test]
    async fn test_outcome_recorded_once() {
        let registry = Registry::new();
        let metrics = RunMetrics::new(&registry).unwrap();
        let (p, _) = promise(Some(metrics.clone()));
        assert_eq!(metrics.active(), 1);
        p.finish(Ok(RunResult::new(Some(QueryError::Canceled))));
        p.cancel();
        assert_eq!(metrics.active(), 0);
        assert_eq!(metrics.total(outcome::QUERY_ERROR), 1);
        assert_eq!(metrics.total(outcome::RUN_ERROR), 0);
    }

    #[tokio::test]
    async fn test_context_deadline() {
        let ctx = RunContext::new().with_timeout(Duration::from_millis(10));
        assert!(ctx.err().is_none());
        assert!(matches!(ctx.done().await, ExecutorError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(ExecutorError::DeadlineExceeded)));

        let parent = RunContext::new();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert!(matches!(child.done().await, ExecutorError::ContextCanceled));
    }
}
