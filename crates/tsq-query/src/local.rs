//! Asynchronous query service running queries on the blocking thread pool

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use tsq_ir::Time;
use uuid::Uuid;

use crate::engine::QueryEngine;
use crate::error::QueryError;
use crate::service::{AsyncQueryService, Query, QueryCompiler, QueryResult, Request, Statistics};

/// Runs queries on a local [`QueryEngine`]. Compile and plan errors are returned from
/// [`AsyncQueryService::query`]; execution happens in the background.
#[derive(Clone)]
pub struct LocalQueryService {
    engine: QueryEngine,
}

impl LocalQueryService {
    pub fn new(engine: QueryEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }
}

#[async_trait]
impl AsyncQueryService for LocalQueryService {
    async fn query(
        &self,
        cancel: CancellationToken,
        request: Request,
    ) -> Result<Arc<dyn Query>, QueryError> {
        let started = Instant::now();
        let spec = match request.compiler {
            QueryCompiler::Spec(spec) => spec,
            QueryCompiler::Script(script) => self.engine.compile(&script, Time::now())?,
        };
        let compile_duration = started.elapsed();

        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let finished = CancellationToken::new();
        let query = Arc::new(LocalQuery {
            id,
            ready: Mutex::new(Some(rx)),
            err: Mutex::new(None),
            cancel: cancel.child_token(),
            finished: finished.clone(),
            stats: Mutex::new(Statistics {
                compile_duration,
                ..Default::default()
            }),
        });

        let engine = self.engine.clone();
        let q = query.clone();
        let span = tracing::info_span!("query", query_id = %id, org = %request.organization_id);
        tokio::task::spawn_blocking(move || {
            let _guard = span.enter();
            let mut stats = *q.stats.lock();
            let outcome = engine.execute(&spec, &q.cancel, &mut stats);
            stats.total_duration = started.elapsed();
            *q.stats.lock() = stats;

            match outcome {
                Ok(results) => {
                    let results: BTreeMap<String, QueryResult> = results
                        .into_iter()
                        .map(|(name, tables)| (name.clone(), QueryResult { name, tables }))
                        .collect();
                    info!(results = results.len(), "query succeeded");
                    // receiver gone means nobody waits for the results
                    let _ = tx.send(results);
                }
                Err(e) => {
                    warn!(error = %e, "query failed");
                    *q.err.lock() = Some(e);
                    drop(tx);
                }
            }
            finished.cancel();
        });
        Ok(query)
    }
}

struct LocalQuery {
    id: Uuid,
    ready: Mutex<Option<oneshot::Receiver<BTreeMap<String, QueryResult>>>>,
    err: Mutex<Option<QueryError>>,
    cancel: CancellationToken,
    finished: CancellationToken,
    stats: Mutex<Statistics>,
}

#[async_trait]
impl Query for LocalQuery {
    async fn ready(&self) -> Option<BTreeMap<String, QueryResult>> {
        let rx = self.ready.lock().take()?;
        rx.await.ok()
    }

    fn err(&self) -> Option<QueryError> {
        self.err.lock().clone()
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn done(&self) {
        self.finished
            .cancelled()
            .instrument(tracing::debug_span!("done", query_id = %self.id))
            .await;
    }

    fn statistics(&self) -> Statistics {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tsq_execute::Dependencies;
    use tsq_functions::{MemoryStorage, Point, StorageRef, STORAGE_DEPENDENCY};

    fn service() -> LocalQueryService {
        let storage = MemoryStorage::new();
        storage.write(
            "telegraf",
            [Point::new("cpu", "usage", Time::now(), 1.0).tag("host", "a")],
        );
        let storage: StorageRef = Arc::new(storage);
        let mut deps = Dependencies::new();
        deps.insert(STORAGE_DEPENDENCY, storage);
        LocalQueryService::new(QueryEngine::builtin(deps).unwrap())
    }

    #[tokio::test]
    async fn test_query_with_compile() {
        let svc = service();
        let q = svc
            .query_with_compile(
                CancellationToken::new(),
                "org",
                r#"from(bucket: "telegraf") |> range(start: -1h) |> count() |> yield(name: "n")"#,
            )
            .await
            .unwrap();
        let results = q.ready().await.unwrap();
        assert_eq!(results["n"].tables.len(), 1);
        assert!(q.ready().await.is_none());
        q.done().await;
        assert!(q.err().is_none());
        assert!(q.statistics().total_duration >= q.statistics().execute_duration);
    }

    #[tokio::test]
    async fn test_failed_query_closes_ready() {
        let svc = service();
        let q = svc
            .query_with_compile(CancellationToken::new(), "org", r#"from(bucket: "telegraf")"#)
            .await
            .unwrap();
        assert!(q.ready().await.is_none());
        q.done().await;
        assert_eq!(
            q.err().map(|e| e.to_string()),
            Some("from: bounds must be set, use range()".to_string())
        );
    }

    #[tokio::test]
    async fn test_compile_errors_are_returned() {
        let err = service()
            .query_with_compile(CancellationToken::new(), "org", "from(")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, QueryError::Compile(_)), "{err}");
    }
}
