//! Both executors against a controllable query service, plus a run through the local
//! query engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tsq_compile::Compiler;
use tsq_execute::Dependencies;
use tsq_functions::{MemoryStorage, Point, StorageRef, STORAGE_DEPENDENCY};
use tsq_ir::Time;
use tsq_query::{
    AsyncQueryService, LocalQueryService, Query, QueryEngine, QueryError, QueryResult,
    QueryServiceBridge, Request, Statistics,
};
use tsq_task::metrics::outcome;
use tsq_task::{
    AsyncQueryServiceExecutor, Executor, ExecutorError, Id, InMemStore, QueryServiceExecutor,
    QueuedRun, RunContext, RunMetrics, Store,
};

const ORG: Id = Id(1);
const USER: Id = Id(2);

const SCRIPT: &str = r#"option task = {name: "foo", every: 1m}
from(bucket: "one") |> range(start: -1h)"#;

struct FakeQuery {
    unblock: CancellationToken,
    forced: Mutex<Option<QueryError>>,
    results: Mutex<Option<BTreeMap<String, QueryResult>>>,
}

#[async_trait]
impl Query for FakeQuery {
    async fn ready(&self) -> Option<BTreeMap<String, QueryResult>> {
        self.unblock.cancelled().await;
        if self.forced.lock().is_some() {
            return None;
        }
        self.results.lock().take()
    }

    fn err(&self) -> Option<QueryError> {
        self.forced.lock().clone()
    }

    fn cancel(&self) {}

    async fn done(&self) {}

    fn statistics(&self) -> Statistics {
        Statistics::default()
    }
}

#[derive(Default)]
struct State {
    queries: HashMap<String, Arc<FakeQuery>>,
    query_err: Option<QueryError>,
}

/// Queries block until the test succeeds or fails them, keyed by organization.
#[derive(Clone, Default)]
struct FakeQueryService {
    state: Arc<Mutex<State>>,
}

impl FakeQueryService {
    fn succeed_query(&self, org: Id) {
        let q = self.state.lock().queries.remove(&org.to_string()).unwrap();
        q.unblock.cancel();
    }

    fn fail_query(&self, org: Id, forced: QueryError) {
        let q = self.state.lock().queries.remove(&org.to_string()).unwrap();
        *q.forced.lock() = Some(forced);
        q.unblock.cancel();
    }

    fn fail_next_query(&self, forced: QueryError) {
        self.state.lock().query_err = Some(forced);
    }

    /// The synchronous executor submits from a spawned task.
    async fn wait_for_query_live(&self, org: Id) {
        for _ in 0..10 {
            if self.state.lock().queries.contains_key(&org.to_string()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("did not see live query for {org} in time");
    }
}

#[async_trait]
impl AsyncQueryService for FakeQueryService {
    async fn query(
        &self,
        _cancel: CancellationToken,
        request: Request,
    ) -> Result<Arc<dyn Query>, QueryError> {
        let mut state = self.state.lock();
        if let Some(err) = state.query_err.take() {
            return Err(err);
        }
        let res = QueryResult {
            name: "res".into(),
            tables: Vec::new(),
        };
        let q = Arc::new(FakeQuery {
            unblock: CancellationToken::new(),
            forced: Mutex::new(None),
            results: Mutex::new(Some(BTreeMap::from([(res.name.clone(), res)]))),
        });
        state.queries.insert(request.organization_id, q.clone());
        Ok(q)
    }
}

fn compiler() -> Compiler {
    let mut r = tsq_task::registries().unwrap();
    r.freeze().unwrap();
    Compiler::new(Arc::new(r.functions))
}

struct System {
    name: &'static str,
    svc: FakeQueryService,
    store: Arc<InMemStore>,
    ex: Box<dyn Executor>,
}

fn systems() -> Vec<System> {
    let compiler = compiler();

    let svc = FakeQueryService::default();
    let store = Arc::new(InMemStore::new(compiler.clone()));
    let async_system = System {
        name: "AsyncExecutor",
        svc: svc.clone(),
        store: store.clone(),
        ex: Box::new(AsyncQueryServiceExecutor::new(
            Arc::new(svc),
            store,
            compiler.clone(),
        )),
    };

    let svc = FakeQueryService::default();
    let store = Arc::new(InMemStore::new(compiler.clone()));
    let sync_system = System {
        name: "SynchronousExecutor",
        svc: svc.clone(),
        store: store.clone(),
        ex: Box::new(QueryServiceExecutor::new(
            Arc::new(QueryServiceBridge::new(svc)),
            store,
            compiler,
        )),
    };

    vec![async_system, sync_system]
}

async fn queued_run(sys: &System) -> QueuedRun {
    let task_id = sys.store.create_task(ORG, USER, SCRIPT).await.unwrap();
    QueuedRun {
        task_id,
        run_id: Id(1),
        now: 123,
    }
}

#[tokio::test]
async fn test_query_success() {
    for sys in systems() {
        let qr = queued_run(&sys).await;
        let p = sys.ex.execute(&RunContext::new(), qr).await.unwrap();
        assert_eq!(p.run(), &qr, "{}", sys.name);

        let waiting = tokio::spawn({
            let p = p.clone();
            async move { p.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiting.is_finished(), "{}: wait returned before query was unblocked", sys.name);

        sys.svc.wait_for_query_live(ORG).await;
        sys.svc.succeed_query(ORG);

        let res = p.wait().await.unwrap();
        assert!(res.err().is_none(), "{}", sys.name);
        let again = p.wait().await.unwrap();
        assert!(Arc::ptr_eq(&res, &again), "{}", sys.name);
        assert!(Arc::ptr_eq(&res, &waiting.await.unwrap().unwrap()));
    }
}

#[tokio::test]
async fn test_query_failure() {
    for sys in systems() {
        let qr = queued_run(&sys).await;
        let p = sys.ex.execute(&RunContext::new(), qr).await.unwrap();

        let forced = QueryError::service("forced error");
        sys.svc.wait_for_query_live(ORG).await;
        sys.svc.fail_query(ORG, forced.clone());

        let res = p.wait().await.unwrap();
        assert_eq!(res.err(), Some(&forced), "{}", sys.name);
    }
}

#[tokio::test]
async fn test_promise_cancel() {
    for sys in systems() {
        let qr = queued_run(&sys).await;
        let p = sys.ex.execute(&RunContext::new(), qr).await.unwrap();
        p.cancel();
        let err = p.wait().await.unwrap_err();
        assert!(matches!(err, ExecutorError::RunCanceled), "{}: {err}", sys.name);
    }
}

#[tokio::test]
async fn test_service_error() {
    for sys in systems() {
        let qr = queued_run(&sys).await;
        sys.svc.fail_next_query(QueryError::service("forced"));

        let err = match sys.ex.execute(&RunContext::new(), qr).await {
            Err(err) => err,
            // the synchronous executor submits after returning the promise
            Ok(p) => p.wait().await.unwrap_err(),
        };
        assert!(
            matches!(&err, ExecutorError::Query(QueryError::Service(m)) if m == "forced"),
            "{}: {err}",
            sys.name
        );
    }
}

#[tokio::test]
async fn test_context_deadline() {
    for sys in systems() {
        let qr = queued_run(&sys).await;
        let ctx = RunContext::new().with_timeout(Duration::from_millis(20));
        let p = sys.ex.execute(&ctx, qr).await.unwrap();
        let err = p.wait().await.unwrap_err();
        assert!(matches!(err, ExecutorError::DeadlineExceeded), "{}: {err}", sys.name);
    }
}

#[tokio::test]
async fn test_missing_task() {
    for sys in systems() {
        let qr = QueuedRun {
            task_id: Id(99),
            run_id: Id(1),
            now: 0,
        };
        let err = sys.ex.execute(&RunContext::new(), qr).await.unwrap_err();
        assert_eq!(err.to_string(), "task 0000000000000063 not found", "{}", sys.name);
    }
}

fn local_service() -> LocalQueryService {
    let storage = MemoryStorage::new();
    storage.write(
        "one",
        [
            Point::new("cpu", "usage", Time::from_unix(60), 1.0).tag("host", "a"),
            Point::new("cpu", "usage", Time::from_unix(90), 2.0).tag("host", "a"),
        ],
    );
    let storage: StorageRef = Arc::new(storage);
    let mut deps = Dependencies::new();
    deps.insert(STORAGE_DEPENDENCY, storage);
    LocalQueryService::new(QueryEngine::new(tsq_task::registries().unwrap(), deps).unwrap())
}

#[tokio::test]
async fn test_runs_through_local_engine() {
    let svc = local_service();
    let compiler = svc.engine().compiler().clone();
    let store = Arc::new(InMemStore::new(compiler.clone()));
    let registry = Registry::new();
    let metrics = RunMetrics::new(&registry).unwrap();

    let executors: Vec<Box<dyn Executor>> = vec![
        Box::new(
            AsyncQueryServiceExecutor::new(Arc::new(svc.clone()), store.clone(), compiler.clone())
                .with_metrics(metrics.clone()),
        ),
        Box::new(
            QueryServiceExecutor::new(
                Arc::new(QueryServiceBridge::new(svc)),
                store.clone(),
                compiler,
            )
            .with_metrics(metrics.clone()),
        ),
    ];

    let ok = store
        .create_task(ORG, USER, r#"option task = {name: "ok", every: 1m, concurrency: 2}
from(bucket: "one") |> range(start: -1h) |> mean()"#)
        .await
        .unwrap();
    let failing = store
        .create_task(ORG, USER, r#"option task = {name: "unbounded", every: 1m, concurrency: 2}
from(bucket: "one")"#)
        .await
        .unwrap();

    for ex in &executors {
        let run = store.create_run(ok, 120).await.unwrap();
        let res = ex.execute(&RunContext::new(), run).await.unwrap().wait().await.unwrap();
        assert!(res.err().is_none(), "{:?}", res.err());
        store.finish_run(ok, run.run_id).await.unwrap();

        let run = store.create_run(failing, 120).await.unwrap();
        let res = ex.execute(&RunContext::new(), run).await.unwrap().wait().await.unwrap();
        assert_eq!(
            res.err().map(|e| e.to_string()).as_deref(),
            Some("from: bounds must be set, use range()")
        );
        store.finish_run(failing, run.run_id).await.unwrap();
    }

    assert_eq!(metrics.total(outcome::SUCCESS), 2);
    assert_eq!(metrics.total(outcome::QUERY_ERROR), 2);
    assert_eq!(metrics.active(), 0);
}
