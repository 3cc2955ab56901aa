//! Compile, plan and execute behind one handle

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use tsq_compile::Compiler;
use tsq_execute::{Dependencies, Executor, Results};
use tsq_functions::Registries;
use tsq_ir::{Spec, Time};
use tsq_plan::{Planner, Resources};
use tsq_registry::FatalError;

use crate::error::QueryError;
use crate::service::Statistics;

/// The three query stages wired to one set of frozen registries.
#[derive(Clone)]
pub struct QueryEngine {
    compiler: Compiler,
    planner: Planner,
    executor: Executor,
}

impl QueryEngine {
    /// Freezes `registries` and builds the stages on top of them.
    pub fn new(mut registries: Registries, dependencies: Dependencies) -> Result<Self, FatalError> {
        registries.freeze()?;
        let Registries {
            functions,
            procedures,
            transformations,
        } = registries;
        Ok(Self {
            compiler: Compiler::new(Arc::new(functions)),
            planner: Planner::new(Arc::new(procedures)),
            executor: Executor::new(Arc::new(transformations), dependencies),
        })
    }

    /// Engine over the builtin operations only.
    pub fn builtin(dependencies: Dependencies) -> Result<Self, FatalError> {
        Self::new(Registries::builtin()?, dependencies)
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.planner = self.planner.with_resources(resources);
        self
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn compile(&self, script: &str, now: Time) -> Result<Spec, QueryError> {
        Ok(self.compiler.compile(script, now)?)
    }

    /// Plans and runs `spec`, blocking the calling thread until every source finished.
    #[instrument(skip_all, fields(operations = spec.operations.len()))]
    pub fn execute(
        &self,
        spec: &Spec,
        cancel: &CancellationToken,
        stats: &mut Statistics,
    ) -> Result<Results, QueryError> {
        let started = Instant::now();
        let plan = self.planner.plan(spec)?;
        stats.plan_duration = started.elapsed();
        stats.concurrency = plan.resources.concurrency_quota;

        let started = Instant::now();
        let results = self.executor.execute(&plan, cancel).map_err(|e| match e {
            tsq_execute::ExecuteError::Canceled => QueryError::Canceled,
            other => QueryError::Execute(other),
        })?;
        stats.execute_duration = started.elapsed();
        debug!(
            results = results.len(),
            plan_ms = stats.plan_duration.as_millis() as u64,
            execute_ms = stats.execute_duration.as_millis() as u64,
            "query finished"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsq_functions::{MemoryStorage, Point, StorageRef, STORAGE_DEPENDENCY};

    fn engine() -> QueryEngine {
        let storage = MemoryStorage::new();
        storage.write(
            "telegraf",
            [
                Point::new("cpu", "usage", Time::from_unix(10), 1.0).tag("host", "a"),
                Point::new("cpu", "usage", Time::from_unix(20), 3.0).tag("host", "a"),
            ],
        );
        let storage: StorageRef = Arc::new(storage);
        let mut deps = Dependencies::new();
        deps.insert(STORAGE_DEPENDENCY, storage);
        QueryEngine::builtin(deps).unwrap()
    }

    #[test]
    fn test_compile_and_execute() {
        let engine = engine();
        let spec = engine
            .compile(
                r#"from(bucket: "telegraf") |> range(start: -1m) |> mean()"#,
                Time::from_unix(60),
            )
            .unwrap();
        let mut stats = Statistics::default();
        let results = engine
            .execute(&spec, &CancellationToken::new(), &mut stats)
            .unwrap();
        let tables = &results["_result"];
        assert_eq!(tables.len(), 1);
        assert_eq!(
            tables[0].column_by_label("_value"),
            Some(&tsq_execute::ColumnData::Float(vec![2.0]))
        );
        assert_eq!(stats.concurrency, 1);
    }

    #[test]
    fn test_canceled_before_start() {
        let engine = engine();
        let spec = engine
            .compile(r#"from(bucket: "telegraf") |> range(start: -1m)"#, Time::from_unix(60))
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .execute(&spec, &cancel, &mut Statistics::default())
            .unwrap_err();
        assert_eq!(err, QueryError::Canceled);
    }

    #[test]
    fn test_compile_error() {
        let err = engine().compile("nope()", Time::from_unix(0)).unwrap_err();
        assert!(matches!(err, QueryError::Compile(_)), "{err}");
    }
}
