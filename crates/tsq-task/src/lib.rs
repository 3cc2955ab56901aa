//! Scheduled query tasks
//!
//! A task is a script declaring `option task = {...}`. Stores keep tasks and their
//! in-progress runs; executors run one queued run at a time and hand back a
//! [`RunPromise`] for its outcome.

pub mod executor;
pub mod metrics;
pub mod model;
pub mod options;
pub mod promise;
pub mod store;
pub mod validator;

pub use executor::{AsyncQueryServiceExecutor, Executor, QueryServiceExecutor};
pub use metrics::RunMetrics;
pub use model::{Id, QueuedRun, RunResult, StoreTask};
pub use options::{register_options, OptionsError, TaskOptions, TASK_OPTION};
pub use promise::{ExecutorError, RunContext, RunPromise};
pub use store::{InMemStore, SearchParams, Store, StoreError};
pub use validator::{Action, Authorization, Permission, Resource, Validator};

use tsq_functions::Registries;
use tsq_registry::FatalError;

/// Builtin registries with the `task` option declared. Not frozen yet.
pub fn registries() -> Result<Registries, FatalError> {
    let mut r = Registries::builtin()?;
    register_options(&mut r.functions)?;
    Ok(r)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use tsq_compile::Compiler;

    pub fn compiler() -> Compiler {
        let mut r = super::registries().unwrap();
        r.freeze().unwrap();
        Compiler::new(Arc::new(r.functions))
    }
}
