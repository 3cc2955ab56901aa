//! Task storage
//!
//! [`Store`] is what the scheduler and the executors consume. [`InMemStore`] keeps
//! everything in process memory.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;
use tsq_compile::Compiler;
use tsq_ir::Time;

use crate::model::{Id, QueuedRun, StoreTask};
use crate::options::{OptionsError, TaskOptions};

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("organization ID required")]
    MissingOrg,

    #[error("user ID required")]
    MissingUser,

    #[error("task ID required")]
    MissingId,

    #[error("script required")]
    MissingScript,

    #[error("invalid task script: {0}")]
    Options(#[from] OptionsError),

    #[error("task {0} not found")]
    TaskNotFound(Id),

    #[error("run {run} of task {task} not found")]
    RunNotFound { task: Id, run: Id },

    #[error("task {task} already has {running} run(s) in progress, MaxConcurrency is {max}")]
    MaxConcurrency { task: Id, running: usize, max: i64 },

    #[error("page size {0} out of range, must be between 0 and {MAX_PAGE_SIZE}")]
    PageSize(i64),

    #[error("cannot search by both organization and user")]
    OrgAndUser,

    #[error("unauthorized")]
    Unauthorized,

    #[error("no authorization provided")]
    MissingAuthorization,
}

/// Filters for [`Store::list_tasks`]. A `page_size` of zero means [`DEFAULT_PAGE_SIZE`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchParams {
    pub org: Option<Id>,
    pub user: Option<Id>,
    /// Only tasks with an ID greater than this one.
    pub after: Option<Id>,
    pub page_size: i64,
}

impl SearchParams {
    fn validate(&self) -> Result<usize, StoreError> {
        if self.org.is_some() && self.user.is_some() {
            return Err(StoreError::OrgAndUser);
        }
        match self.page_size {
            0 => Ok(DEFAULT_PAGE_SIZE as usize),
            n if (1..=MAX_PAGE_SIZE).contains(&n) => Ok(n as usize),
            n => Err(StoreError::PageSize(n)),
        }
    }

    fn matches(&self, t: &StoreTask) -> bool {
        self.org.map_or(true, |org| org == t.org)
            && self.user.map_or(true, |user| user == t.user)
            && self.after.map_or(true, |after| t.id > after)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Stores a new task. The script must declare `option task` with at least a name.
    async fn create_task(&self, org: Id, user: Id, script: &str) -> Result<Id, StoreError>;

    async fn modify_task(&self, id: Id, script: &str) -> Result<(), StoreError>;

    /// Tasks ordered by ID.
    async fn list_tasks(&self, params: SearchParams) -> Result<Vec<StoreTask>, StoreError>;

    /// `None` when no task has `id`.
    async fn find_task_by_id(&self, id: Id) -> Result<Option<StoreTask>, StoreError>;

    /// False when no task had `id`.
    async fn delete_task(&self, id: Id) -> Result<bool, StoreError>;

    /// Starts a run, failing when the task already runs at its concurrency limit.
    async fn create_run(&self, task_id: Id, now: i64) -> Result<QueuedRun, StoreError>;

    async fn finish_run(&self, task_id: Id, run_id: Id) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Inner {
    tasks: BTreeMap<Id, StoreTask>,
    running: BTreeMap<Id, BTreeSet<Id>>,
    last_id: u64,
}

impl Inner {
    fn next_id(&mut self) -> Id {
        self.last_id += 1;
        Id(self.last_id)
    }
}

/// Store keeping tasks and runs in memory. Scripts are evaluated with `compiler` to read
/// their options.
pub struct InMemStore {
    compiler: Compiler,
    inner: RwLock<Inner>,
}

impl InMemStore {
    pub fn new(compiler: Compiler) -> Self {
        Self {
            compiler,
            inner: RwLock::new(Inner::default()),
        }
    }

    fn options(&self, script: &str) -> Result<TaskOptions, StoreError> {
        if script.trim().is_empty() {
            return Err(StoreError::MissingScript);
        }
        Ok(TaskOptions::from_script(&self.compiler, script, Time::now())?)
    }
}

#[async_trait]
impl Store for InMemStore {
    async fn create_task(&self, org: Id, user: Id, script: &str) -> Result<Id, StoreError> {
        if !org.is_valid() {
            return Err(StoreError::MissingOrg);
        }
        if !user.is_valid() {
            return Err(StoreError::MissingUser);
        }
        let options = self.options(script)?;

        let mut inner = self.inner.write();
        let id = inner.next_id();
        debug!(task_id = %id, name = %options.name, "created task");
        inner.tasks.insert(
            id,
            StoreTask {
                id,
                org,
                user,
                name: options.name.clone(),
                script: script.to_string(),
                options,
            },
        );
        Ok(id)
    }

    async fn modify_task(&self, id: Id, script: &str) -> Result<(), StoreError> {
        if !id.is_valid() {
            return Err(StoreError::MissingId);
        }
        let options = self.options(script)?;

        let mut inner = self.inner.write();
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(StoreError::TaskNotFound(id))?;
        task.name = options.name.clone();
        task.script = script.to_string();
        task.options = options;
        Ok(())
    }

    async fn list_tasks(&self, params: SearchParams) -> Result<Vec<StoreTask>, StoreError> {
        let limit = params.validate()?;
        let inner = self.inner.read();
        Ok(inner
            .tasks
            .values()
            .filter(|t| params.matches(t))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_task_by_id(&self, id: Id) -> Result<Option<StoreTask>, StoreError> {
        Ok(self.inner.read().tasks.get(&id).cloned())
    }

    async fn delete_task(&self, id: Id) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        inner.running.remove(&id);
        Ok(inner.tasks.remove(&id).is_some())
    }

    async fn create_run(&self, task_id: Id, now: i64) -> Result<QueuedRun, StoreError> {
        let mut inner = self.inner.write();
        let max = inner
            .tasks
            .get(&task_id)
            .map(|t| t.options.concurrency)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        let running = inner.running.get(&task_id).map_or(0, |r| r.len());
        if running as i64 >= max {
            return Err(StoreError::MaxConcurrency {
                task: task_id,
                running,
                max,
            });
        }

        let run_id = inner.next_id();
        inner.running.entry(task_id).or_default().insert(run_id);
        Ok(QueuedRun {
            task_id,
            run_id,
            now,
        })
    }

    async fn finish_run(&self, task_id: Id, run_id: Id) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let removed = inner
            .running
            .get_mut(&task_id)
            .map_or(false, |runs| runs.remove(&run_id));
        if !removed {
            return Err(StoreError::RunNotFound {
                task: task_id,
                run: run_id,
            });
        }
        Ok(())
    }
}
