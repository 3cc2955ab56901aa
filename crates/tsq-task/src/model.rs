use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tsq_query::QueryError;

use crate::options::TaskOptions;

/// Identifier of tasks, runs, organizations and users. Zero is never assigned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id(pub u64);

impl Id {
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Id {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(Id)
    }
}

/// A task as kept by a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreTask {
    pub id: Id,
    pub org: Id,
    pub user: Id,
    pub name: String,
    pub script: String,
    pub options: TaskOptions,
}

/// One requested execution of a task. `now` is in Unix seconds and becomes the query's
/// `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedRun {
    pub task_id: Id,
    pub run_id: Id,
    pub now: i64,
}

/// Terminal outcome of a run whose query was evaluated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    err: Option<QueryError>,
    retryable: bool,
}

impl RunResult {
    pub fn success() -> Self {
        Self::default()
    }

    /// Result of a query that ran to the end, failed if `err` is set.
    pub fn new(err: Option<QueryError>) -> Self {
        Self {
            err,
            retryable: false,
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn err(&self) -> Option<&QueryError> {
        self.err.as_ref()
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}
