use thiserror::Error;
use tsq_ir::Kind;

use crate::dataset::DatasetId;

/// Errors raised while executing a plan. Cloned when one failure finishes several
/// downstream transformations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecuteError {
    #[error("found duplicate table with key: {0}")]
    DuplicateTable(String),

    #[error("column {label:?} is of type {actual}, not {expected}")]
    ColumnType {
        label: String,
        expected: Kind,
        actual: Kind,
    },

    #[error("invalid table: {0}")]
    InvalidTable(String),

    /// Operator errors such as `rename error: column "x" doesn't exist`.
    #[error("{0}")]
    Operator(String),

    #[error("invalid spec type for procedure {0:?}")]
    InvalidSpec(&'static str),

    #[error("no transformation registered for procedure kind {0:?}")]
    NoTransformation(String),

    #[error("no source registered for procedure kind {0:?}")]
    NoSource(String),

    #[error("memory limit exceeded: allocating {requested} bytes with {allocated} of {limit} in use")]
    MemoryLimit {
        requested: usize,
        allocated: usize,
        limit: usize,
    },

    #[error("missing dependency {0:?}")]
    MissingDependency(&'static str),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transformation registry is not frozen")]
    NotFrozen,

    #[error("query canceled")]
    Canceled,

    #[error("dataset {0} received a table after it finished")]
    Finished(DatasetId),
}

impl ExecuteError {
    pub fn operator(message: impl Into<String>) -> Self {
        ExecuteError::Operator(message.into())
    }
}
