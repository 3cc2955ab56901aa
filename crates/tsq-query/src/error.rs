use std::sync::Arc;

use thiserror::Error;
use tsq_compile::CompileError;
use tsq_execute::ExecuteError;
use tsq_plan::PlanError;

/// Errors of a single query. Cloned into every reader of a failed query, so errors of
/// the compile and plan stages are shared behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error(transparent)]
    Compile(Arc<CompileError>),

    #[error(transparent)]
    Plan(Arc<PlanError>),

    #[error(transparent)]
    Execute(#[from] ExecuteError),

    #[error("query canceled")]
    Canceled,

    /// Failure reported by a query service implementation.
    #[error("{0}")]
    Service(String),
}

impl QueryError {
    pub fn service(msg: impl Into<String>) -> Self {
        QueryError::Service(msg.into())
    }
}

impl From<CompileError> for QueryError {
    fn from(e: CompileError) -> Self {
        QueryError::Compile(Arc::new(e))
    }
}

impl From<PlanError> for QueryError {
    fn from(e: PlanError) -> Self {
        QueryError::Plan(Arc::new(e))
    }
}

impl PartialEq for QueryError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (QueryError::Compile(a), QueryError::Compile(b)) => Arc::ptr_eq(a, b),
            (QueryError::Plan(a), QueryError::Plan(b)) => Arc::ptr_eq(a, b),
            (QueryError::Execute(a), QueryError::Execute(b)) => a == b,
            (QueryError::Canceled, QueryError::Canceled) => true,
            (QueryError::Service(a), QueryError::Service(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_errors_keep_message() {
        let err = QueryError::from(ExecuteError::operator("drop error: column \"x\" doesn't exist"));
        assert_eq!(err.to_string(), "drop error: column \"x\" doesn't exist");
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn test_shared_compile_error() {
        let err = QueryError::from(CompileError::NotFrozen);
        let copy = err.clone();
        assert_eq!(err, copy);
        assert_ne!(err, QueryError::from(CompileError::NotFrozen));
    }
}
