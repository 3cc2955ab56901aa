use thiserror::Error;
use tsq_ir::SpecError;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("no procedure registered for operation kind {0:?}")]
    NoProcedure(String),

    #[error("invalid {kind} operation: {message}")]
    InvalidOperation { kind: String, message: String },

    #[error("found duplicate yield name {0:?}")]
    DuplicateYield(String),

    #[error("query has {0} results without a yield, name them with yield()")]
    UnnamedResults(usize),

    #[error("procedure registry is not frozen")]
    NotFrozen,
}

impl PlanError {
    pub fn invalid(kind: impl Into<String>, message: impl Into<String>) -> Self {
        PlanError::InvalidOperation {
            kind: kind.into(),
            message: message.into(),
        }
    }
}
