use thiserror::Error;
use tsq_ast::ParseError;
use tsq_ir::{Kind, SpecError, ValueError};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("undefined identifier {0:?}")]
    Undefined(String),

    #[error("option {0:?} is not set")]
    MissingOption(String),

    #[error("cannot call a value of kind {0}")]
    NotCallable(Kind),

    #[error("function {0} does not accept a piped argument")]
    NoPipeArgument(String),

    #[error("property {0:?} not found")]
    MissingProperty(String),

    #[error("{0}")]
    Eval(String),

    #[error("function registry is not frozen")]
    NotFrozen,
}
