//! TSQ builtin operations
//!
//! Every operation a query can call is registered three times: as a function the
//! compiler evaluates, as a procedure the planner creates from the operation spec, and
//! as the source or transformation the executor runs. [`Registries::builtin`] does all
//! three for the whole set.

mod aggregate;
mod collate;
mod filter;
mod from;
mod join;
mod range;
mod schema;
pub mod storage;
mod yields;

use tsq_compile::{CompileError, FunctionRegistry, RowFunction};
use tsq_execute::{ExecuteError, TransformationRegistry};
use tsq_ir::semantic::FunctionExpression;
use tsq_ir::{Function, ValueError};
use tsq_plan::{ProcedureRegistry, ProcedureSpec};
use tsq_registry::FatalError;

pub use aggregate::{AggregateMethod, AggregateProcedure};
pub use collate::{CollateProcedure, CollateProcessor};
pub use filter::FilterProcedure;
pub use from::FromProcedure;
pub use join::JoinProcedure;
pub use range::RangeProcedure;
pub use schema::{BuilderContext, SchemaMutation, SchemaMutationProcedure};
pub use storage::{
    BucketRef, MemoryStorage, Point, ReadSpec, StorageReader, StorageRef, STORAGE_DEPENDENCY,
};
pub use yields::YieldProcedure;

/// Helpers written in the query language itself, evaluated when the registries freeze.
const HELPERS: &str = r#"
window_mean = (table=<-, start) => table |> range(start: start) |> mean()
"#;

/// The three registries a query passes through.
#[derive(Default)]
pub struct Registries {
    pub functions: FunctionRegistry,
    pub procedures: ProcedureRegistry,
    pub transformations: TransformationRegistry,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registries holding every builtin operation. They are not frozen yet so callers
    /// can add options or operations of their own.
    pub fn builtin() -> Result<Self, FatalError> {
        let mut r = Self::new();
        register_all(&mut r)?;
        Ok(r)
    }

    pub fn freeze(&mut self) -> Result<(), FatalError> {
        self.functions.freeze()?;
        self.procedures.freeze();
        self.transformations.freeze();
        Ok(())
    }
}

pub fn register_all(r: &mut Registries) -> Result<(), FatalError> {
    from::register(r)?;
    range::register(r)?;
    filter::register(r)?;
    aggregate::register(r)?;
    yields::register(r)?;
    join::register(r)?;
    collate::register(r)?;
    schema::register(r)?;
    r.functions.register_builtin_script("helpers", HELPERS)
}

pub(crate) fn downcast<'a, T: ProcedureSpec + 'static>(
    spec: &'a dyn ProcedureSpec,
    kind: &'static str,
) -> Result<&'a T, ExecuteError> {
    spec.downcast_ref::<T>().ok_or(ExecuteError::InvalidSpec(kind))
}

/// Row functions are stored in operation specs as expressions, so only literals qualify.
pub(crate) fn lambda_expr(name: &str, f: Function) -> Result<FunctionExpression, ValueError> {
    match f {
        Function::Lambda(l) => tsq_compile::resolve(&l),
        Function::Builtin(b) => Err(ValueError::Invalid(format!(
            "argument {:?} must be a function literal, got builtin {}",
            name,
            b.name()
        ))),
    }
}

pub(crate) fn row_function(
    operation: &str,
    expr: &FunctionExpression,
) -> Result<RowFunction, ExecuteError> {
    RowFunction::new(expr.clone()).map_err(|e| operation_error(operation, e))
}

pub(crate) fn operation_error(operation: &str, e: CompileError) -> ExecuteError {
    ExecuteError::operator(format!("{operation} error: {e}"))
}
