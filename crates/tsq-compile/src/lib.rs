//! TSQ compiler
//!
//! Evaluates a query script with the registered builtins and turns the resulting
//! pipeline of table objects into a [`tsq_ir::Spec`].

mod builtin;
mod compiler;
mod error;
mod interpreter;
mod operators;
mod registry;
mod row;
mod spec_builder;

pub use builtin::{
    as_table, check_arguments, tables_from_object, Administration, CreateOperationSpec,
    NativeFunction, OperationFunction,
};
pub use compiler::Compiler;
pub use error::CompileError;
pub use interpreter::Interpreter;
pub use registry::FunctionRegistry;
pub use row::{resolve, RowFunction};
pub use spec_builder::{to_spec, NOW_OPTION};
