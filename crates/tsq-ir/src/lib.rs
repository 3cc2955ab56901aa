//! TSQ intermediate representation
//!
//! Runtime values and their types, the semantic program the interpreter evaluates,
//! pipeline nodes, operation specs and the compiled [`Spec`].
//! Everything that crosses a process boundary is serde-serializable.

mod arguments;
pub mod operations;
pub mod semantic;
mod spec;
mod table;
mod time;
mod types;
mod values;

pub use arguments::{to_query_time, Arguments};
pub use operations::*;
pub use spec::{Edge, Operation, OperationId, OperationKind, Spec, SpecError};
pub use table::{TableArena, TableId, TableObject, TABLE_KIND_KEY, TABLE_PARENTS_KEY};
pub use time::{Duration, QueryTime, Time, TimeError};
pub use types::{FunctionSignature, Kind, Type};
pub use values::{
    Array, BuiltinFunction, Function, Lambda, Object, Record, UnexpectedKind, Value, ValueError,
};
