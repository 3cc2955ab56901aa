//! TSQ planner
//!
//! Converts the operations of a [`tsq_ir::Spec`] into procedures, lets procedures push
//! their work into ancestors (e.g. `range` into `from`) and propagates time bounds down
//! the graph.

mod bounds;
mod error;
mod plan;
mod planner;
mod procedure;
mod registry;

pub use bounds::BoundsSpec;
pub use error::PlanError;
pub use plan::{PlanSpec, PushDownRoot, Resources, YieldSpec};
pub use planner::Planner;
pub use procedure::{
    AggregateProcedureSpec, BoundedProcedureSpec, ParentAwareProcedureSpec, Procedure,
    ProcedureId, ProcedureKind, ProcedureSpec, PushDownProcedureSpec, PushDownRule,
    YieldProcedureSpec,
};
pub use registry::{Administration, CreateProcedureSpec, ProcedureRegistry};
