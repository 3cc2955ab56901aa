use std::sync::Arc;

use parking_lot::Mutex;
use tsq_compile::Administration;
use tsq_execute::{
    AccumulationMode, Administration as ExecuteAdministration, DatasetId, DatasetRef,
    ExecuteError, GroupKey, Table, Transformation, TransformationRef,
};
use tsq_ir::{Arguments, FunctionSignature, OperationSpec, Time, Type, ValueError, YieldOpSpec};
use tsq_plan::{
    procedure_spec_common, Administration as PlanAdministration, PlanError, ProcedureKind,
    ProcedureSpec, YieldProcedureSpec,
};
use tsq_registry::FatalError;

use crate::{downcast, Registries};

pub const YIELD_KIND: ProcedureKind = "yield";

pub(crate) fn register(r: &mut Registries) -> Result<(), FatalError> {
    r.functions.register_function_with_side_effect(
        "yield",
        create_yield_op,
        FunctionSignature::new(Type::Table)
            .pipe("table", Type::Table)
            .param("name", Type::String),
    )?;
    r.procedures.register(YIELD_KIND, create_procedure, &["yield"])?;
    r.transformations
        .register_transformation(YIELD_KIND, create_transformation)
}

fn create_yield_op(args: &mut Arguments, _: &mut Administration) -> Result<OperationSpec, ValueError> {
    let mut spec = YieldOpSpec::default();
    if let Some(name) = args.get_string("name")? {
        spec.name = name;
    }
    Ok(OperationSpec::Yield(spec))
}

/// Names its input as a query result.
#[derive(Debug, Clone)]
pub struct YieldProcedure {
    pub name: String,
}

impl ProcedureSpec for YieldProcedure {
    fn kind(&self) -> ProcedureKind {
        YIELD_KIND
    }

    procedure_spec_common!();

    fn as_yield(&self) -> Option<&dyn YieldProcedureSpec> {
        Some(self)
    }
}

impl YieldProcedureSpec for YieldProcedure {
    fn yield_name(&self) -> &str {
        &self.name
    }
}

fn create_procedure(
    op: &OperationSpec,
    _: &dyn PlanAdministration,
) -> Result<Box<dyn ProcedureSpec>, PlanError> {
    match op {
        OperationSpec::Yield(spec) => Ok(Box::new(YieldProcedure {
            name: spec.name.clone(),
        })),
        other => Err(PlanError::invalid(
            YIELD_KIND,
            format!("unexpected {} spec", other.kind()),
        )),
    }
}

fn create_transformation(
    id: DatasetId,
    mode: AccumulationMode,
    spec: &dyn ProcedureSpec,
    admin: &ExecuteAdministration,
) -> Result<(TransformationRef, DatasetRef), ExecuteError> {
    downcast::<YieldProcedure>(spec, YIELD_KIND)?;
    let d = admin.dataset(id, mode).into_ref();
    let t: TransformationRef = Arc::new(Mutex::new(Passthrough { d: d.clone() }));
    Ok((t, d))
}

/// Hands every table to the children unchanged.
struct Passthrough {
    d: DatasetRef,
}

impl Transformation for Passthrough {
    fn retract_table(&mut self, _: DatasetId, key: &GroupKey) -> Result<(), ExecuteError> {
        self.d.lock().retract_table(key)
    }

    fn process(&mut self, _: DatasetId, table: Arc<Table>) -> Result<(), ExecuteError> {
        self.d.lock().forward(table)
    }

    fn update_watermark(&mut self, _: DatasetId, mark: Time) -> Result<(), ExecuteError> {
        self.d.lock().update_watermark(mark)
    }

    fn update_processing_time(&mut self, _: DatasetId, t: Time) -> Result<(), ExecuteError> {
        self.d.lock().update_processing_time(t)
    }

    fn finish(&mut self, _: DatasetId, err: Option<ExecuteError>) {
        self.d.lock().finish(err)
    }
}
