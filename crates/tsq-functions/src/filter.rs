use tsq_compile::{Administration, RowFunction};
use tsq_execute::{
    AccumulationMode, Administration as ExecuteAdministration, CachedTransformation, DatasetId,
    DatasetRef, ExecuteError, Table, TableBuilderCache, TableProcessor, TransformationRef,
};
use tsq_ir::semantic::FunctionExpression;
use tsq_ir::{Arguments, FilterOpSpec, FunctionSignature, OperationSpec, Type, Value, ValueError};
use tsq_plan::{
    procedure_spec_common, Administration as PlanAdministration, PlanError, ProcedureKind,
    ProcedureSpec,
};
use tsq_registry::FatalError;

use crate::{downcast, lambda_expr, operation_error, row_function, Registries};

pub const FILTER_KIND: ProcedureKind = "filter";

pub(crate) fn register(r: &mut Registries) -> Result<(), FatalError> {
    r.functions.register_function(
        "filter",
        create_filter_op,
        FunctionSignature::new(Type::Table)
            .pipe("table", Type::Table)
            .required("fn", Type::Function(Box::new(FunctionSignature::new(Type::Bool)))),
    )?;
    r.procedures.register(FILTER_KIND, create_procedure, &["filter"])?;
    r.transformations
        .register_transformation(FILTER_KIND, create_transformation)
}

fn create_filter_op(args: &mut Arguments, _: &mut Administration) -> Result<OperationSpec, ValueError> {
    let func = lambda_expr("fn", args.get_required_function("fn")?)?;
    Ok(OperationSpec::Filter(FilterOpSpec { func }))
}

#[derive(Debug, Clone)]
pub struct FilterProcedure {
    pub func: FunctionExpression,
}

impl ProcedureSpec for FilterProcedure {
    fn kind(&self) -> ProcedureKind {
        FILTER_KIND
    }

    procedure_spec_common!();
}

fn create_procedure(
    op: &OperationSpec,
    _: &dyn PlanAdministration,
) -> Result<Box<dyn ProcedureSpec>, PlanError> {
    match op {
        OperationSpec::Filter(spec) => Ok(Box::new(FilterProcedure {
            func: spec.func.clone(),
        })),
        other => Err(PlanError::invalid(
            FILTER_KIND,
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
    let spec = downcast::<FilterProcedure>(spec, FILTER_KIND)?;
    let func = row_function("filter", &spec.func)?;
    Ok(CachedTransformation::create(id, mode, admin, FilterProcessor { func }))
}

/// Keeps the rows the predicate accepts. Tables keep their key even when every row is
/// filtered out.
struct FilterProcessor {
    func: RowFunction,
}

impl TableProcessor for FilterProcessor {
    fn process(&mut self, table: &Table, cache: &mut TableBuilderCache) -> Result<(), ExecuteError> {
        let (builder, _) = cache.table_builder(table.key());
        builder.add_table_cols(table)?;
        let mapping: Vec<usize> = table
            .cols()
            .iter()
            .filter_map(|c| tsq_execute::col_idx(&c.label, builder.cols()))
            .collect();

        for row in 0..table.num_rows() {
            let keep = self
                .func
                .eval_bool(Value::from(table.row(row)))
                .map_err(|e| operation_error("filter", e))?;
            if !keep {
                continue;
            }
            for (src, &j) in mapping.iter().enumerate() {
                builder.append_value(j, &table.value(row, src))?;
            }
        }
        Ok(())
    }
}
