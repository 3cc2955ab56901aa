//! mean, sum and count
//!
//! Each input table becomes a single row holding its key columns and one aggregated
//! value per requested column. `sum` and `count` of `_value` can be computed by storage
//! instead, in which case the planner pushes them into `from`.

use std::fmt;

use tsq_compile::Administration;
use tsq_execute::{
    col_idx, AccumulationMode, Administration as ExecuteAdministration, CachedTransformation,
    ColMeta, ColType, ColumnData, DatasetId, DatasetRef, ExecuteError, Table,
    TableBuilderCache, TableProcessor, TransformationRef,
};
use tsq_ir::{
    AggregateOpSpec, Arguments, FunctionSignature, OperationSpec, Type, Value, ValueError,
    DEFAULT_VALUE_COL,
};
use tsq_plan::{
    procedure_spec_common, AggregateProcedureSpec, Administration as PlanAdministration,
    PlanError, ProcedureKind, ProcedureSpec, PushDownProcedureSpec, PushDownRoot, PushDownRule,
};
use tsq_registry::FatalError;
use tracing::trace;

use crate::from::{FromProcedure, FROM_KIND};
use crate::range::unaggregated;
use crate::storage::{AGGREGATE_COUNT, AGGREGATE_SUM};
use crate::{downcast, Registries};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMethod {
    Mean,
    Sum,
    Count,
}

impl AggregateMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateMethod::Mean => "mean",
            AggregateMethod::Sum => "sum",
            AggregateMethod::Count => "count",
        }
    }

    fn output_type(&self, input: ColType) -> Option<ColType> {
        match (self, input) {
            (AggregateMethod::Count, _) => Some(ColType::Int),
            (AggregateMethod::Mean, ColType::Int | ColType::UInt | ColType::Float) => {
                Some(ColType::Float)
            }
            (AggregateMethod::Sum, t @ (ColType::Int | ColType::UInt | ColType::Float)) => Some(t),
            _ => None,
        }
    }

    fn aggregate(&self, data: &ColumnData) -> Value {
        match (self, data) {
            (AggregateMethod::Count, d) => Value::Int(d.len() as i64),
            (AggregateMethod::Sum, ColumnData::Int(v)) => {
                Value::Int(v.iter().fold(0i64, |acc, x| acc.wrapping_add(*x)))
            }
            (AggregateMethod::Sum, ColumnData::UInt(v)) => {
                Value::UInt(v.iter().fold(0u64, |acc, x| acc.wrapping_add(*x)))
            }
            (AggregateMethod::Sum, ColumnData::Float(v)) => Value::Float(v.iter().sum()),
            (AggregateMethod::Mean, ColumnData::Int(v)) => mean(v.iter().map(|x| *x as f64)),
            (AggregateMethod::Mean, ColumnData::UInt(v)) => mean(v.iter().map(|x| *x as f64)),
            (AggregateMethod::Mean, ColumnData::Float(v)) => mean(v.iter().copied()),
            // output_type rejects everything else first
            _ => Value::Float(f64::NAN),
        }
    }
}

impl fmt::Display for AggregateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Value {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
    Value::Float(if n == 0 { f64::NAN } else { sum / n as f64 })
}

pub(crate) fn register(r: &mut Registries) -> Result<(), FatalError> {
    let signature = || {
        FunctionSignature::new(Type::Table)
            .pipe("table", Type::Table)
            .param("columns", Type::array(Type::String))
    };
    r.functions.register_function("mean", create_mean_op, signature())?;
    r.functions.register_function("sum", create_sum_op, signature())?;
    r.functions.register_function("count", create_count_op, signature())?;

    for method in [AggregateMethod::Mean, AggregateMethod::Sum, AggregateMethod::Count] {
        r.procedures
            .register(method.name(), create_procedure, &[method.name()])?;
        r.transformations
            .register_transformation(method.name(), create_transformation)?;
    }
    Ok(())
}

fn aggregate_op_spec(args: &mut Arguments) -> Result<AggregateOpSpec, ValueError> {
    let mut spec = AggregateOpSpec::default();
    if let Some(columns) = args.get_array("columns")? {
        spec.columns = columns.to_strings()?;
    }
    Ok(spec)
}

fn create_mean_op(args: &mut Arguments, _: &mut Administration) -> Result<OperationSpec, ValueError> {
    aggregate_op_spec(args).map(OperationSpec::Mean)
}

fn create_sum_op(args: &mut Arguments, _: &mut Administration) -> Result<OperationSpec, ValueError> {
    aggregate_op_spec(args).map(OperationSpec::Sum)
}

fn create_count_op(args: &mut Arguments, _: &mut Administration) -> Result<OperationSpec, ValueError> {
    aggregate_op_spec(args).map(OperationSpec::Count)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateProcedure {
    pub method: AggregateMethod,
    pub columns: Vec<String>,
}

impl AggregateProcedure {
    fn storage_method(&self) -> Option<&'static str> {
        if self.columns != [DEFAULT_VALUE_COL] {
            return None;
        }
        match self.method {
            AggregateMethod::Count => Some(AGGREGATE_COUNT),
            AggregateMethod::Sum => Some(AGGREGATE_SUM),
            AggregateMethod::Mean => None,
        }
    }
}

impl ProcedureSpec for AggregateProcedure {
    fn kind(&self) -> ProcedureKind {
        self.method.name()
    }

    procedure_spec_common!();

    fn as_push_down(&self) -> Option<&dyn PushDownProcedureSpec> {
        self.storage_method().map(|_| self as &dyn PushDownProcedureSpec)
    }

    fn as_aggregate(&self) -> Option<&dyn AggregateProcedureSpec> {
        self.storage_method().map(|_| self as &dyn AggregateProcedureSpec)
    }
}

impl PushDownProcedureSpec for AggregateProcedure {
    fn push_down_rules(&self) -> Vec<PushDownRule> {
        // a range still in the plan filters on another column, so only a direct parent
        vec![PushDownRule::new(FROM_KIND).matching(unaggregated)]
    }

    fn push_down(&self, root: &mut PushDownRoot<'_>) {
        let Some(method) = self.storage_method() else {
            return;
        };
        let target = if root.is_shared() {
            root.duplicate()
        } else {
            root.spec_mut()
        };
        if let Some(from) = target.and_then(|s| s.downcast_mut::<FromProcedure>()) {
            trace!(aggregate = method, "aggregate pushed into storage");
            from.aggregate = Some(method);
        }
    }
}

impl AggregateProcedureSpec for AggregateProcedure {
    fn aggregate_method(&self) -> &'static str {
        self.storage_method().unwrap_or(self.method.name())
    }

    /// Partial counts and sums are both combined by summing.
    fn re_aggregate_spec(&self) -> Box<dyn ProcedureSpec> {
        Box::new(AggregateProcedure {
            method: AggregateMethod::Sum,
            columns: self.columns.clone(),
        })
    }
}

fn create_procedure(
    op: &OperationSpec,
    _: &dyn PlanAdministration,
) -> Result<Box<dyn ProcedureSpec>, PlanError> {
    let (method, spec) = match op {
        OperationSpec::Mean(s) => (AggregateMethod::Mean, s),
        OperationSpec::Sum(s) => (AggregateMethod::Sum, s),
        OperationSpec::Count(s) => (AggregateMethod::Count, s),
        other => {
            return Err(PlanError::invalid(
                other.kind().as_str(),
                "not an aggregate".to_string(),
            ))
        }
    };
    if spec.columns.is_empty() {
        return Err(PlanError::invalid(method.name(), "no columns to aggregate"));
    }
    Ok(Box::new(AggregateProcedure {
        method,
        columns: spec.columns.clone(),
    }))
}

fn create_transformation(
    id: DatasetId,
    mode: AccumulationMode,
    spec: &dyn ProcedureSpec,
    admin: &ExecuteAdministration,
) -> Result<(TransformationRef, DatasetRef), ExecuteError> {
    let spec = downcast::<AggregateProcedure>(spec, "aggregate")?;
    let processor = AggregateProcessor {
        method: spec.method,
        columns: spec.columns.clone(),
    };
    Ok(CachedTransformation::create(id, mode, admin, processor))
}

struct AggregateProcessor {
    method: AggregateMethod,
    columns: Vec<String>,
}

impl TableProcessor for AggregateProcessor {
    fn process(&mut self, table: &Table, cache: &mut TableBuilderCache) -> Result<(), ExecuteError> {
        let mut outputs = Vec::with_capacity(self.columns.len());
        for label in &self.columns {
            let j = col_idx(label, table.cols()).ok_or_else(|| {
                ExecuteError::operator(format!(
                    "{} error: column {:?} doesn't exist",
                    self.method, label
                ))
            })?;
            let input = table.cols()[j].col_type;
            let output = self.method.output_type(input).ok_or_else(|| {
                ExecuteError::operator(format!(
                    "{} error: column {:?} of type {} is not numeric",
                    self.method, label, input
                ))
            })?;
            outputs.push((ColMeta::new(label.clone(), output), self.method.aggregate(table.column(j))));
        }

        let key = table.key();
        let builder = cache.create(key)?;
        for c in key.cols() {
            builder.add_col(c.clone())?;
        }
        for (meta, _) in &outputs {
            builder.add_col(meta.clone())?;
        }
        let row: Vec<Value> = key
            .values()
            .iter()
            .cloned()
            .chain(outputs.into_iter().map(|(_, v)| v))
            .collect();
        builder.append_row(&row)
    }
}
