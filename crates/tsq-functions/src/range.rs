use tsq_compile::Administration;
use tsq_execute::{
    col_idx, AccumulationMode, Administration as ExecuteAdministration, CachedTransformation,
    ColMeta, ColType, DatasetId, DatasetRef, ExecuteError, GroupKey, Table, TableBuilderCache,
    TableProcessor, TransformationRef,
};
use tsq_ir::{
    Arguments, FunctionSignature, OperationSpec, RangeOpSpec, Time, Type, Value, ValueError,
    DEFAULT_TIME_COL,
};
use tsq_plan::{
    procedure_spec_common, Administration as PlanAdministration, BoundedProcedureSpec,
    BoundsSpec, PlanError, ProcedureKind, ProcedureSpec, PushDownProcedureSpec, PushDownRoot,
    PushDownRule,
};
use tsq_registry::FatalError;

use crate::from::{FromProcedure, FROM_KIND};
use crate::{downcast, Registries};

pub const RANGE_KIND: ProcedureKind = "range";

pub(crate) fn register(r: &mut Registries) -> Result<(), FatalError> {
    r.functions.register_function(
        "range",
        create_range_op,
        FunctionSignature::new(Type::Table)
            .pipe("table", Type::Table)
            .required("start", Type::time_like())
            .param("stop", Type::time_like())
            .param("timeCol", Type::String)
            .param("startCol", Type::String)
            .param("stopCol", Type::String),
    )?;
    r.procedures.register(RANGE_KIND, create_procedure, &["range"])?;
    r.transformations
        .register_transformation(RANGE_KIND, create_transformation)
}

fn create_range_op(args: &mut Arguments, _: &mut Administration) -> Result<OperationSpec, ValueError> {
    let mut spec = RangeOpSpec::new(args.get_required_time("start")?);
    if let Some(stop) = args.get_time("stop")? {
        spec.stop = stop;
    }
    if let Some(col) = args.get_string("timeCol")? {
        spec.time_col = col;
    }
    if let Some(col) = args.get_string("startCol")? {
        spec.start_col = col;
    }
    if let Some(col) = args.get_string("stopCol")? {
        spec.stop_col = col;
    }
    Ok(OperationSpec::Range(spec))
}

#[derive(Debug, Clone)]
pub struct RangeProcedure {
    pub bounds: BoundsSpec,
    pub time_col: String,
    pub start_col: String,
    pub stop_col: String,
}

impl ProcedureSpec for RangeProcedure {
    fn kind(&self) -> ProcedureKind {
        RANGE_KIND
    }

    procedure_spec_common!();

    fn as_bounded(&self) -> Option<&dyn BoundedProcedureSpec> {
        Some(self)
    }

    fn as_push_down(&self) -> Option<&dyn PushDownProcedureSpec> {
        Some(self)
    }
}

impl BoundedProcedureSpec for RangeProcedure {
    fn time_bounds(&self) -> BoundsSpec {
        self.bounds
    }
}

impl PushDownProcedureSpec for RangeProcedure {
    fn push_down_rules(&self) -> Vec<PushDownRule> {
        // storage filters on the point time only
        if self.time_col != DEFAULT_TIME_COL {
            return Vec::new();
        }
        vec![PushDownRule::new(FROM_KIND).matching(unaggregated)]
    }

    fn push_down(&self, root: &mut PushDownRoot<'_>) {
        let now = root.now();
        let target = if root.is_shared() {
            root.duplicate()
        } else {
            root.spec_mut()
        };
        if let Some(from) = target.and_then(|s| s.downcast_mut::<FromProcedure>()) {
            from.bounds = Some(match from.bounds {
                Some(bounds) => bounds.intersect(&self.bounds, now),
                None => self.bounds,
            });
        }
    }
}

/// Rows of an aggregating read no longer carry the point time a range filters on.
pub(crate) fn unaggregated(spec: &dyn ProcedureSpec) -> bool {
    spec.downcast_ref::<FromProcedure>()
        .map_or(false, |from| from.aggregate.is_none())
}

fn create_procedure(
    op: &OperationSpec,
    _: &dyn PlanAdministration,
) -> Result<Box<dyn ProcedureSpec>, PlanError> {
    let OperationSpec::Range(spec) = op else {
        return Err(PlanError::invalid(RANGE_KIND, format!("unexpected {} spec", op.kind())));
    };
    Ok(Box::new(RangeProcedure {
        bounds: BoundsSpec::new(spec.start, spec.stop),
        time_col: spec.time_col.clone(),
        start_col: spec.start_col.clone(),
        stop_col: spec.stop_col.clone(),
    }))
}

fn create_transformation(
    id: DatasetId,
    mode: AccumulationMode,
    spec: &dyn ProcedureSpec,
    admin: &ExecuteAdministration,
) -> Result<(TransformationRef, DatasetRef), ExecuteError> {
    let spec = downcast::<RangeProcedure>(spec, RANGE_KIND)?;
    let stop = if spec.bounds.stop.is_zero() {
        admin.now()
    } else {
        admin.resolve_time(spec.bounds.stop)
    };
    let processor = RangeProcessor {
        start: admin.resolve_time(spec.bounds.start),
        stop,
        time_col: spec.time_col.clone(),
        start_col: spec.start_col.clone(),
        stop_col: spec.stop_col.clone(),
    };
    Ok(CachedTransformation::create(id, mode, admin, processor))
}

/// Keeps rows with a time in `[start, stop)` and narrows the `_start`/`_stop` of each
/// table to the range, adding them as key columns when missing.
pub(crate) struct RangeProcessor {
    start: Time,
    stop: Time,
    time_col: String,
    start_col: String,
    stop_col: String,
}

impl RangeProcessor {
    fn bounds_for(&self, key: &GroupKey) -> (Time, Time) {
        let start = match key.label_value(&self.start_col) {
            Some(Value::Time(t)) => self.start.max(*t),
            _ => self.start,
        };
        let stop = match key.label_value(&self.stop_col) {
            Some(Value::Time(t)) => self.stop.min(*t),
            _ => self.stop,
        };
        (start, stop)
    }

    fn key_for(&self, key: &GroupKey, start: Time, stop: Time) -> GroupKey {
        let mut cols = key.cols().to_vec();
        let mut values = key.values().to_vec();
        for (label, t) in [(&self.start_col, start), (&self.stop_col, stop)] {
            match col_idx(label, &cols) {
                Some(j) => values[j] = Value::Time(t),
                None => {
                    cols.push(ColMeta::new(label.clone(), ColType::Time));
                    values.push(Value::Time(t));
                }
            }
        }
        GroupKey::new(cols, values)
    }
}

impl TableProcessor for RangeProcessor {
    fn process(&mut self, table: &Table, cache: &mut TableBuilderCache) -> Result<(), ExecuteError> {
        let time_idx = col_idx(&self.time_col, table.cols()).ok_or_else(|| {
            ExecuteError::operator(format!(
                "range error: column {:?} doesn't exist",
                self.time_col
            ))
        })?;
        let (start, stop) = self.bounds_for(table.key());
        let key = self.key_for(table.key(), start, stop);

        let (builder, _) = cache.table_builder(&key);
        builder.add_table_cols(table)?;
        let start_j = builder.ensure_col(&ColMeta::new(self.start_col.clone(), ColType::Time))?;
        let stop_j = builder.ensure_col(&ColMeta::new(self.stop_col.clone(), ColType::Time))?;
        let mapping: Vec<Option<usize>> = builder
            .cols()
            .iter()
            .map(|c| col_idx(&c.label, table.cols()))
            .collect();

        for row in 0..table.num_rows() {
            let t = match table.value(row, time_idx) {
                Value::Time(t) => t,
                other => {
                    return Err(ExecuteError::ColumnType {
                        label: self.time_col.clone(),
                        expected: tsq_ir::Kind::Time,
                        actual: other.kind(),
                    })
                }
            };
            if t < start || t >= stop {
                continue;
            }
            for (j, src) in mapping.iter().enumerate() {
                let v = if j == start_j {
                    Value::Time(start)
                } else if j == stop_j {
                    Value::Time(stop)
                } else {
                    match src {
                        Some(i) => table.value(row, *i),
                        None => {
                            return Err(ExecuteError::InvalidTable(format!(
                                "table is missing column {:?}",
                                builder.cols()[j].label
                            )))
                        }
                    }
                };
                builder.append_value(j, &v)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tsq_execute::{Allocator, ColumnData};

    fn processor() -> RangeProcessor {
        RangeProcessor {
            start: Time::from_unix(10),
            stop: Time::from_unix(30),
            time_col: "_time".into(),
            start_col: "_start".into(),
            stop_col: "_stop".into(),
        }
    }

    #[test]
    fn test_filters_rows_and_adds_bounds() {
        let cols = vec![
            ColMeta::new("_time", ColType::Time),
            ColMeta::new("_value", ColType::Float),
        ];
        let times = [5, 10, 29, 30].map(Time::from_unix).to_vec();
        let table = Table::new(
            GroupKey::default(),
            cols,
            vec![ColumnData::Time(times), ColumnData::Float(vec![1.0, 2.0, 3.0, 4.0])],
        )
        .unwrap();

        let mut cache = TableBuilderCache::new(Arc::new(Allocator::new(0)));
        processor().process(&table, &mut cache).unwrap();

        let key = cache.keys().pop().unwrap();
        assert_eq!(key.label_value("_start"), Some(&Value::Time(Time::from_unix(10))));
        assert_eq!(key.label_value("_stop"), Some(&Value::Time(Time::from_unix(30))));
        let out = cache.get(&key).unwrap().build().unwrap();
        assert_eq!(out.column_by_label("_value"), Some(&ColumnData::Float(vec![2.0, 3.0])));
    }

    #[test]
    fn test_missing_time_column() {
        let table = Table::new(
            GroupKey::default(),
            vec![ColMeta::new("_value", ColType::Float)],
            vec![ColumnData::Float(vec![1.0])],
        )
        .unwrap();
        let mut cache = TableBuilderCache::new(Arc::new(Allocator::new(0)));
        assert_eq!(
            processor().process(&table, &mut cache),
            Err(ExecuteError::operator("range error: column \"_time\" doesn't exist"))
        );
    }
}
