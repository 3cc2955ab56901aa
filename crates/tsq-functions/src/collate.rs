//! Pivots the values of one column into columns named by other columns
//!
//! For every distinct combination of `row_key` values a single row is written; each
//! distinct combination of `col_key` values becomes a column holding the `value_col`
//! value of the matching input row. `col_key` and `value_col` leave the group key.

use std::collections::HashMap;

use tsq_compile::Administration;
use tsq_execute::{
    col_idx, AccumulationMode, Administration as ExecuteAdministration, CachedTransformation,
    ColMeta, DatasetId, DatasetRef, ExecuteError, GroupKey, Table, TableBuilder,
    TableBuilderCache, TableProcessor, TransformationRef,
};
use tsq_ir::{
    Arguments, CollateOpSpec, FunctionSignature, OperationSpec, Type, Value, ValueError,
};
use tsq_plan::{
    procedure_spec_common, Administration as PlanAdministration, PlanError, ProcedureKind,
    ProcedureSpec,
};
use tsq_registry::FatalError;

use crate::{downcast, Registries};

pub const COLLATE_KIND: ProcedureKind = "collate";

pub(crate) fn register(r: &mut Registries) -> Result<(), FatalError> {
    r.functions.register_function(
        "collate",
        create_collate_op,
        FunctionSignature::new(Type::Table)
            .pipe("table", Type::Table)
            .required("rowKey", Type::array(Type::String))
            .required("colKey", Type::array(Type::String))
            .required("valueCol", Type::String),
    )?;
    r.procedures.register(COLLATE_KIND, create_procedure, &["collate"])?;
    r.transformations
        .register_transformation(COLLATE_KIND, create_transformation)
}

fn create_collate_op(args: &mut Arguments, _: &mut Administration) -> Result<OperationSpec, ValueError> {
    let row_key = args.get_required_array("rowKey")?.to_strings()?;
    let col_key = args.get_required_array("colKey")?.to_strings()?;
    let value_col = args.get_required_string("valueCol")?;
    if col_key.is_empty() {
        return Err(ValueError::Invalid("collate requires at least one colKey column".to_string()));
    }
    Ok(OperationSpec::Collate(CollateOpSpec {
        row_key,
        col_key,
        value_col,
    }))
}

#[derive(Debug, Clone)]
pub struct CollateProcedure {
    pub row_key: Vec<String>,
    pub col_key: Vec<String>,
    pub value_col: String,
}

impl ProcedureSpec for CollateProcedure {
    fn kind(&self) -> ProcedureKind {
        COLLATE_KIND
    }

    procedure_spec_common!();
}

fn create_procedure(
    op: &OperationSpec,
    _: &dyn PlanAdministration,
) -> Result<Box<dyn ProcedureSpec>, PlanError> {
    match op {
        OperationSpec::Collate(spec) => Ok(Box::new(CollateProcedure {
            row_key: spec.row_key.clone(),
            col_key: spec.col_key.clone(),
            value_col: spec.value_col.clone(),
        })),
        other => Err(PlanError::invalid(
            COLLATE_KIND,
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
    let spec = downcast::<CollateProcedure>(spec, COLLATE_KIND)?;
    let processor = CollateProcessor::new(
        spec.row_key.clone(),
        spec.col_key.clone(),
        spec.value_col.clone(),
    );
    Ok(CachedTransformation::create(id, mode, admin, processor))
}

pub struct CollateProcessor {
    row_key: Vec<String>,
    col_key: Vec<String>,
    value_col: String,
}

impl CollateProcessor {
    pub fn new(row_key: Vec<String>, col_key: Vec<String>, value_col: String) -> Self {
        Self {
            row_key,
            col_key,
            value_col,
        }
    }

    fn lookup(&self, table: &Table, label: &str) -> Result<usize, ExecuteError> {
        col_idx(label, table.cols()).ok_or_else(|| {
            ExecuteError::operator(format!("collate error: column {label:?} doesn't exist"))
        })
    }
}

fn label_part(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl TableProcessor for CollateProcessor {
    fn process(&mut self, table: &Table, cache: &mut TableBuilderCache) -> Result<(), ExecuteError> {
        let key = table
            .key()
            .filter(|c| !self.col_key.contains(&c.label) && c.label != self.value_col);
        if cache.contains(&key) {
            return Err(ExecuteError::DuplicateTable(key.to_string()));
        }

        let row_idx = self
            .row_key
            .iter()
            .map(|l| self.lookup(table, l))
            .collect::<Result<Vec<_>, _>>()?;
        let col_idx_ = self
            .col_key
            .iter()
            .map(|l| self.lookup(table, l))
            .collect::<Result<Vec<_>, _>>()?;
        let value_idx = self.lookup(table, &self.value_col)?;
        let value_type = table.cols()[value_idx].col_type;

        let mut cols: Vec<ColMeta> = key.cols().to_vec();
        let row_cols: Vec<ColMeta> = row_idx.iter().map(|&j| table.cols()[j].clone()).collect();
        let extra_row_cols: Vec<usize> = row_cols
            .iter()
            .enumerate()
            .filter(|(_, c)| !key.has_col(&c.label))
            .map(|(i, _)| i)
            .collect();
        cols.extend(extra_row_cols.iter().map(|&i| row_cols[i].clone()));

        let mut rows: Vec<GroupKey> = Vec::new();
        let mut row_pos: HashMap<GroupKey, usize> = HashMap::new();
        let mut pivots: Vec<String> = Vec::new();
        let mut pivot_pos: HashMap<String, usize> = HashMap::new();
        let mut cells: HashMap<(usize, usize), Value> = HashMap::new();

        for row in 0..table.num_rows() {
            let rk = GroupKey::new(
                row_cols.clone(),
                row_idx.iter().map(|&j| table.value(row, j)).collect(),
            );
            let r = *row_pos.entry(rk.clone()).or_insert_with(|| {
                rows.push(rk);
                rows.len() - 1
            });
            let label = col_idx_
                .iter()
                .map(|&j| label_part(&table.value(row, j)))
                .collect::<Vec<_>>()
                .join("_");
            let p = match pivot_pos.get(&label) {
                Some(p) => *p,
                None => {
                    if col_idx(&label, &cols).is_some() {
                        return Err(ExecuteError::operator(format!(
                            "collate error: column {label:?} already exists"
                        )));
                    }
                    pivots.push(label.clone());
                    pivot_pos.insert(label, pivots.len() - 1);
                    pivots.len() - 1
                }
            };
            cells.insert((r, p), table.value(row, value_idx));
        }

        let mut builder = TableBuilder::new(key.clone(), cache.allocator().clone());
        for c in &cols {
            builder.add_col(c.clone())?;
        }
        for label in &pivots {
            builder.add_col(ColMeta::new(label.clone(), value_type))?;
        }
        for (r, rk) in rows.iter().enumerate() {
            let mut values: Vec<Value> = key.values().to_vec();
            values.extend(extra_row_cols.iter().map(|&i| rk.value(i).clone()));
            values.extend((0..pivots.len()).map(|p| {
                cells.remove(&(r, p)).unwrap_or_else(|| value_type.zero())
            }));
            builder.append_row(&values)?;
        }
        cache.insert(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tsq_execute::{Allocator, ColType, ColumnData};
    use tsq_ir::Time;

    fn table(host: &str, fields: &[(&str, i64, f64)]) -> Table {
        let cols = vec![
            ColMeta::new("host", ColType::String),
            ColMeta::new("_field", ColType::String),
            ColMeta::new("_time", ColType::Time),
            ColMeta::new("_value", ColType::Float),
        ];
        let key = GroupKey::new(vec![cols[0].clone()], vec![Value::from(host)]);
        let n = fields.len();
        Table::new(
            key,
            cols,
            vec![
                ColumnData::String(vec![host.to_string(); n]),
                ColumnData::String(fields.iter().map(|f| f.0.to_string()).collect()),
                ColumnData::Time(fields.iter().map(|f| Time::from_unix(f.1)).collect()),
                ColumnData::Float(fields.iter().map(|f| f.2).collect()),
            ],
        )
        .unwrap()
    }

    fn processor() -> CollateProcessor {
        CollateProcessor::new(vec!["_time".into()], vec!["_field".into()], "_value".into())
    }

    #[test]
    fn test_pivot_fields_into_columns() {
        let input = table("a", &[("usage", 1, 0.5), ("idle", 1, 0.4), ("usage", 2, 0.7)]);
        let mut cache = TableBuilderCache::new(Arc::new(Allocator::new(0)));
        processor().process(&input, &mut cache).unwrap();

        let out = cache.get(input.key()).unwrap().build().unwrap();
        let labels: Vec<&str> = out.cols().iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, ["host", "_time", "usage", "idle"]);
        assert_eq!(out.num_rows(), 2);
        assert_eq!(out.column_by_label("usage"), Some(&ColumnData::Float(vec![0.5, 0.7])));
        // no idle reading at t=2
        assert_eq!(out.column_by_label("idle"), Some(&ColumnData::Float(vec![0.4, 0.0])));
    }

    #[test]
    fn test_duplicate_key_leaves_cache_untouched() {
        let mut cache = TableBuilderCache::new(Arc::new(Allocator::new(0)));
        let mut p = processor();
        p.process(&table("a", &[("usage", 1, 0.5)]), &mut cache).unwrap();
        let before = cache.get(&table("a", &[]).key().clone()).unwrap().build().unwrap();

        let err = p
            .process(&table("a", &[("idle", 1, 0.1)]), &mut cache)
            .unwrap_err();
        assert_eq!(err, ExecuteError::DuplicateTable("{host=a}".to_string()));
        assert_eq!(err.to_string(), "found duplicate table with key: {host=a}");
        assert_eq!(cache.len(), 1);
        let after = cache.get(&table("a", &[]).key().clone()).unwrap().build().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_failed_append_leaves_no_partial_table() {
        let allocator = Arc::new(Allocator::new(1));
        let mut cache = TableBuilderCache::new(allocator.clone());
        let err = processor()
            .process(&table("a", &[("usage", 1, 0.5), ("idle", 1, 0.4)]), &mut cache)
            .unwrap_err();
        assert!(matches!(err, ExecuteError::MemoryLimit { limit: 1, .. }));
        assert!(cache.is_empty());
        assert_eq!(allocator.allocated(), 0);
    }

    #[test]
    fn test_missing_column() {
        let mut cache = TableBuilderCache::new(Arc::new(Allocator::new(0)));
        let mut p = CollateProcessor::new(vec!["_time".into()], vec!["cpu".into()], "_value".into());
        assert_eq!(
            p.process(&table("a", &[("usage", 1, 0.5)]), &mut cache),
            Err(ExecuteError::operator("collate error: column \"cpu\" doesn't exist"))
        );
        assert!(cache.is_empty());
    }
}
