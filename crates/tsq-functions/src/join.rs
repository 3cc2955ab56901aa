//! Inner join of two named streams on a list of columns
//!
//! Tables are buffered per parent until both parents finished. Every left table is then
//! joined with every right table whose key agrees on the shared `on` columns. Output
//! tables are keyed by the left key restricted to `on`; the remaining columns of each
//! side are suffixed with `_<table name>`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use tsq_compile::{tables_from_object, Administration};
use tsq_execute::{
    col_idx, AccumulationMode, Administration as ExecuteAdministration, ColMeta, DatasetId,
    DatasetRef, ExecuteError, GroupKey, Table, TableBuilderCache, Transformation,
    TransformationRef,
};
use tsq_ir::{Arguments, FunctionSignature, JoinOpSpec, OperationSpec, Time, Type, ValueError};
use tsq_plan::{
    procedure_spec_common, Administration as PlanAdministration, ParentAwareProcedureSpec,
    PlanError, ProcedureId, ProcedureKind, ProcedureSpec,
};
use tsq_registry::FatalError;

use crate::{downcast, Registries};

pub const JOIN_KIND: ProcedureKind = "join";

pub(crate) fn register(r: &mut Registries) -> Result<(), FatalError> {
    r.functions.register_function(
        "join",
        create_join_op,
        FunctionSignature::new(Type::Table)
            .required("tables", Type::empty_object())
            .required("on", Type::array(Type::String)),
    )?;
    r.procedures.register(JOIN_KIND, create_procedure, &["join"])?;
    r.transformations
        .register_transformation(JOIN_KIND, create_transformation)
}

fn create_join_op(args: &mut Arguments, admin: &mut Administration) -> Result<OperationSpec, ValueError> {
    let tables = tables_from_object("tables", &args.get_required_object("tables")?)?;
    if tables.len() != 2 {
        return Err(ValueError::Invalid(format!(
            "join requires exactly two tables, got {}",
            tables.len()
        )));
    }
    if tables[0].1.id() == tables[1].1.id() {
        return Err(ValueError::Invalid(format!(
            "join requires two distinct tables, {:?} and {:?} are the same stream",
            tables[0].0, tables[1].0
        )));
    }
    let on = args.get_required_array("on")?.to_strings()?;
    if on.is_empty() {
        return Err(ValueError::Invalid("join requires at least one column in on".to_string()));
    }

    let mut spec = JoinOpSpec {
        on,
        ..Default::default()
    };
    for (name, table) in tables {
        spec.tables.push((name, table.id()));
        admin.add_parent(table);
    }
    Ok(OperationSpec::Join(spec))
}

#[derive(Debug, Clone)]
pub struct JoinProcedure {
    pub on: Vec<String>,
    /// Parent procedure mapped to the name its table was given in the query.
    pub table_names: BTreeMap<ProcedureId, String>,
}

impl ProcedureSpec for JoinProcedure {
    fn kind(&self) -> ProcedureKind {
        JOIN_KIND
    }

    procedure_spec_common!();

    fn as_parent_aware(&mut self) -> Option<&mut dyn ParentAwareProcedureSpec> {
        Some(self)
    }
}

impl ParentAwareProcedureSpec for JoinProcedure {
    fn parent_changed(&mut self, old: ProcedureId, new: ProcedureId) {
        if let Some(name) = self.table_names.remove(&old) {
            self.table_names.insert(new, name);
        }
    }
}

fn create_procedure(
    op: &OperationSpec,
    admin: &dyn PlanAdministration,
) -> Result<Box<dyn ProcedureSpec>, PlanError> {
    let OperationSpec::Join(spec) = op else {
        return Err(PlanError::invalid(JOIN_KIND, format!("unexpected {} spec", op.kind())));
    };
    Ok(Box::new(JoinProcedure {
        on: spec.on.clone(),
        table_names: spec
            .table_names
            .iter()
            .map(|(id, name)| (admin.convert_id(id), name.clone()))
            .collect(),
    }))
}

fn create_transformation(
    id: DatasetId,
    mode: AccumulationMode,
    spec: &dyn ProcedureSpec,
    admin: &ExecuteAdministration,
) -> Result<(TransformationRef, DatasetRef), ExecuteError> {
    let spec = downcast::<JoinProcedure>(spec, JOIN_KIND)?;
    let mut names = BTreeMap::new();
    for parent in admin.parents() {
        let name = spec.table_names.get(&parent.procedure_id()).ok_or_else(|| {
            ExecuteError::operator(format!("join error: parent {parent} has no table name"))
        })?;
        names.insert(*parent, name.clone());
    }

    let d = admin.dataset(id, mode).into_ref();
    let t: TransformationRef = Arc::new(Mutex::new(JoinTransformation {
        d: d.clone(),
        on: spec.on.clone(),
        names,
        tables: HashMap::new(),
        watermarks: HashMap::new(),
        finished: HashSet::new(),
    }));
    Ok((t, d))
}

struct JoinTransformation {
    d: DatasetRef,
    on: Vec<String>,
    names: BTreeMap<DatasetId, String>,
    tables: HashMap<DatasetId, Vec<Arc<Table>>>,
    watermarks: HashMap<DatasetId, Time>,
    finished: HashSet<DatasetId>,
}

enum Side {
    Left(usize),
    Right(usize),
}

impl JoinTransformation {
    fn join(&self, cache: &mut TableBuilderCache) -> Result<(), ExecuteError> {
        let mut sides: Vec<(&DatasetId, &String)> = self.names.iter().collect();
        sides.sort_by(|a, b| a.1.cmp(b.1));
        let [(left_id, left_name), (right_id, right_name)] = sides.as_slice() else {
            return Err(ExecuteError::operator(format!(
                "join error: expected two tables, got {}",
                sides.len()
            )));
        };

        let empty = Vec::new();
        let left = self.tables.get(*left_id).unwrap_or(&empty);
        let right = self.tables.get(*right_id).unwrap_or(&empty);
        debug!(left = left.len(), right = right.len(), "joining buffered tables");
        for l in left {
            for r in right {
                if self.keys_agree(l.key(), r.key()) {
                    self.join_tables(l, left_name, r, right_name, cache)?;
                }
            }
        }
        Ok(())
    }

    fn keys_agree(&self, left: &GroupKey, right: &GroupKey) -> bool {
        self.on.iter().all(|label| {
            match (left.label_value(label), right.label_value(label)) {
                (Some(l), Some(r)) => l.equal(r),
                _ => true,
            }
        })
    }

    fn on_columns(&self, table: &Table, name: &str) -> Result<Vec<usize>, ExecuteError> {
        self.on
            .iter()
            .map(|label| {
                col_idx(label, table.cols()).ok_or_else(|| {
                    ExecuteError::operator(format!(
                        "join error: column {label:?} doesn't exist in table {name:?}"
                    ))
                })
            })
            .collect()
    }

    fn join_tables(
        &self,
        left: &Table,
        left_name: &str,
        right: &Table,
        right_name: &str,
        cache: &mut TableBuilderCache,
    ) -> Result<(), ExecuteError> {
        let left_on = self.on_columns(left, left_name)?;
        let right_on = self.on_columns(right, right_name)?;

        let mut cols = Vec::new();
        let mut sources = Vec::new();
        for (&lj, &rj) in left_on.iter().zip(&right_on) {
            let (l, r) = (&left.cols()[lj], &right.cols()[rj]);
            if l.col_type != r.col_type {
                return Err(ExecuteError::ColumnType {
                    label: r.label.clone(),
                    expected: l.col_type.kind(),
                    actual: r.col_type.kind(),
                });
            }
            cols.push(l.clone());
            sources.push(Side::Left(lj));
        }
        for (j, c) in left.cols().iter().enumerate() {
            if !self.on.contains(&c.label) {
                cols.push(ColMeta::new(format!("{}_{}", c.label, left_name), c.col_type));
                sources.push(Side::Left(j));
            }
        }
        for (j, c) in right.cols().iter().enumerate() {
            if !self.on.contains(&c.label) {
                cols.push(ColMeta::new(format!("{}_{}", c.label, right_name), c.col_type));
                sources.push(Side::Right(j));
            }
        }

        let key = left.key().filter(|c| self.on.contains(&c.label));
        let (builder, _) = cache.table_builder(&key);
        let targets = cols
            .iter()
            .map(|c| builder.ensure_col(c))
            .collect::<Result<Vec<_>, _>>()?;

        let on_cols: Vec<ColMeta> = left_on.iter().map(|&j| left.cols()[j].clone()).collect();
        let row_key = |t: &Table, idx: &[usize], row: usize| {
            GroupKey::new(on_cols.clone(), idx.iter().map(|&j| t.value(row, j)).collect())
        };
        let mut right_rows: HashMap<GroupKey, Vec<usize>> = HashMap::new();
        for row in 0..right.num_rows() {
            right_rows
                .entry(row_key(right, &right_on, row))
                .or_default()
                .push(row);
        }

        for li in 0..left.num_rows() {
            let Some(matches) = right_rows.get(&row_key(left, &left_on, li)) else {
                continue;
            };
            for &ri in matches {
                for (src, &j) in sources.iter().zip(&targets) {
                    let v = match src {
                        Side::Left(c) => left.value(li, *c),
                        Side::Right(c) => right.value(ri, *c),
                    };
                    builder.append_value(j, &v)?;
                }
            }
        }
        Ok(())
    }
}

impl Transformation for JoinTransformation {
    fn retract_table(&mut self, id: DatasetId, key: &GroupKey) -> Result<(), ExecuteError> {
        if let Some(tables) = self.tables.get_mut(&id) {
            tables.retain(|t| t.key() != key);
        }
        Ok(())
    }

    fn process(&mut self, id: DatasetId, table: Arc<Table>) -> Result<(), ExecuteError> {
        if !self.names.contains_key(&id) {
            return Err(ExecuteError::operator(format!(
                "join error: table from unknown parent {id}"
            )));
        }
        self.tables.entry(id).or_default().push(table);
        Ok(())
    }

    /// Forwards the lowest watermark once every parent reported one.
    fn update_watermark(&mut self, id: DatasetId, mark: Time) -> Result<(), ExecuteError> {
        self.watermarks.insert(id, mark);
        if self.watermarks.len() < self.names.len() {
            return Ok(());
        }
        match self.watermarks.values().min() {
            Some(min) => self.d.lock().update_watermark(*min),
            None => Ok(()),
        }
    }

    fn update_processing_time(&mut self, _: DatasetId, t: Time) -> Result<(), ExecuteError> {
        self.d.lock().update_processing_time(t)
    }

    fn finish(&mut self, id: DatasetId, err: Option<ExecuteError>) {
        if let Some(e) = err {
            self.d.lock().finish(Some(e));
            return;
        }
        self.finished.insert(id);
        if self.finished.len() < self.names.len() {
            return;
        }
        let mut d = self.d.lock();
        let result = self.join(d.cache_mut());
        d.finish(result.err());
    }
}
