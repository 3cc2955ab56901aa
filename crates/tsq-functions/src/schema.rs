//! rename, drop, keep and duplicate
//!
//! The four operations only change the schema of a table, so they share one procedure
//! kind. A chain of them collapses into a single procedure at planning time and every
//! table is rewritten once with the combined list of mutations.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tsq_compile::{Administration, RowFunction};
use tsq_execute::{
    col_idx, AccumulationMode, Administration as ExecuteAdministration, CachedTransformation,
    ColMeta, DatasetId, DatasetRef, ExecuteError, GroupKey, Table, TableBuilderCache,
    TableProcessor, TransformationRef,
};
use tsq_ir::semantic::FunctionExpression;
use tsq_ir::{
    Arguments, DropOpSpec, DuplicateOpSpec, FunctionSignature, KeepOpSpec, OperationSpec,
    RenameOpSpec, Type, Value, ValueError,
};
use tsq_plan::{
    procedure_spec_common, Administration as PlanAdministration, PlanError, ProcedureKind,
    ProcedureSpec, PushDownProcedureSpec, PushDownRoot, PushDownRule,
};
use tsq_registry::FatalError;

use crate::{downcast, lambda_expr, operation_error, row_function, Registries};

pub const SCHEMA_MUTATION_KIND: ProcedureKind = "schema_mutation";

const OPERATIONS: [&str; 4] = ["rename", "drop", "keep", "duplicate"];

pub(crate) fn register(r: &mut Registries) -> Result<(), FatalError> {
    let column_fn = || Type::Function(Box::new(FunctionSignature::new(Type::String)));
    let predicate = || Type::Function(Box::new(FunctionSignature::new(Type::Bool)));
    let table = || FunctionSignature::new(Type::Table).pipe("table", Type::Table);

    r.functions.register_function(
        "rename",
        create_rename_op,
        table()
            .param("columns", Type::empty_object())
            .param("fn", column_fn()),
    )?;
    r.functions.register_function(
        "drop",
        create_drop_op,
        table()
            .param("columns", Type::array(Type::String))
            .param("fn", predicate()),
    )?;
    r.functions.register_function(
        "keep",
        create_keep_op,
        table()
            .param("columns", Type::array(Type::String))
            .param("fn", predicate()),
    )?;
    r.functions.register_function(
        "duplicate",
        create_duplicate_op,
        table()
            .required("column", Type::String)
            .required("as", Type::String),
    )?;

    r.procedures
        .register(SCHEMA_MUTATION_KIND, create_procedure, &OPERATIONS)?;
    r.transformations
        .register_transformation(SCHEMA_MUTATION_KIND, create_transformation)
}

/// Reads the optional `columns` and `fn` arguments, exactly one of which must be given.
fn columns_or_fn<T>(
    op: &str,
    args: &mut Arguments,
    columns: impl FnOnce(&mut Arguments) -> Result<Option<T>, ValueError>,
) -> Result<(Option<T>, Option<FunctionExpression>), ValueError> {
    let columns = columns(args)?;
    let func = args
        .get_function("fn")?
        .map(|f| lambda_expr("fn", f))
        .transpose()?;
    match (&columns, &func) {
        (Some(_), Some(_)) => Err(ValueError::Invalid(format!(
            "{op} error: cannot specify both columns and fn"
        ))),
        (None, None) => Err(ValueError::Invalid(format!(
            "{op} error: must specify one of columns or fn"
        ))),
        _ => Ok((columns, func)),
    }
}

fn string_array(args: &mut Arguments) -> Result<Option<Vec<String>>, ValueError> {
    args.get_array("columns")?.map(|a| a.to_strings()).transpose()
}

fn create_rename_op(args: &mut Arguments, _: &mut Administration) -> Result<OperationSpec, ValueError> {
    let (columns, func) = columns_or_fn("rename", args, |args| {
        let Some(object) = args.get_object("columns")? else {
            return Ok(None);
        };
        let mut columns = BTreeMap::new();
        let mut bad = None;
        object.range(|old, new| match new {
            Value::String(s) => {
                columns.insert(old.to_string(), s.clone());
            }
            other => bad = Some((old.to_string(), other.kind())),
        });
        match bad {
            Some((old, kind)) => Err(ValueError::Invalid(format!(
                "rename error: new name for column {old:?} must be a string, got {kind}"
            ))),
            None => Ok(Some(columns)),
        }
    })?;
    Ok(OperationSpec::Rename(RenameOpSpec { columns, func }))
}

fn create_drop_op(args: &mut Arguments, _: &mut Administration) -> Result<OperationSpec, ValueError> {
    let (columns, predicate) = columns_or_fn("drop", args, string_array)?;
    Ok(OperationSpec::Drop(DropOpSpec { columns, predicate }))
}

fn create_keep_op(args: &mut Arguments, _: &mut Administration) -> Result<OperationSpec, ValueError> {
    let (columns, predicate) = columns_or_fn("keep", args, string_array)?;
    Ok(OperationSpec::Keep(KeepOpSpec { columns, predicate }))
}

fn create_duplicate_op(args: &mut Arguments, _: &mut Administration) -> Result<OperationSpec, ValueError> {
    Ok(OperationSpec::Duplicate(DuplicateOpSpec {
        column: args.get_required_string("column")?,
        as_: args.get_required_string("as")?,
    }))
}

/// Columns, key and source column indexes of the table being rewritten.
#[derive(Debug, Clone)]
pub struct BuilderContext {
    cols: Vec<ColMeta>,
    key: GroupKey,
    /// Input column index of every output column.
    col_map: Vec<usize>,
}

impl BuilderContext {
    pub fn new(table: &Table) -> Self {
        Self {
            cols: table.cols().to_vec(),
            key: table.key().clone(),
            col_map: (0..table.cols().len()).collect(),
        }
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn col_map(&self) -> &[usize] {
        &self.col_map
    }

    /// Keeps the columns `keep` accepts, in order, along with their key entries.
    fn retain(&mut self, keep: &[bool]) {
        let mut key_cols = Vec::new();
        let mut key_values = Vec::new();
        let mut cols = Vec::new();
        let mut col_map = Vec::new();
        for (i, c) in self.cols.iter().enumerate() {
            if !keep[i] {
                continue;
            }
            if let Some(v) = self.key.label_value(&c.label) {
                key_cols.push(c.clone());
                key_values.push(v.clone());
            }
            cols.push(c.clone());
            col_map.push(self.col_map[i]);
        }
        self.cols = cols;
        self.col_map = col_map;
        self.key = GroupKey::new(key_cols, key_values);
    }

    fn check_unique(&self) -> Result<(), ExecuteError> {
        let mut seen = HashSet::new();
        for c in &self.cols {
            if !seen.insert(c.label.as_str()) {
                return Err(ExecuteError::operator(format!(
                    "schema error: duplicate column {:?}",
                    c.label
                )));
            }
        }
        Ok(())
    }
}

pub trait SchemaMutator: Send {
    fn mutate(&mut self, ctx: &mut BuilderContext) -> Result<(), ExecuteError>;
}

fn check_columns<'a>(
    op: &str,
    labels: impl IntoIterator<Item = &'a String>,
    cols: &[ColMeta],
) -> Result<(), ExecuteError> {
    for label in labels {
        if col_idx(label, cols).is_none() {
            return Err(ExecuteError::operator(format!(
                "{op} error: column {label:?} doesn't exist"
            )));
        }
    }
    Ok(())
}

struct RenameMutator {
    columns: Option<BTreeMap<String, String>>,
    func: Option<RowFunction>,
}

impl RenameMutator {
    fn new_label(&mut self, label: &str) -> Result<Option<String>, ExecuteError> {
        if let Some(columns) = &self.columns {
            return Ok(columns.get(label).cloned());
        }
        match &mut self.func {
            Some(f) => f
                .eval_string(Value::from(label))
                .map(Some)
                .map_err(|e| operation_error("rename", e)),
            None => Ok(None),
        }
    }
}

impl SchemaMutator for RenameMutator {
    fn mutate(&mut self, ctx: &mut BuilderContext) -> Result<(), ExecuteError> {
        if let Some(columns) = &self.columns {
            check_columns("rename", columns.keys(), &ctx.cols)?;
        }
        let mut key_cols = Vec::new();
        let mut key_values = Vec::new();
        for i in 0..ctx.cols.len() {
            let keyed = ctx.key.label_value(&ctx.cols[i].label).cloned();
            if let Some(label) = self.new_label(&ctx.cols[i].label)? {
                ctx.cols[i].label = label;
            }
            if let Some(v) = keyed {
                key_cols.push(ctx.cols[i].clone());
                key_values.push(v);
            }
        }
        ctx.key = GroupKey::new(key_cols, key_values);
        Ok(())
    }
}

/// Drop and keep. A keep is a drop of everything else, and a keep predicate is a
/// negated drop predicate.
struct DropKeepMutator {
    op: &'static str,
    drop: Option<BTreeSet<String>>,
    keep: Option<BTreeSet<String>>,
    predicate: Option<RowFunction>,
    flip: bool,
}

impl DropKeepMutator {
    fn should_drop(&mut self, label: &str) -> Result<bool, ExecuteError> {
        if let Some(keep) = &self.keep {
            return Ok(!keep.contains(label));
        }
        if let Some(drop) = &self.drop {
            return Ok(drop.contains(label));
        }
        match &mut self.predicate {
            Some(f) => {
                let matched = f
                    .eval_bool(Value::from(label))
                    .map_err(|e| operation_error(self.op, e))?;
                Ok(matched != self.flip)
            }
            None => Ok(false),
        }
    }
}

impl SchemaMutator for DropKeepMutator {
    fn mutate(&mut self, ctx: &mut BuilderContext) -> Result<(), ExecuteError> {
        if let Some(drop) = &self.drop {
            check_columns(self.op, drop, &ctx.cols)?;
        }
        if let Some(keep) = &self.keep {
            check_columns(self.op, keep, &ctx.cols)?;
        }
        let keep = ctx
            .cols
            .iter()
            .map(|c| self.should_drop(&c.label).map(|d| !d))
            .collect::<Result<Vec<_>, _>>()?;
        ctx.retain(&keep);
        Ok(())
    }
}

/// Copies a column under a new label placed right after it. An existing column with
/// that label is replaced. The copy never joins the group key.
struct DuplicateMutator {
    column: String,
    as_: String,
}

impl SchemaMutator for DuplicateMutator {
    fn mutate(&mut self, ctx: &mut BuilderContext) -> Result<(), ExecuteError> {
        check_columns("duplicate", [&self.column], &ctx.cols)?;
        if self.as_ == self.column {
            return Ok(());
        }
        if let Some(existing) = col_idx(&self.as_, &ctx.cols) {
            let keep: Vec<bool> = (0..ctx.cols.len()).map(|i| i != existing).collect();
            ctx.retain(&keep);
        }
        let Some(src) = col_idx(&self.column, &ctx.cols) else {
            return Ok(());
        };
        let copy = ColMeta::new(self.as_.clone(), ctx.cols[src].col_type);
        ctx.cols.insert(src + 1, copy);
        ctx.col_map.insert(src + 1, ctx.col_map[src]);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaMutation {
    Rename(RenameOpSpec),
    Drop(DropOpSpec),
    Keep(KeepOpSpec),
    Duplicate(DuplicateOpSpec),
}

impl SchemaMutation {
    pub fn operation(&self) -> &'static str {
        match self {
            SchemaMutation::Rename(_) => "rename",
            SchemaMutation::Drop(_) => "drop",
            SchemaMutation::Keep(_) => "keep",
            SchemaMutation::Duplicate(_) => "duplicate",
        }
    }

    fn mutator(&self) -> Result<Box<dyn SchemaMutator>, ExecuteError> {
        let compile = |f: &Option<FunctionExpression>| {
            f.as_ref()
                .map(|expr| row_function(self.operation(), expr))
                .transpose()
        };
        Ok(match self {
            SchemaMutation::Rename(s) => Box::new(RenameMutator {
                columns: s.columns.clone(),
                func: compile(&s.func)?,
            }),
            SchemaMutation::Drop(s) => Box::new(DropKeepMutator {
                op: "drop",
                drop: s.columns.as_ref().map(|c| c.iter().cloned().collect()),
                keep: None,
                predicate: compile(&s.predicate)?,
                flip: false,
            }),
            SchemaMutation::Keep(s) => Box::new(DropKeepMutator {
                op: "keep",
                drop: None,
                keep: s.columns.as_ref().map(|c| c.iter().cloned().collect()),
                predicate: compile(&s.predicate)?,
                flip: true,
            }),
            SchemaMutation::Duplicate(s) => Box::new(DuplicateMutator {
                column: s.column.clone(),
                as_: s.as_.clone(),
            }),
        })
    }
}

/// Mutations applied in order to every table.
#[derive(Debug, Clone)]
pub struct SchemaMutationProcedure {
    pub mutations: Vec<SchemaMutation>,
}

impl ProcedureSpec for SchemaMutationProcedure {
    fn kind(&self) -> ProcedureKind {
        SCHEMA_MUTATION_KIND
    }

    procedure_spec_common!();

    fn as_push_down(&self) -> Option<&dyn PushDownProcedureSpec> {
        Some(self)
    }
}

impl PushDownProcedureSpec for SchemaMutationProcedure {
    fn push_down_rules(&self) -> Vec<PushDownRule> {
        vec![PushDownRule::new(SCHEMA_MUTATION_KIND)]
    }

    fn push_down(&self, root: &mut PushDownRoot<'_>) {
        let target = if root.is_shared() {
            root.duplicate()
        } else {
            root.spec_mut()
        };
        if let Some(root) = target.and_then(|s| s.downcast_mut::<SchemaMutationProcedure>()) {
            root.mutations.extend(self.mutations.iter().cloned());
        }
    }
}

fn create_procedure(
    op: &OperationSpec,
    _: &dyn PlanAdministration,
) -> Result<Box<dyn ProcedureSpec>, PlanError> {
    let mutation = match op {
        OperationSpec::Rename(s) => SchemaMutation::Rename(s.clone()),
        OperationSpec::Drop(s) => SchemaMutation::Drop(s.clone()),
        OperationSpec::Keep(s) => SchemaMutation::Keep(s.clone()),
        OperationSpec::Duplicate(s) => SchemaMutation::Duplicate(s.clone()),
        other => {
            return Err(PlanError::invalid(
                SCHEMA_MUTATION_KIND,
                format!("unexpected {} spec", other.kind()),
            ))
        }
    };
    Ok(Box::new(SchemaMutationProcedure {
        mutations: vec![mutation],
    }))
}

fn create_transformation(
    id: DatasetId,
    mode: AccumulationMode,
    spec: &dyn ProcedureSpec,
    admin: &ExecuteAdministration,
) -> Result<(TransformationRef, DatasetRef), ExecuteError> {
    let spec = downcast::<SchemaMutationProcedure>(spec, SCHEMA_MUTATION_KIND)?;
    let mutators = spec
        .mutations
        .iter()
        .map(SchemaMutation::mutator)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CachedTransformation::create(
        id,
        mode,
        admin,
        SchemaMutationProcessor { mutators },
    ))
}

struct SchemaMutationProcessor {
    mutators: Vec<Box<dyn SchemaMutator>>,
}

impl TableProcessor for SchemaMutationProcessor {
    fn process(&mut self, table: &Table, cache: &mut TableBuilderCache) -> Result<(), ExecuteError> {
        let mut ctx = BuilderContext::new(table);
        for m in &mut self.mutators {
            m.mutate(&mut ctx)?;
        }
        ctx.check_unique()?;

        let (builder, _) = cache.table_builder(ctx.key());
        let targets = ctx
            .cols()
            .iter()
            .map(|c| builder.ensure_col(c))
            .collect::<Result<Vec<_>, _>>()?;
        for row in 0..table.num_rows() {
            for (&src, &j) in ctx.col_map().iter().zip(&targets) {
                builder.append_value(j, &table.value(row, src))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tsq_execute::{Allocator, ColType, ColumnData};
    use tsq_ir::semantic::{Expression, Statement};

    fn table() -> Table {
        let cols = vec![
            ColMeta::new("host", ColType::String),
            ColMeta::new("region", ColType::String),
            ColMeta::new("_value", ColType::Float),
        ];
        let key = GroupKey::new(
            cols[..2].to_vec(),
            vec![Value::from("a"), Value::from("east")],
        );
        Table::new(
            key,
            cols,
            vec![
                ColumnData::String(vec!["a".into(); 2]),
                ColumnData::String(vec!["east".into(); 2]),
                ColumnData::Float(vec![1.0, 2.0]),
            ],
        )
        .unwrap()
    }

    fn function(source: &str) -> FunctionExpression {
        let program = tsq_ast::parse_program(source, &BTreeSet::new()).unwrap();
        match &program.body[0] {
            Statement::Expression {
                expression: Expression::Function(f),
            } => f.clone(),
            other => panic!("expected function, got {other:?}"),
        }
    }

    fn apply(mutations: Vec<SchemaMutation>) -> Result<Table, ExecuteError> {
        let mut p = SchemaMutationProcessor {
            mutators: mutations
                .iter()
                .map(SchemaMutation::mutator)
                .collect::<Result<Vec<_>, _>>()?,
        };
        let mut cache = TableBuilderCache::new(Arc::new(Allocator::new(0)));
        p.process(&table(), &mut cache)?;
        let key = cache.keys().pop().unwrap();
        cache.get(&key).unwrap().build()
    }

    fn labels(t: &Table) -> Vec<&str> {
        t.cols().iter().map(|c| c.label.as_str()).collect()
    }

    #[test]
    fn test_rename_updates_key() {
        let out = apply(vec![SchemaMutation::Rename(RenameOpSpec {
            columns: Some([("host".to_string(), "server".to_string())].into()),
            func: None,
        })])
        .unwrap();
        assert_eq!(labels(&out), ["server", "region", "_value"]);
        assert_eq!(out.key().label_value("server"), Some(&Value::from("a")));
        assert!(!out.key().has_col("host"));
    }

    #[test]
    fn test_rename_with_function() {
        let out = apply(vec![SchemaMutation::Rename(RenameOpSpec {
            columns: None,
            func: Some(function(r#"(column) => "new_" + column"#)),
        })])
        .unwrap();
        assert_eq!(labels(&out), ["new_host", "new_region", "new__value"]);
    }

    #[test]
    fn test_missing_column_errors() {
        let err = apply(vec![SchemaMutation::Drop(DropOpSpec {
            columns: Some(vec!["nope".into()]),
            predicate: None,
        })])
        .unwrap_err();
        assert_eq!(err.to_string(), "drop error: column \"nope\" doesn't exist");

        let err = apply(vec![SchemaMutation::Rename(RenameOpSpec {
            columns: Some([("nope".to_string(), "x".to_string())].into()),
            func: None,
        })])
        .unwrap_err();
        assert_eq!(err.to_string(), "rename error: column \"nope\" doesn't exist");
    }

    #[test]
    fn test_keep_predicate_is_flipped() {
        let out = apply(vec![SchemaMutation::Keep(KeepOpSpec {
            columns: None,
            predicate: Some(function(r#"(column) => column =~ /^_/"#)),
        })])
        .unwrap();
        assert_eq!(labels(&out), ["_value"]);
        assert!(out.key().is_empty());
    }

    #[test]
    fn test_chained_mutations() {
        let out = apply(vec![
            SchemaMutation::Duplicate(DuplicateOpSpec {
                column: "host".into(),
                as_: "host_copy".into(),
            }),
            SchemaMutation::Drop(DropOpSpec {
                columns: Some(vec!["region".into()]),
                predicate: None,
            }),
        ])
        .unwrap();
        assert_eq!(labels(&out), ["host", "host_copy", "_value"]);
        assert!(!out.key().has_col("host_copy"));
        assert_eq!(
            out.column_by_label("host_copy"),
            Some(&ColumnData::String(vec!["a".into(); 2]))
        );
    }

    #[test]
    fn test_renaming_onto_existing_column() {
        let err = apply(vec![SchemaMutation::Rename(RenameOpSpec {
            columns: Some([("host".to_string(), "region".to_string())].into()),
            func: None,
        })])
        .unwrap_err();
        assert_eq!(err.to_string(), "schema error: duplicate column \"region\"");
    }
}
