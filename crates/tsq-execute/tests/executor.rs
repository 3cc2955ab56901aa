//! Executing hand-built plans with a test source and transformations.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tsq_execute::{
    AccumulationMode, Administration, Allocator, CachedTransformation, ColMeta, ColType,
    ColumnData, DatasetId, DatasetRef, Dependencies, ExecuteError, Executor, GroupKey,
    ResultSink, Source, Table, TableBuilderCache, TableProcessor, TableSource,
    TransformationRef, TransformationRegistry,
};
use tsq_ir::{Time, Value};
use tsq_plan::{
    procedure_spec_common, PlanSpec, Procedure, ProcedureId, ProcedureKind, ProcedureSpec,
    YieldSpec,
};

const TABLES: &str = "tables";

#[derive(Debug, Clone)]
struct Bucket {
    name: &'static str,
}

impl ProcedureSpec for Bucket {
    fn kind(&self) -> ProcedureKind {
        "bucket"
    }

    procedure_spec_common!();
}

#[derive(Debug, Clone)]
struct Scale {
    factor: f64,
    kind: ProcedureKind,
}

impl ProcedureSpec for Scale {
    fn kind(&self) -> ProcedureKind {
        self.kind
    }

    procedure_spec_common!();
}

fn create_bucket(
    spec: &dyn ProcedureSpec,
    id: DatasetId,
    admin: &Administration,
) -> Result<Box<dyn Source>, ExecuteError> {
    let spec = spec
        .downcast_ref::<Bucket>()
        .ok_or(ExecuteError::InvalidSpec("bucket"))?;
    let buckets = admin
        .dependencies()
        .require::<BTreeMap<&'static str, Vec<Table>>>(TABLES)?;
    let tables = buckets.get(spec.name).cloned().unwrap_or_default();
    Ok(Box::new(TableSource::new(id, tables)))
}

struct ScaleProcessor {
    factor: f64,
}

impl TableProcessor for ScaleProcessor {
    fn process(&mut self, table: &Table, cache: &mut TableBuilderCache) -> Result<(), ExecuteError> {
        let (builder, _) = cache.table_builder(table.key());
        builder.add_table_cols(table)?;
        for row in 0..table.num_rows() {
            for (j, c) in table.cols().iter().enumerate() {
                let v = match table.value(row, j) {
                    Value::Float(f) if c.label == "_value" => Value::Float(f * self.factor),
                    other => other,
                };
                builder.append_value(j, &v)?;
            }
        }
        Ok(())
    }
}

fn create_scale(
    id: DatasetId,
    mode: AccumulationMode,
    spec: &dyn ProcedureSpec,
    admin: &Administration,
) -> Result<(TransformationRef, DatasetRef), ExecuteError> {
    let spec = spec
        .downcast_ref::<Scale>()
        .ok_or(ExecuteError::InvalidSpec("scale"))?;
    Ok(CachedTransformation::create(
        id,
        mode,
        admin,
        ScaleProcessor {
            factor: spec.factor,
        },
    ))
}

/// Puts every table under one key, rejecting the second table.
struct SingleKey;

impl TableProcessor for SingleKey {
    fn process(&mut self, table: &Table, cache: &mut TableBuilderCache) -> Result<(), ExecuteError> {
        let builder = cache.create(&GroupKey::default())?;
        builder.add_table_cols(table)?;
        builder.append_table(table)
    }
}

fn create_single_key(
    id: DatasetId,
    mode: AccumulationMode,
    _: &dyn ProcedureSpec,
    admin: &Administration,
) -> Result<(TransformationRef, DatasetRef), ExecuteError> {
    Ok(CachedTransformation::create(id, mode, admin, SingleKey))
}

fn series(host: &str, values: &[f64]) -> Table {
    let cols = vec![
        ColMeta::new("host", ColType::String),
        ColMeta::new("_value", ColType::Float),
    ];
    let key = GroupKey::new(vec![cols[0].clone()], vec![Value::from(host)]);
    Table::new(
        key,
        cols,
        vec![
            ColumnData::String(vec![host.to_string(); values.len()]),
            ColumnData::Float(values.to_vec()),
        ],
    )
    .unwrap()
}

fn executor() -> Executor {
    let mut registry = TransformationRegistry::new();
    registry.register_source("bucket", create_bucket).unwrap();
    registry.register_transformation("scale", create_scale).unwrap();
    registry
        .register_transformation("single", create_single_key)
        .unwrap();
    registry.freeze();

    let mut buckets: BTreeMap<&'static str, Vec<Table>> = BTreeMap::new();
    buckets.insert("cpu", vec![series("a", &[1.0, 2.0]), series("b", &[3.0])]);
    let mut deps = Dependencies::new();
    deps.insert(TABLES, buckets);
    Executor::new(Arc::new(registry), deps)
}

fn pid(name: &str) -> ProcedureId {
    ProcedureId::from_operation(&name.into())
}

/// A linear plan `bucket0 -> <kind>0` with the last procedure as the result.
fn linear_plan(kind: ProcedureKind) -> PlanSpec {
    let mut plan = PlanSpec::new(Time::from_unix(0));
    let mut source = Procedure::new(pid("bucket0"), Box::new(Bucket { name: "cpu" }));
    let mut child = Procedure::new(pid("child0"), Box::new(Scale { factor: 2.0, kind }));
    source.children.push(child.id);
    child.parents.push(source.id);
    plan.order = vec![source.id, child.id];
    plan.results.insert("_result".into(), YieldSpec { id: child.id });
    plan.procedures.insert(source.id, source);
    plan.procedures.insert(child.id, child);
    plan
}

fn values(table: &Table) -> Vec<f64> {
    match table.column_by_label("_value") {
        Some(ColumnData::Float(v)) => v.clone(),
        other => panic!("unexpected _value column {other:?}"),
    }
}

#[test]
fn test_tables_flow_to_results() {
    let results = executor()
        .execute(&linear_plan("scale"), &CancellationToken::new())
        .unwrap();

    let tables = &results["_result"];
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].key().label_value("host"), Some(&Value::from("a")));
    assert_eq!(values(&tables[0]), vec![2.0, 4.0]);
    assert_eq!(values(&tables[1]), vec![6.0]);
}

#[test]
fn test_duplicate_key_error_reaches_results() {
    let err = executor()
        .execute(&linear_plan("single"), &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err, ExecuteError::DuplicateTable("{}".to_string()));
    assert_eq!(err.to_string(), "found duplicate table with key: {}");
}

#[test]
fn test_canceled_query() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_eq!(
        executor().execute(&linear_plan("scale"), &cancel),
        Err(ExecuteError::Canceled)
    );
}

#[test]
fn test_unregistered_kind() {
    assert_eq!(
        executor()
            .execute(&linear_plan("mystery"), &CancellationToken::new())
            .map(|_| ()),
        Err(ExecuteError::NoTransformation("mystery".to_string()))
    );
}

#[test]
fn test_watermark_triggers_closed_windows() {
    let stop = ColMeta::new("_stop", ColType::Time);
    let admin = Administration::new(
        Time::from_unix(0),
        Arc::new(Allocator::new(0)),
        Arc::new(Dependencies::new()),
    );
    let mut dataset = admin.dataset(pid("window0").into(), AccumulationMode::AccumulatingRetracting);
    let sink = Arc::new(Mutex::new(ResultSink::default()));
    dataset.add_transformation(sink.clone());

    let key = |secs| GroupKey::new(vec![stop.clone()], vec![Value::Time(Time::from_unix(secs))]);
    for secs in [10, 20] {
        let (b, _) = dataset.cache_mut().table_builder(&key(secs));
        b.add_col(stop.clone()).unwrap();
        b.append_value(0, &Value::Time(Time::from_unix(secs))).unwrap();
    }

    dataset.update_watermark(Time::from_unix(15)).unwrap();
    assert_eq!(sink.lock().tables().len(), 1);

    // Accumulating: the next trigger retracts and re-emits the first window.
    dataset
        .cache_mut()
        .get_mut(&key(10))
        .unwrap()
        .append_value(0, &Value::Time(Time::from_unix(10)))
        .unwrap();
    dataset.finish(None);

    let sink = sink.lock();
    assert!(sink.is_finished());
    assert!(sink.err().is_none());
    let rows: Vec<usize> = sink.tables().iter().map(|t| t.num_rows()).collect();
    assert_eq!(rows, vec![2, 1]);
}
