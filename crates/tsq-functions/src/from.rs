use tsq_compile::Administration;
use tsq_execute::{
    Administration as ExecuteAdministration, DatasetId, ExecuteError, Source, Table,
    TableReader, TableSource,
};
use tsq_ir::{Arguments, FromOpSpec, FunctionSignature, OperationSpec, Type, ValueError};
use tsq_plan::{
    procedure_spec_common, Administration as PlanAdministration, BoundedProcedureSpec,
    BoundsSpec, PlanError, ProcedureKind, ProcedureSpec,
};
use tsq_registry::FatalError;

use crate::storage::{BucketRef, ReadSpec, StorageRef, STORAGE_DEPENDENCY};
use crate::{downcast, Registries};

pub const FROM_KIND: ProcedureKind = "from";

pub(crate) fn register(r: &mut Registries) -> Result<(), FatalError> {
    r.functions.register_function(
        "from",
        create_from_op,
        FunctionSignature::new(Type::Table)
            .param("bucket", Type::String)
            .param("bucketID", Type::String)
            .param("db", Type::String),
    )?;
    r.procedures.register(FROM_KIND, create_procedure, &["from"])?;
    r.transformations.register_source(FROM_KIND, create_source)
}

fn create_from_op(args: &mut Arguments, _: &mut Administration) -> Result<OperationSpec, ValueError> {
    let bucket = match (args.get_string("bucket")?, args.get_string("db")?) {
        (Some(_), Some(_)) => {
            return Err(ValueError::Invalid(
                "cannot specify both bucket and db".to_string(),
            ))
        }
        (bucket, db) => bucket.or(db),
    };
    let bucket_id = args.get_string("bucketID")?;
    match (&bucket, &bucket_id) {
        (None, None) => Err(ValueError::Invalid(
            "must specify one of bucket or bucketID".to_string(),
        )),
        (Some(_), Some(_)) => Err(ValueError::Invalid(
            "must specify only one of bucket or bucketID".to_string(),
        )),
        _ => Ok(OperationSpec::From(FromOpSpec { bucket, bucket_id })),
    }
}

/// Reads a bucket. Time bounds and a storage-side aggregate are filled in by push-down.
#[derive(Debug, Clone, Default)]
pub struct FromProcedure {
    pub bucket: Option<String>,
    pub bucket_id: Option<String>,
    pub bounds: Option<BoundsSpec>,
    pub aggregate: Option<&'static str>,
}

impl ProcedureSpec for FromProcedure {
    fn kind(&self) -> ProcedureKind {
        FROM_KIND
    }

    procedure_spec_common!();

    fn as_bounded(&self) -> Option<&dyn BoundedProcedureSpec> {
        self.bounds.as_ref().map(|_| self as &dyn BoundedProcedureSpec)
    }
}

impl BoundedProcedureSpec for FromProcedure {
    fn time_bounds(&self) -> BoundsSpec {
        self.bounds.unwrap_or_default()
    }
}

fn create_procedure(
    op: &OperationSpec,
    _: &dyn PlanAdministration,
) -> Result<Box<dyn ProcedureSpec>, PlanError> {
    let OperationSpec::From(spec) = op else {
        return Err(PlanError::invalid(FROM_KIND, format!("unexpected {} spec", op.kind())));
    };
    Ok(Box::new(FromProcedure {
        bucket: spec.bucket.clone(),
        bucket_id: spec.bucket_id.clone(),
        ..Default::default()
    }))
}

struct StorageTableReader {
    storage: StorageRef,
    spec: ReadSpec,
}

impl TableReader for StorageTableReader {
    fn read(&mut self) -> Result<Vec<Table>, ExecuteError> {
        self.storage.read(&self.spec)
    }
}

fn create_source(
    spec: &dyn ProcedureSpec,
    id: DatasetId,
    admin: &ExecuteAdministration,
) -> Result<Box<dyn Source>, ExecuteError> {
    let spec = downcast::<FromProcedure>(spec, FROM_KIND)?;
    let bounds = spec
        .bounds
        .ok_or_else(|| ExecuteError::operator("from: bounds must be set, use range()"))?;
    let bucket = match (&spec.bucket, &spec.bucket_id) {
        (Some(name), _) => BucketRef::Name(name.clone()),
        (None, Some(id)) => BucketRef::Id(id.clone()),
        (None, None) => return Err(ExecuteError::operator("from: no bucket")),
    };
    let storage = admin
        .dependencies()
        .require::<StorageRef>(STORAGE_DEPENDENCY)?
        .clone();

    let start = admin.resolve_time(bounds.start);
    let stop = if bounds.stop.is_zero() {
        admin.now()
    } else {
        admin.resolve_time(bounds.stop)
    };
    let reader = StorageTableReader {
        storage,
        spec: ReadSpec {
            bucket,
            start,
            stop,
            aggregate: spec.aggregate,
        },
    };
    Ok(Box::new(TableSource::new(id, reader).with_watermark(stop)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsq_ir::Record;

    fn create(args: Record) -> Result<OperationSpec, ValueError> {
        create_from_op(&mut Arguments::new(args), &mut Administration::new())
    }

    #[test]
    fn test_bucket_or_db() {
        assert_eq!(
            create(Record::new().with("db", "telegraf")).unwrap(),
            OperationSpec::From(FromOpSpec::bucket("telegraf"))
        );
        assert!(create(Record::new()).is_err());
        assert!(create(Record::new().with("bucket", "a").with("db", "b")).is_err());
        assert!(create(Record::new().with("bucket", "a").with("bucketID", "01")).is_err());
    }

    #[test]
    fn test_bounded_only_after_range() {
        let mut from = FromProcedure::default();
        assert!(from.as_bounded().is_none());
        from.bounds = Some(BoundsSpec::default());
        assert!(from.as_bounded().is_some());
    }
}
