//! The transformation and source traits, and what they are created with

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tsq_ir::{QueryTime, Time};
use tsq_plan::{BoundsSpec, ProcedureId};

use crate::allocator::Allocator;
use crate::builder::TableBuilderCache;
use crate::dataset::{AccumulationMode, Dataset, DatasetId, DatasetRef};
use crate::error::ExecuteError;
use crate::table::{GroupKey, Table};

/// One node of the running dataflow. Parents call these methods; `id` names the parent
/// dataset the call comes from. No `process` call follows `finish`.
pub trait Transformation: Send {
    fn retract_table(&mut self, id: DatasetId, key: &GroupKey) -> Result<(), ExecuteError>;

    fn process(&mut self, id: DatasetId, table: Arc<Table>) -> Result<(), ExecuteError>;

    fn update_watermark(&mut self, id: DatasetId, mark: Time) -> Result<(), ExecuteError>;

    fn update_processing_time(&mut self, id: DatasetId, t: Time) -> Result<(), ExecuteError>;

    fn finish(&mut self, id: DatasetId, err: Option<ExecuteError>);
}

pub type TransformationRef = Arc<Mutex<dyn Transformation>>;

/// Produces tables for a root procedure.
pub trait Source: Send {
    fn add_transformation(&mut self, t: TransformationRef);

    /// Pushes every table to the children, then finishes them. Stops early with
    /// [`ExecuteError::Canceled`] once `cancel` fires.
    fn run(&mut self, cancel: &CancellationToken);
}

/// Fan-out to the child transformations of a dataset or source.
#[derive(Clone, Default)]
pub struct Downstream {
    children: Vec<TransformationRef>,
}

impl Downstream {
    pub fn add(&mut self, t: TransformationRef) {
        self.children.push(t);
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn process(&self, id: DatasetId, table: Arc<Table>) -> Result<(), ExecuteError> {
        for t in &self.children {
            t.lock().process(id, table.clone())?;
        }
        Ok(())
    }

    pub fn retract_table(&self, id: DatasetId, key: &GroupKey) -> Result<(), ExecuteError> {
        for t in &self.children {
            t.lock().retract_table(id, key)?;
        }
        Ok(())
    }

    pub fn update_watermark(&self, id: DatasetId, mark: Time) -> Result<(), ExecuteError> {
        for t in &self.children {
            t.lock().update_watermark(id, mark)?;
        }
        Ok(())
    }

    pub fn update_processing_time(&self, id: DatasetId, t: Time) -> Result<(), ExecuteError> {
        for child in &self.children {
            child.lock().update_processing_time(id, t)?;
        }
        Ok(())
    }

    pub fn finish(&self, id: DatasetId, err: Option<ExecuteError>) {
        for t in &self.children {
            t.lock().finish(id, err.clone());
        }
    }
}

/// Services available to executing operators, keyed by name, e.g. the storage reader.
#[derive(Clone, Default)]
pub struct Dependencies {
    values: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.values.insert(key, Arc::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref())
    }

    pub fn require<T: Any>(&self, key: &'static str) -> Result<&T, ExecuteError> {
        self.get(key).ok_or(ExecuteError::MissingDependency(key))
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Context for creating one transformation or source.
#[derive(Debug, Clone)]
pub struct Administration {
    now: Time,
    bounds: BoundsSpec,
    parents: Vec<DatasetId>,
    allocator: Arc<Allocator>,
    dependencies: Arc<Dependencies>,
}

impl Administration {
    pub fn new(now: Time, allocator: Arc<Allocator>, dependencies: Arc<Dependencies>) -> Self {
        Self {
            now,
            bounds: BoundsSpec::default(),
            parents: Vec::new(),
            allocator,
            dependencies,
        }
    }

    pub fn with_bounds(mut self, bounds: BoundsSpec) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_parents(mut self, parents: Vec<DatasetId>) -> Self {
        self.parents = parents;
        self
    }

    pub fn now(&self) -> Time {
        self.now
    }

    pub fn resolve_time(&self, t: QueryTime) -> Time {
        t.time(self.now)
    }

    /// Time bounds the planner computed for the procedure.
    pub fn bounds(&self) -> BoundsSpec {
        self.bounds
    }

    pub fn parents(&self) -> &[DatasetId] {
        &self.parents
    }

    pub fn convert_id(&self, id: ProcedureId) -> DatasetId {
        DatasetId::from(id)
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    /// A dataset backed by a fresh builder cache.
    pub fn dataset(&self, id: DatasetId, mode: AccumulationMode) -> Dataset {
        Dataset::new(id, mode, TableBuilderCache::new(self.allocator.clone()))
    }
}

/// Per-table logic of a transformation that writes into its dataset's builder cache.
pub trait TableProcessor: Send {
    fn process(&mut self, table: &Table, cache: &mut TableBuilderCache) -> Result<(), ExecuteError>;
}

/// A transformation made of a [`TableProcessor`] and its dataset. Everything except
/// `process` is delegated to the dataset.
pub struct CachedTransformation<P> {
    d: DatasetRef,
    processor: P,
}

impl<P: TableProcessor + 'static> CachedTransformation<P> {
    pub fn new(d: DatasetRef, processor: P) -> Self {
        Self { d, processor }
    }

    /// Creates the dataset and the transformation writing into it.
    pub fn create(
        id: DatasetId,
        mode: AccumulationMode,
        admin: &Administration,
        processor: P,
    ) -> (TransformationRef, DatasetRef) {
        let d = admin.dataset(id, mode).into_ref();
        let t: TransformationRef = Arc::new(Mutex::new(Self::new(d.clone(), processor)));
        (t, d)
    }
}

impl<P: TableProcessor> Transformation for CachedTransformation<P> {
    fn retract_table(&mut self, _: DatasetId, key: &GroupKey) -> Result<(), ExecuteError> {
        self.d.lock().retract_table(key)
    }

    fn process(&mut self, _: DatasetId, table: Arc<Table>) -> Result<(), ExecuteError> {
        let mut d = self.d.lock();
        if d.is_finished() {
            return Err(ExecuteError::Finished(d.id()));
        }
        self.processor.process(&table, d.cache_mut())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ColMeta, ColType, ColumnData};

    struct Counting(Arc<Mutex<usize>>);

    impl TableProcessor for Counting {
        fn process(&mut self, _: &Table, _: &mut TableBuilderCache) -> Result<(), ExecuteError> {
            *self.0.lock() += 1;
            Ok(())
        }
    }

    fn table() -> Table {
        let cols = vec![ColMeta::new("_value", ColType::Float)];
        Table::new(GroupKey::new(vec![], vec![]), cols, vec![ColumnData::Float(vec![1.0])]).unwrap()
    }

    #[test]
    fn test_process_after_finish_is_rejected() {
        let admin = Administration::new(
            Time::from_unix(0),
            Arc::new(Allocator::new(0)),
            Arc::new(Dependencies::new()),
        );
        let id = DatasetId::from(ProcedureId::from_operation(&"count0".into()));
        let parent = DatasetId::from(ProcedureId::from_operation(&"from0".into()));
        let calls = Arc::new(Mutex::new(0));
        let (t, d) = CachedTransformation::create(
            id,
            AccumulationMode::Discarding,
            &admin,
            Counting(calls.clone()),
        );

        t.lock().process(parent, Arc::new(table())).unwrap();
        t.lock().finish(parent, None);
        assert!(d.lock().is_finished());

        let err = t.lock().process(parent, Arc::new(table())).unwrap_err();
        assert_eq!(err, ExecuteError::Finished(id));
        assert_eq!(*calls.lock(), 1);
        assert!(d.lock().cache().is_empty());
    }
}
