use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use tsq_ir::Time;
use tsq_plan::{PlanSpec, ProcedureId};

use crate::allocator::Allocator;
use crate::dataset::{AccumulationMode, DatasetId, DatasetRef};
use crate::error::ExecuteError;
use crate::registry::TransformationRegistry;
use crate::table::{GroupKey, Table};
use crate::transformation::{Administration, Dependencies, Source, Transformation, TransformationRef};

/// Tables produced by each named result of a query.
pub type Results = BTreeMap<String, Vec<Arc<Table>>>;

/// Collects the tables of one result.
#[derive(Debug, Default)]
pub struct ResultSink {
    tables: Vec<Arc<Table>>,
    err: Option<ExecuteError>,
    finished: bool,
}

impl ResultSink {
    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    pub fn err(&self) -> Option<&ExecuteError> {
        self.err.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Transformation for ResultSink {
    fn retract_table(&mut self, _: DatasetId, key: &GroupKey) -> Result<(), ExecuteError> {
        self.tables.retain(|t| t.key() != key);
        Ok(())
    }

    fn process(&mut self, _: DatasetId, table: Arc<Table>) -> Result<(), ExecuteError> {
        self.tables.push(table);
        Ok(())
    }

    fn update_watermark(&mut self, _: DatasetId, _: Time) -> Result<(), ExecuteError> {
        Ok(())
    }

    fn update_processing_time(&mut self, _: DatasetId, _: Time) -> Result<(), ExecuteError> {
        Ok(())
    }

    fn finish(&mut self, _: DatasetId, err: Option<ExecuteError>) {
        if !self.finished {
            self.finished = true;
            self.err = err;
        }
    }
}

enum Node {
    Source(usize),
    Dataset(DatasetRef),
}

/// Runs plans against a frozen transformation registry.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<TransformationRegistry>,
    dependencies: Arc<Dependencies>,
}

impl Executor {
    pub fn new(registry: Arc<TransformationRegistry>, dependencies: Dependencies) -> Self {
        Self {
            registry,
            dependencies: Arc::new(dependencies),
        }
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    /// Wires the plan into sources, transformations and result sinks, then runs the
    /// sources on up to `concurrency_quota` threads. Blocks until every source finished.
    #[instrument(skip_all, fields(procedures = plan.procedures.len(), results = plan.results.len()))]
    pub fn execute(&self, plan: &PlanSpec, cancel: &CancellationToken) -> Result<Results, ExecuteError> {
        if !self.registry.is_frozen() {
            return Err(ExecuteError::NotFrozen);
        }
        let allocator = Arc::new(Allocator::new(plan.resources.memory_bytes_quota));

        let mut sources: Vec<Box<dyn Source>> = Vec::new();
        let mut nodes: HashMap<ProcedureId, Node> = HashMap::new();

        for id in &plan.order {
            let Some(procedure) = plan.procedure(*id) else {
                continue;
            };
            let dataset_id = DatasetId::from(*id);
            let admin = Administration::new(plan.now, allocator.clone(), self.dependencies.clone())
                .with_bounds(procedure.bounds)
                .with_parents(procedure.parents.iter().copied().map(DatasetId::from).collect());

            if procedure.parents.is_empty() {
                let create = self.registry.source(procedure.kind())?;
                sources.push(create(procedure.spec.as_ref(), dataset_id, &admin)?);
                nodes.insert(*id, Node::Source(sources.len() - 1));
                continue;
            }

            let create = self.registry.transformation(procedure.kind())?;
            let (t, d) = create(
                dataset_id,
                AccumulationMode::default(),
                procedure.spec.as_ref(),
                &admin,
            )?;
            for parent in &procedure.parents {
                attach(&nodes, &mut sources, *parent, t.clone());
            }
            nodes.insert(*id, Node::Dataset(d));
        }

        let mut sinks = Vec::with_capacity(plan.results.len());
        for (name, result) in &plan.results {
            let sink = Arc::new(Mutex::new(ResultSink::default()));
            attach(&nodes, &mut sources, result.id, sink.clone());
            sinks.push((name.clone(), sink));
        }
        debug!(sources = sources.len(), "starting sources");

        let queue = Mutex::new(VecDeque::from(sources));
        let workers = plan.resources.concurrency_quota.clamp(1, queue.lock().len().max(1));
        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let next = queue.lock().pop_front();
                    let Some(mut source) = next else {
                        break;
                    };
                    source.run(cancel);
                });
            }
        });

        if cancel.is_cancelled() {
            warn!("query canceled");
            return Err(ExecuteError::Canceled);
        }

        let mut results = Results::new();
        for (name, sink) in sinks {
            let mut sink = sink.lock();
            if let Some(err) = sink.err.take() {
                warn!(result = %name, error = %err, "query failed");
                return Err(err);
            }
            results.insert(name, std::mem::take(&mut sink.tables));
        }
        info!(
            results = results.len(),
            max_allocated = allocator.max_allocated(),
            "query executed"
        );
        Ok(results)
    }
}

fn attach(
    nodes: &HashMap<ProcedureId, Node>,
    sources: &mut [Box<dyn Source>],
    parent: ProcedureId,
    t: TransformationRef,
) {
    match nodes.get(&parent) {
        Some(Node::Source(i)) => sources[*i].add_transformation(t),
        Some(Node::Dataset(d)) => d.lock().add_transformation(t),
        None => {}
    }
}
