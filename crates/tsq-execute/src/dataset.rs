//! Datasets hold the output of one transformation and push it to the children

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;
use tsq_ir::{Time, Value, DEFAULT_STOP_COL};
use tsq_plan::ProcedureId;

use crate::builder::TableBuilderCache;
use crate::error::ExecuteError;
use crate::table::{GroupKey, Table};
use crate::transformation::{Downstream, TransformationRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(ProcedureId);

impl DatasetId {
    pub fn procedure_id(&self) -> ProcedureId {
        self.0
    }
}

impl From<ProcedureId> for DatasetId {
    fn from(id: ProcedureId) -> Self {
        DatasetId(id)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// What happens to a table after it has been triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccumulationMode {
    /// The builder is dropped; later rows start a new table.
    #[default]
    Discarding,
    /// The builder is kept and later triggers emit it again with all rows so far.
    Accumulating,
    /// Like `Accumulating`, but the previous emission is retracted first.
    AccumulatingRetracting,
}

pub type DatasetRef = Arc<Mutex<Dataset>>;

/// Output of one transformation. Tables accumulate in the cache until a trigger fires:
/// a watermark past the table's `_stop` or the end of input.
pub struct Dataset {
    id: DatasetId,
    mode: AccumulationMode,
    cache: TableBuilderCache,
    downstream: Downstream,
    watermark: Time,
    processing_time: Time,
    emitted: HashSet<GroupKey>,
    finished: bool,
}

impl Dataset {
    pub fn new(id: DatasetId, mode: AccumulationMode, cache: TableBuilderCache) -> Self {
        Self {
            id,
            mode,
            cache,
            downstream: Downstream::default(),
            watermark: Time::MIN,
            processing_time: Time::MIN,
            emitted: HashSet::new(),
            finished: false,
        }
    }

    pub fn into_ref(self) -> DatasetRef {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn mode(&self) -> AccumulationMode {
        self.mode
    }

    pub fn add_transformation(&mut self, t: TransformationRef) {
        self.downstream.add(t);
    }

    pub fn cache(&self) -> &TableBuilderCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TableBuilderCache {
        &mut self.cache
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn watermark(&self) -> Time {
        self.watermark
    }

    pub fn processing_time(&self) -> Time {
        self.processing_time
    }

    /// Sends a table straight to the children, bypassing the cache.
    pub fn forward(&mut self, table: Arc<Table>) -> Result<(), ExecuteError> {
        self.downstream.process(self.id, table)
    }

    pub fn retract_table(&mut self, key: &GroupKey) -> Result<(), ExecuteError> {
        self.cache.expire(key);
        if self.emitted.remove(key) || self.mode == AccumulationMode::Discarding {
            self.downstream.retract_table(self.id, key)?;
        }
        Ok(())
    }

    /// Triggers every table whose window closed at or before `mark`. Marks that do not
    /// advance are ignored.
    pub fn update_watermark(&mut self, mark: Time) -> Result<(), ExecuteError> {
        if mark <= self.watermark {
            return Ok(());
        }
        self.watermark = mark;
        for key in self.cache.keys() {
            let closed = matches!(
                key.label_value(DEFAULT_STOP_COL),
                Some(Value::Time(stop)) if *stop <= mark
            );
            if closed {
                self.trigger(&key)?;
            }
        }
        self.downstream.update_watermark(self.id, mark)
    }

    pub fn update_processing_time(&mut self, t: Time) -> Result<(), ExecuteError> {
        if t <= self.processing_time {
            return Ok(());
        }
        self.processing_time = t;
        self.downstream.update_processing_time(self.id, t)
    }

    /// Flushes the remaining tables and finishes the children. An error skips the flush
    /// and is handed to every child.
    pub fn finish(&mut self, err: Option<ExecuteError>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let err = match err {
            Some(e) => Some(e),
            None => self.flush().err(),
        };
        trace!(dataset = %self.id, failed = err.is_some(), "dataset finished");
        self.downstream.finish(self.id, err);
    }

    fn flush(&mut self) -> Result<(), ExecuteError> {
        for key in self.cache.keys() {
            self.trigger(&key)?;
        }
        Ok(())
    }

    fn trigger(&mut self, key: &GroupKey) -> Result<(), ExecuteError> {
        let table = match self.mode {
            AccumulationMode::Discarding => match self.cache.expire(key) {
                Some(builder) => builder.build()?,
                None => return Ok(()),
            },
            AccumulationMode::Accumulating | AccumulationMode::AccumulatingRetracting => {
                let Some(builder) = self.cache.get(key) else {
                    return Ok(());
                };
                let table = builder.build()?;
                if self.mode == AccumulationMode::AccumulatingRetracting && self.emitted.contains(key) {
                    self.downstream.retract_table(self.id, key)?;
                }
                self.emitted.insert(key.clone());
                table
            }
        };
        self.downstream.process(self.id, Arc::new(table))
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("tables", &self.cache.len())
            .field("children", &self.downstream.len())
            .field("finished", &self.finished)
            .finish()
    }
}
