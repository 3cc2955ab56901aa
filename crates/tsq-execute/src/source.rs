use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tsq_ir::Time;

use crate::dataset::DatasetId;
use crate::error::ExecuteError;
use crate::table::Table;
use crate::transformation::{Downstream, Source, TransformationRef};

/// Reads the tables a source emits.
pub trait TableReader: Send {
    fn read(&mut self) -> Result<Vec<Table>, ExecuteError>;
}

/// A source emitting whatever its reader returns, then a watermark at the end of its
/// time bounds.
pub struct TableSource<R> {
    id: DatasetId,
    reader: R,
    watermark: Option<Time>,
    downstream: Downstream,
}

impl<R: TableReader> TableSource<R> {
    pub fn new(id: DatasetId, reader: R) -> Self {
        Self {
            id,
            reader,
            watermark: None,
            downstream: Downstream::default(),
        }
    }

    pub fn with_watermark(mut self, mark: Time) -> Self {
        self.watermark = Some(mark);
        self
    }

    fn emit(&mut self, cancel: &CancellationToken) -> Result<(), ExecuteError> {
        let tables = self.reader.read()?;
        debug!(source = %self.id, tables = tables.len(), "source read");
        for table in tables {
            if cancel.is_cancelled() {
                return Err(ExecuteError::Canceled);
            }
            self.downstream.process(self.id, Arc::new(table))?;
        }
        if let Some(mark) = self.watermark {
            self.downstream.update_watermark(self.id, mark)?;
        }
        Ok(())
    }
}

impl<R: TableReader> Source for TableSource<R> {
    fn add_transformation(&mut self, t: TransformationRef) {
        self.downstream.add(t);
    }

    fn run(&mut self, cancel: &CancellationToken) {
        let result = self.emit(cancel);
        self.downstream.finish(self.id, result.err());
    }
}

impl TableReader for Vec<Table> {
    fn read(&mut self) -> Result<Vec<Table>, ExecuteError> {
        Ok(std::mem::take(self))
    }
}
