//! Table builders and the per-dataset cache of builders keyed by group key

use std::collections::HashMap;
use std::sync::Arc;

use tsq_ir::Value;

use crate::allocator::Allocator;
use crate::error::ExecuteError;
use crate::table::{col_idx, ColMeta, ColumnData, GroupKey, Table};

/// Builds one table column by column. Memory is accounted with the [`Allocator`] and
/// released when the builder is dropped.
#[derive(Debug)]
pub struct TableBuilder {
    key: GroupKey,
    cols: Vec<ColMeta>,
    columns: Vec<ColumnData>,
    allocator: Arc<Allocator>,
    bytes: usize,
}

impl TableBuilder {
    pub fn new(key: GroupKey, allocator: Arc<Allocator>) -> Self {
        Self {
            key,
            cols: Vec::new(),
            columns: Vec::new(),
            allocator,
            bytes: 0,
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, ColumnData::len)
    }

    /// Adds a column and returns its index. Columns can only be added while the builder
    /// holds no rows.
    pub fn add_col(&mut self, meta: ColMeta) -> Result<usize, ExecuteError> {
        if col_idx(&meta.label, &self.cols).is_some() {
            return Err(ExecuteError::InvalidTable(format!(
                "table already has a column {:?}",
                meta.label
            )));
        }
        if self.num_rows() > 0 {
            return Err(ExecuteError::InvalidTable(format!(
                "cannot add column {:?} to a table with rows",
                meta.label
            )));
        }
        self.columns.push(ColumnData::new(meta.col_type));
        self.cols.push(meta);
        Ok(self.cols.len() - 1)
    }

    /// Index of the column labelled like `meta`, adding it when missing.
    pub fn ensure_col(&mut self, meta: &ColMeta) -> Result<usize, ExecuteError> {
        match col_idx(&meta.label, &self.cols) {
            Some(j) if self.cols[j].col_type == meta.col_type => Ok(j),
            Some(j) => Err(ExecuteError::ColumnType {
                label: meta.label.clone(),
                expected: self.cols[j].col_type.kind(),
                actual: meta.col_type.kind(),
            }),
            None => self.add_col(meta.clone()),
        }
    }

    pub fn append_value(&mut self, j: usize, value: &Value) -> Result<(), ExecuteError> {
        let Some(column) = self.columns.get_mut(j) else {
            return Err(ExecuteError::InvalidTable(format!("no column at index {j}")));
        };
        let expected = self.cols[j].col_type;
        let size = column.push(value).map_err(|actual| ExecuteError::ColumnType {
            label: self.cols[j].label.clone(),
            expected: expected.kind(),
            actual,
        })?;
        self.allocator.allocate(size)?;
        self.bytes += size;
        Ok(())
    }

    /// Appends one value per column, in column order.
    pub fn append_row(&mut self, values: &[Value]) -> Result<(), ExecuteError> {
        if values.len() != self.cols.len() {
            return Err(ExecuteError::InvalidTable(format!(
                "row has {} values for {} columns",
                values.len(),
                self.cols.len()
            )));
        }
        for (j, v) in values.iter().enumerate() {
            self.append_value(j, v)?;
        }
        Ok(())
    }

    /// Adds every column of `table` that the builder does not have yet.
    pub fn add_table_cols(&mut self, table: &Table) -> Result<(), ExecuteError> {
        for c in table.cols() {
            self.ensure_col(c)?;
        }
        Ok(())
    }

    /// Appends all rows of `table`, matching columns by label.
    pub fn append_table(&mut self, table: &Table) -> Result<(), ExecuteError> {
        let mapping = self
            .cols
            .iter()
            .map(|c| {
                col_idx(&c.label, table.cols()).ok_or_else(|| {
                    ExecuteError::InvalidTable(format!("table is missing column {:?}", c.label))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        for row in 0..table.num_rows() {
            for (j, &src) in mapping.iter().enumerate() {
                self.append_value(j, &table.value(row, src))?;
            }
        }
        Ok(())
    }

    /// Snapshot of the rows appended so far.
    pub fn build(&self) -> Result<Table, ExecuteError> {
        Table::new(self.key.clone(), self.cols.clone(), self.columns.clone())
    }

    /// Drops all rows, keeping the columns.
    pub fn clear_data(&mut self) {
        for c in &mut self.columns {
            *c = ColumnData::new(c.col_type());
        }
        self.allocator.free(self.bytes);
        self.bytes = 0;
    }
}

impl Drop for TableBuilder {
    fn drop(&mut self) {
        self.allocator.free(self.bytes);
    }
}

/// At most one builder per group key. Keys are remembered in creation order so tables
/// are flushed deterministically.
#[derive(Debug)]
pub struct TableBuilderCache {
    allocator: Arc<Allocator>,
    tables: HashMap<GroupKey, TableBuilder>,
    order: Vec<GroupKey>,
}

impl TableBuilderCache {
    pub fn new(allocator: Arc<Allocator>) -> Self {
        Self {
            allocator,
            tables: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// The builder for `key`, creating it when missing. The flag is true when created.
    pub fn table_builder(&mut self, key: &GroupKey) -> (&mut TableBuilder, bool) {
        let created = !self.tables.contains_key(key);
        if created {
            self.order.push(key.clone());
        }
        let allocator = &self.allocator;
        let builder = self
            .tables
            .entry(key.clone())
            .or_insert_with(|| TableBuilder::new(key.clone(), allocator.clone()));
        (builder, created)
    }

    /// Creates the builder for `key`. Fails without touching the cache when one exists.
    pub fn create(&mut self, key: &GroupKey) -> Result<&mut TableBuilder, ExecuteError> {
        if self.tables.contains_key(key) {
            return Err(ExecuteError::DuplicateTable(key.to_string()));
        }
        Ok(self.table_builder(key).0)
    }

    /// Adds a builder that was filled outside the cache. Fails when its key is taken.
    pub fn insert(&mut self, builder: TableBuilder) -> Result<(), ExecuteError> {
        let key = builder.key().clone();
        if self.tables.contains_key(&key) {
            return Err(ExecuteError::DuplicateTable(key.to_string()));
        }
        self.order.push(key.clone());
        self.tables.insert(key, builder);
        Ok(())
    }

    pub fn get(&self, key: &GroupKey) -> Option<&TableBuilder> {
        self.tables.get(key)
    }

    pub fn get_mut(&mut self, key: &GroupKey) -> Option<&mut TableBuilder> {
        self.tables.get_mut(key)
    }

    pub fn contains(&self, key: &GroupKey) -> bool {
        self.tables.contains_key(key)
    }

    /// Removes and returns the builder for `key`.
    pub fn expire(&mut self, key: &GroupKey) -> Option<TableBuilder> {
        self.order.retain(|k| k != key);
        self.tables.remove(key)
    }

    /// Keys in creation order.
    pub fn keys(&self) -> Vec<GroupKey> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }
}
