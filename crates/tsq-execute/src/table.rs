//! Immutable columnar tables and their group keys

use std::fmt;
use std::hash::{Hash, Hasher};

use tsq_ir::{Kind, Record, Time, Value};

use crate::error::ExecuteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColType {
    Bool,
    Int,
    UInt,
    Float,
    String,
    Time,
}

impl ColType {
    /// Column type able to hold `value`, if any.
    pub fn of(value: &Value) -> Option<ColType> {
        match value {
            Value::Bool(_) => Some(ColType::Bool),
            Value::Int(_) => Some(ColType::Int),
            Value::UInt(_) => Some(ColType::UInt),
            Value::Float(_) => Some(ColType::Float),
            Value::String(_) => Some(ColType::String),
            Value::Time(_) => Some(ColType::Time),
            _ => None,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            ColType::Bool => Kind::Bool,
            ColType::Int => Kind::Int,
            ColType::UInt => Kind::UInt,
            ColType::Float => Kind::Float,
            ColType::String => Kind::String,
            ColType::Time => Kind::Time,
        }
    }

    /// Value filling cells that have no input, e.g. missing pivot cells.
    pub fn zero(&self) -> Value {
        match self {
            ColType::Bool => Value::Bool(false),
            ColType::Int => Value::Int(0),
            ColType::UInt => Value::UInt(0),
            ColType::Float => Value::Float(0.0),
            ColType::String => Value::String(String::new()),
            ColType::Time => Value::Time(Time::from_nanos(0)),
        }
    }
}

impl fmt::Display for ColType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind(), f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColMeta {
    pub label: String,
    pub col_type: ColType,
}

impl ColMeta {
    pub fn new(label: impl Into<String>, col_type: ColType) -> Self {
        Self {
            label: label.into(),
            col_type,
        }
    }
}

pub fn col_idx(label: &str, cols: &[ColMeta]) -> Option<usize> {
    cols.iter().position(|c| c.label == label)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f64>),
    String(Vec<String>),
    Time(Vec<Time>),
}

impl ColumnData {
    pub fn new(col_type: ColType) -> Self {
        match col_type {
            ColType::Bool => ColumnData::Bool(Vec::new()),
            ColType::Int => ColumnData::Int(Vec::new()),
            ColType::UInt => ColumnData::UInt(Vec::new()),
            ColType::Float => ColumnData::Float(Vec::new()),
            ColType::String => ColumnData::String(Vec::new()),
            ColType::Time => ColumnData::Time(Vec::new()),
        }
    }

    pub fn col_type(&self) -> ColType {
        match self {
            ColumnData::Bool(_) => ColType::Bool,
            ColumnData::Int(_) => ColType::Int,
            ColumnData::UInt(_) => ColType::UInt,
            ColumnData::Float(_) => ColType::Float,
            ColumnData::String(_) => ColType::String,
            ColumnData::Time(_) => ColType::Time,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::UInt(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::String(v) => v.len(),
            ColumnData::Time(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// # Panics
    /// Panics if `row` is out of bounds.
    pub fn value(&self, row: usize) -> Value {
        match self {
            ColumnData::Bool(v) => Value::Bool(v[row]),
            ColumnData::Int(v) => Value::Int(v[row]),
            ColumnData::UInt(v) => Value::UInt(v[row]),
            ColumnData::Float(v) => Value::Float(v[row]),
            ColumnData::String(v) => Value::String(v[row].clone()),
            ColumnData::Time(v) => Value::Time(v[row]),
        }
    }

    /// Appends `value`, returning the number of bytes added. Fails when the value does
    /// not match the column type.
    pub fn push(&mut self, value: &Value) -> Result<usize, Kind> {
        let size = match (self, value) {
            (ColumnData::Bool(v), Value::Bool(b)) => {
                v.push(*b);
                std::mem::size_of::<bool>()
            }
            (ColumnData::Int(v), Value::Int(i)) => {
                v.push(*i);
                std::mem::size_of::<i64>()
            }
            (ColumnData::UInt(v), Value::UInt(u)) => {
                v.push(*u);
                std::mem::size_of::<u64>()
            }
            (ColumnData::Float(v), Value::Float(f)) => {
                v.push(*f);
                std::mem::size_of::<f64>()
            }
            (ColumnData::String(v), Value::String(s)) => {
                v.push(s.clone());
                std::mem::size_of::<String>() + s.len()
            }
            (ColumnData::Time(v), Value::Time(t)) => {
                v.push(*t);
                std::mem::size_of::<Time>()
            }
            (_, other) => return Err(other.kind()),
        };
        Ok(size)
    }
}

/// Column labels and values shared by every row of a table.
#[derive(Debug, Clone, Default)]
pub struct GroupKey {
    cols: Vec<ColMeta>,
    values: Vec<Value>,
}

impl GroupKey {
    pub fn new(cols: Vec<ColMeta>, values: Vec<Value>) -> Self {
        debug_assert_eq!(cols.len(), values.len());
        Self { cols, values }
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// # Panics
    /// Panics if `j` is out of bounds.
    pub fn value(&self, j: usize) -> &Value {
        &self.values[j]
    }

    pub fn label_value(&self, label: &str) -> Option<&Value> {
        col_idx(label, &self.cols).map(|j| &self.values[j])
    }

    pub fn has_col(&self, label: &str) -> bool {
        col_idx(label, &self.cols).is_some()
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// The key restricted to the columns `keep` accepts.
    pub fn filter(&self, keep: impl Fn(&ColMeta) -> bool) -> GroupKey {
        let (cols, values) = self
            .cols
            .iter()
            .zip(&self.values)
            .filter(|(c, _)| keep(c))
            .map(|(c, v)| (c.clone(), v.clone()))
            .unzip();
        GroupKey { cols, values }
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cols == other.cols
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a.equal(b))
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cols.hash(state);
        for v in &self.values {
            v.kind().hash(state);
            match v {
                Value::String(s) => s.hash(state),
                Value::Int(i) => i.hash(state),
                Value::UInt(u) => u.hash(state),
                // 0.0 and -0.0 are equal
                Value::Float(f) => (if *f == 0.0 { 0.0f64 } else { *f }).to_bits().hash(state),
                Value::Bool(b) => b.hash(state),
                Value::Time(t) => t.hash(state),
                _ => {}
            }
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (c, v)) in self.cols.iter().zip(&self.values).enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match v {
                Value::String(s) => write!(f, "{}={}", c.label, s)?,
                other => write!(f, "{}={}", c.label, other)?,
            }
        }
        f.write_str("}")
    }
}

/// A finished table. Every key column is also a column of the table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    key: GroupKey,
    cols: Vec<ColMeta>,
    columns: Vec<ColumnData>,
}

impl Table {
    pub fn new(key: GroupKey, cols: Vec<ColMeta>, columns: Vec<ColumnData>) -> Result<Self, ExecuteError> {
        if cols.len() != columns.len() {
            return Err(ExecuteError::InvalidTable(format!(
                "{} column labels for {} columns",
                cols.len(),
                columns.len()
            )));
        }
        let rows = columns.first().map_or(0, ColumnData::len);
        for (meta, data) in cols.iter().zip(&columns) {
            if data.col_type() != meta.col_type {
                return Err(ExecuteError::ColumnType {
                    label: meta.label.clone(),
                    expected: meta.col_type.kind(),
                    actual: data.col_type().kind(),
                });
            }
            if data.len() != rows {
                return Err(ExecuteError::InvalidTable(format!(
                    "column {:?} has {} rows, want {}",
                    meta.label,
                    data.len(),
                    rows
                )));
            }
        }
        for k in key.cols() {
            if !cols.contains(k) {
                return Err(ExecuteError::InvalidTable(format!(
                    "key column {:?} is not a table column",
                    k.label
                )));
            }
        }
        Ok(Self { key, cols, columns })
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

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column(&self, j: usize) -> &ColumnData {
        &self.columns[j]
    }

    pub fn column_by_label(&self, label: &str) -> Option<&ColumnData> {
        col_idx(label, &self.cols).map(|j| &self.columns[j])
    }

    pub fn value(&self, row: usize, col: usize) -> Value {
        self.columns[col].value(row)
    }

    /// One row as a record keyed by column label.
    pub fn row(&self, row: usize) -> Record {
        self.cols
            .iter()
            .zip(&self.columns)
            .map(|(c, data)| (c.label.clone(), data.value(row)))
            .collect()
    }
}
