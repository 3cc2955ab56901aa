//! Storage read by `from`
//!
//! [`StorageReader`] is the seam between the `from` source and wherever points live.
//! [`MemoryStorage`] keeps points per bucket in memory and serves tests and the
//! standalone server.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;
use tsq_execute::{ColMeta, ColType, ColumnData, ExecuteError, GroupKey, Table};
use tsq_ir::{
    Time, Value, DEFAULT_START_COL, DEFAULT_STOP_COL, DEFAULT_TIME_COL, DEFAULT_VALUE_COL,
};

/// Dependency key under which the executor finds the [`StorageReader`].
pub const STORAGE_DEPENDENCY: &str = "storage";

pub const MEASUREMENT_COL: &str = "_measurement";
pub const FIELD_COL: &str = "_field";

/// Aggregates a reader may compute instead of returning raw points.
pub const AGGREGATE_COUNT: &str = "count";
pub const AGGREGATE_SUM: &str = "sum";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketRef {
    Name(String),
    Id(String),
}

/// What one `from` source asks of storage. Points are read from `[start, stop)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadSpec {
    pub bucket: BucketRef,
    pub start: Time,
    pub stop: Time,
    pub aggregate: Option<&'static str>,
}

/// Returns one table per series. Shared by every query the executor runs.
pub trait StorageReader: Send + Sync {
    fn read(&self, spec: &ReadSpec) -> Result<Vec<Table>, ExecuteError>;
}

pub type StorageRef = Arc<dyn StorageReader>;

/// One field value of a series at an instant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Point {
    pub measurement: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub field: String,
    pub time: Time,
    pub value: f64,
}

impl Point {
    pub fn new(measurement: &str, field: &str, time: Time, value: f64) -> Self {
        Self {
            measurement: measurement.to_string(),
            tags: BTreeMap::new(),
            field: field.to_string(),
            time,
            value,
        }
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct Bucket {
    id: String,
    points: Vec<Point>,
}

/// Buckets of points held in memory. Buckets are created on first write and get an ID
/// of 16 hex digits in creation order.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<BTreeMap<String, Bucket>>,
}

type SeriesKey = (String, Vec<(String, String)>, String);

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends points to `bucket` and returns the bucket ID.
    pub fn write(&self, bucket: &str, points: impl IntoIterator<Item = Point>) -> String {
        let mut buckets = self.buckets.write();
        let next_id = format!("{:016x}", buckets.len() + 1);
        let b = buckets.entry(bucket.to_string()).or_insert_with(|| Bucket {
            id: next_id,
            points: Vec::new(),
        });
        b.points.extend(points);
        b.id.clone()
    }

    pub fn bucket_id(&self, bucket: &str) -> Option<String> {
        self.buckets.read().get(bucket).map(|b| b.id.clone())
    }

    fn series(&self, spec: &ReadSpec) -> Result<BTreeMap<SeriesKey, Vec<(Time, f64)>>, ExecuteError> {
        let buckets = self.buckets.read();
        let bucket = match &spec.bucket {
            BucketRef::Name(name) => buckets.get(name),
            BucketRef::Id(id) => buckets.values().find(|b| &b.id == id),
        }
        .ok_or_else(|| ExecuteError::Storage(format!("bucket {:?} not found", spec.bucket)))?;

        let mut series: BTreeMap<SeriesKey, Vec<(Time, f64)>> = BTreeMap::new();
        for p in &bucket.points {
            if p.time < spec.start || p.time >= spec.stop {
                continue;
            }
            let key = (
                p.measurement.clone(),
                p.tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                p.field.clone(),
            );
            series.entry(key).or_default().push((p.time, p.value));
        }
        for points in series.values_mut() {
            points.sort_by_key(|(t, _)| *t);
        }
        Ok(series)
    }
}

impl StorageReader for MemoryStorage {
    fn read(&self, spec: &ReadSpec) -> Result<Vec<Table>, ExecuteError> {
        let series = self.series(spec)?;
        debug!(bucket = ?spec.bucket, series = series.len(), aggregate = ?spec.aggregate, "storage read");
        series
            .into_iter()
            .map(|(key, points)| series_table(spec, key, points))
            .collect()
    }
}

fn series_table(
    spec: &ReadSpec,
    (measurement, tags, field): SeriesKey,
    points: Vec<(Time, f64)>,
) -> Result<Table, ExecuteError> {
    let mut key_cols = vec![
        ColMeta::new(DEFAULT_START_COL, ColType::Time),
        ColMeta::new(DEFAULT_STOP_COL, ColType::Time),
        ColMeta::new(FIELD_COL, ColType::String),
        ColMeta::new(MEASUREMENT_COL, ColType::String),
    ];
    let mut key_values = vec![
        Value::Time(spec.start),
        Value::Time(spec.stop),
        Value::String(field),
        Value::String(measurement),
    ];
    for (k, v) in tags {
        key_cols.push(ColMeta::new(k, ColType::String));
        key_values.push(Value::String(v));
    }

    let (rows, value_col, value_data) = match spec.aggregate {
        None => {
            let values = points.iter().map(|(_, v)| *v).collect();
            (points.len(), ColType::Float, ColumnData::Float(values))
        }
        Some(AGGREGATE_COUNT) => (1, ColType::Int, ColumnData::Int(vec![points.len() as i64])),
        Some(AGGREGATE_SUM) => {
            let sum = points.iter().map(|(_, v)| v).sum();
            (1, ColType::Float, ColumnData::Float(vec![sum]))
        }
        Some(other) => {
            return Err(ExecuteError::Storage(format!(
                "unsupported aggregate {other:?}"
            )))
        }
    };

    let mut cols = key_cols.clone();
    let mut columns: Vec<ColumnData> = key_values.iter().map(|v| repeat(v, rows)).collect();
    if spec.aggregate.is_none() {
        cols.insert(2, ColMeta::new(DEFAULT_TIME_COL, ColType::Time));
        columns.insert(2, ColumnData::Time(points.iter().map(|(t, _)| *t).collect()));
    }
    cols.push(ColMeta::new(DEFAULT_VALUE_COL, value_col));
    columns.push(value_data);

    Table::new(GroupKey::new(key_cols, key_values), cols, columns)
}

fn repeat(value: &Value, rows: usize) -> ColumnData {
    match value {
        Value::Time(t) => ColumnData::Time(vec![*t; rows]),
        other => ColumnData::String(vec![other.str().to_string(); rows]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> MemoryStorage {
        let s = MemoryStorage::new();
        s.write(
            "telegraf",
            [
                Point::new("cpu", "usage", Time::from_unix(20), 2.0).tag("host", "a"),
                Point::new("cpu", "usage", Time::from_unix(10), 1.0).tag("host", "a"),
                Point::new("cpu", "usage", Time::from_unix(10), 5.0).tag("host", "b"),
                Point::new("cpu", "usage", Time::from_unix(99), 9.0).tag("host", "b"),
            ],
        );
        s
    }

    fn read(aggregate: Option<&'static str>) -> Vec<Table> {
        storage()
            .read(&ReadSpec {
                bucket: BucketRef::Name("telegraf".into()),
                start: Time::from_unix(0),
                stop: Time::from_unix(60),
                aggregate,
            })
            .unwrap()
    }

    #[test]
    fn test_one_table_per_series() {
        let tables = read(None);
        assert_eq!(tables.len(), 2);
        let a = &tables[0];
        assert_eq!(a.key().label_value("host"), Some(&Value::from("a")));
        assert_eq!(
            a.column_by_label("_time"),
            Some(&ColumnData::Time(vec![Time::from_unix(10), Time::from_unix(20)]))
        );
        assert_eq!(tables[1].num_rows(), 1);
        assert!(!a.key().has_col("_time"));
    }

    #[test]
    fn test_aggregates() {
        let counts = read(Some(AGGREGATE_COUNT));
        assert_eq!(counts[0].column_by_label("_value"), Some(&ColumnData::Int(vec![2])));
        assert!(counts[0].column_by_label("_time").is_none());
        let sums = read(Some(AGGREGATE_SUM));
        assert_eq!(sums[1].column_by_label("_value"), Some(&ColumnData::Float(vec![5.0])));
    }

    #[test]
    fn test_bucket_lookup() {
        let s = storage();
        let id = s.bucket_id("telegraf").unwrap();
        assert_eq!(id, "0000000000000001");
        let spec = ReadSpec {
            bucket: BucketRef::Id(id),
            start: Time::MIN,
            stop: Time::MAX,
            aggregate: None,
        };
        assert_eq!(s.read(&spec).unwrap().len(), 2);
        let missing = ReadSpec {
            bucket: BucketRef::Name("nope".into()),
            ..spec
        };
        assert!(matches!(s.read(&missing), Err(ExecuteError::Storage(_))));
    }
}
