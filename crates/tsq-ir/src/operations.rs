//! Operation specs: the parameters of every operation a query can contain

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::semantic::FunctionExpression;
use crate::spec::{OperationId, OperationKind};
use crate::table::TableId;
use crate::time::QueryTime;

pub const DEFAULT_TIME_COL: &str = "_time";
pub const DEFAULT_START_COL: &str = "_start";
pub const DEFAULT_STOP_COL: &str = "_stop";
pub const DEFAULT_VALUE_COL: &str = "_value";
pub const DEFAULT_RESULT_NAME: &str = "_result";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OperationSpec {
    From(FromOpSpec),
    Range(RangeOpSpec),
    Filter(FilterOpSpec),
    Mean(AggregateOpSpec),
    Sum(AggregateOpSpec),
    Count(AggregateOpSpec),
    Yield(YieldOpSpec),
    Join(JoinOpSpec),
    Collate(CollateOpSpec),
    Rename(RenameOpSpec),
    Drop(DropOpSpec),
    Keep(KeepOpSpec),
    Duplicate(DuplicateOpSpec),
}

impl OperationSpec {
    pub fn kind(&self) -> OperationKind {
        let kind = match self {
            OperationSpec::From(_) => "from",
            OperationSpec::Range(_) => "range",
            OperationSpec::Filter(_) => "filter",
            OperationSpec::Mean(_) => "mean",
            OperationSpec::Sum(_) => "sum",
            OperationSpec::Count(_) => "count",
            OperationSpec::Yield(_) => "yield",
            OperationSpec::Join(_) => "join",
            OperationSpec::Collate(_) => "collate",
            OperationSpec::Rename(_) => "rename",
            OperationSpec::Drop(_) => "drop",
            OperationSpec::Keep(_) => "keep",
            OperationSpec::Duplicate(_) => "duplicate",
        };
        OperationKind::from(kind)
    }

    /// Resolves references to other pipeline nodes into operation IDs. Only called once
    /// every parent already has an ID.
    pub fn assign_ids(&mut self, lookup: &dyn Fn(TableId) -> Option<OperationId>) {
        if let OperationSpec::Join(join) = self {
            join.table_names = join
                .tables
                .iter()
                .filter_map(|(name, t)| lookup(*t).map(|id| (id, name.clone())))
                .collect();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FromOpSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_id: Option<String>,
}

impl FromOpSpec {
    pub fn bucket(name: impl Into<String>) -> Self {
        Self {
            bucket: Some(name.into()),
            bucket_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeOpSpec {
    pub start: QueryTime,
    pub stop: QueryTime,
    pub time_col: String,
    pub start_col: String,
    pub stop_col: String,
}

impl RangeOpSpec {
    /// A range from `start` up to now with the default column names.
    pub fn new(start: QueryTime) -> Self {
        Self {
            start,
            stop: QueryTime::NOW,
            time_col: DEFAULT_TIME_COL.to_string(),
            start_col: DEFAULT_START_COL.to_string(),
            stop_col: DEFAULT_STOP_COL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOpSpec {
    #[serde(rename = "fn")]
    pub func: FunctionExpression,
}

/// Shared by mean, sum and count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateOpSpec {
    pub columns: Vec<String>,
}

impl Default for AggregateOpSpec {
    fn default() -> Self {
        Self {
            columns: vec![DEFAULT_VALUE_COL.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldOpSpec {
    pub name: String,
}

impl Default for YieldOpSpec {
    fn default() -> Self {
        Self {
            name: DEFAULT_RESULT_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinOpSpec {
    pub on: Vec<String>,

    /// Operation ID of each joined parent mapped to the name it was given.
    pub table_names: BTreeMap<OperationId, String>,

    #[serde(skip)]
    pub tables: Vec<(String, TableId)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateOpSpec {
    pub row_key: Vec<String>,
    pub col_key: Vec<String>,
    pub value_col: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenameOpSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<BTreeMap<String, String>>,

    #[serde(rename = "fn", default, skip_serializing_if = "Option::is_none")]
    pub func: Option<FunctionExpression>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropOpSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<FunctionExpression>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeepOpSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<FunctionExpression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateOpSpec {
    pub column: String,
    #[serde(rename = "as")]
    pub as_: String,
}
