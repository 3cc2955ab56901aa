//! Keyword-argument extraction for builtin calls

use std::collections::BTreeSet;

use crate::time::{Duration, QueryTime, Time};
use crate::types::Kind;
use crate::values::{Array, Function, Object, Record, Value, ValueError};

/// Call arguments with tracking of which keys were read, so unknown keywords can be
/// reported after a builtin has consumed what it understands.
#[derive(Debug, Clone)]
pub struct Arguments {
    record: Record,
    used: BTreeSet<String>,
}

impl Arguments {
    pub fn new(record: Record) -> Self {
        Self {
            record,
            used: BTreeSet::new(),
        }
    }

    pub fn get(&mut self, name: &str) -> Option<Value> {
        let v = self.record.get(name).cloned();
        if v.is_some() {
            self.used.insert(name.to_string());
        }
        v
    }

    pub fn get_required(&mut self, name: &str) -> Result<Value, ValueError> {
        self.get(name)
            .ok_or_else(|| ValueError::MissingArgument(name.to_string()))
    }

    fn get_kind(&mut self, name: &str, kind: Kind) -> Result<Option<Value>, ValueError> {
        match self.get(name) {
            None => Ok(None),
            Some(v) if v.kind() == kind => Ok(Some(v)),
            Some(v) => Err(ValueError::ArgumentKind {
                name: name.to_string(),
                expected: kind,
                actual: v.kind(),
            }),
        }
    }

    fn required_kind(&mut self, name: &str, kind: Kind) -> Result<Value, ValueError> {
        self.get_kind(name, kind)?
            .ok_or_else(|| ValueError::MissingArgument(name.to_string()))
    }

    pub fn get_string(&mut self, name: &str) -> Result<Option<String>, ValueError> {
        Ok(self
            .get_kind(name, Kind::String)?
            .map(|v| v.str().to_string()))
    }

    pub fn get_required_string(&mut self, name: &str) -> Result<String, ValueError> {
        Ok(self.required_kind(name, Kind::String)?.str().to_string())
    }

    pub fn get_int(&mut self, name: &str) -> Result<Option<i64>, ValueError> {
        Ok(self.get_kind(name, Kind::Int)?.map(|v| v.int()))
    }

    pub fn get_bool(&mut self, name: &str) -> Result<Option<bool>, ValueError> {
        Ok(self.get_kind(name, Kind::Bool)?.map(|v| v.bool()))
    }

    pub fn get_array(&mut self, name: &str) -> Result<Option<Array>, ValueError> {
        Ok(self.get_kind(name, Kind::Array)?.map(|v| v.array().clone()))
    }

    pub fn get_required_array(&mut self, name: &str) -> Result<Array, ValueError> {
        Ok(self.required_kind(name, Kind::Array)?.array().clone())
    }

    pub fn get_object(&mut self, name: &str) -> Result<Option<Object>, ValueError> {
        Ok(self.get_kind(name, Kind::Object)?.map(|v| v.object().clone()))
    }

    pub fn get_required_object(&mut self, name: &str) -> Result<Object, ValueError> {
        Ok(self.required_kind(name, Kind::Object)?.object().clone())
    }

    pub fn get_function(&mut self, name: &str) -> Result<Option<Function>, ValueError> {
        Ok(self
            .get_kind(name, Kind::Function)?
            .map(|v| v.function().clone()))
    }

    pub fn get_required_function(&mut self, name: &str) -> Result<Function, ValueError> {
        Ok(self.required_kind(name, Kind::Function)?.function().clone())
    }

    /// Times may be given as a time, a duration relative to now, or Unix seconds.
    pub fn get_time(&mut self, name: &str) -> Result<Option<QueryTime>, ValueError> {
        self.get(name).map(|v| to_query_time(name, &v)).transpose()
    }

    pub fn get_required_time(&mut self, name: &str) -> Result<QueryTime, ValueError> {
        self.get_time(name)?
            .ok_or_else(|| ValueError::MissingArgument(name.to_string()))
    }

    pub fn get_duration(&mut self, name: &str) -> Result<Option<Duration>, ValueError> {
        Ok(self.get_kind(name, Kind::Duration)?.map(|v| v.duration()))
    }

    pub fn get_required_duration(&mut self, name: &str) -> Result<Duration, ValueError> {
        Ok(self.required_kind(name, Kind::Duration)?.duration())
    }

    /// Keys that were supplied but never read.
    pub fn list_unused(&self) -> Vec<String> {
        self.record
            .keys()
            .filter(|k| !self.used.contains(k.as_str()))
            .cloned()
            .collect()
    }

    pub fn into_record(self) -> Record {
        self.record
    }

    pub fn record(&self) -> &Record {
        &self.record
    }
}

pub fn to_query_time(name: &str, value: &Value) -> Result<QueryTime, ValueError> {
    match value {
        Value::Time(t) => Ok(QueryTime::absolute(*t)),
        Value::Duration(d) => Ok(QueryTime::relative(*d)),
        Value::Int(secs) => Ok(QueryTime::absolute(Time::from_unix(*secs))),
        other => Err(ValueError::Invalid(format!(
            "keyword argument {:?} is not a time, got {}",
            name,
            other.type_of()
        ))),
    }
}
