//! Pipeline nodes produced by builtin calls
//!
//! Every [`TableObject`] is allocated in a [`TableArena`] and identified by its index.
//! Spec building deduplicates by that index, never by structural equality.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::operations::OperationSpec;
use crate::spec::OperationKind;
use crate::values::{Array, Record, Value};
use crate::types::Type;

pub const TABLE_KIND_KEY: &str = "kind";
pub const TABLE_PARENTS_KEY: &str = "parents";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub usize);

#[derive(Debug)]
pub struct TableObject {
    id: TableId,
    kind: OperationKind,
    spec: OperationSpec,
    parents: Vec<Arc<TableObject>>,
    args: Record,
}

impl TableObject {
    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub fn spec(&self) -> &OperationSpec {
        &self.spec
    }

    pub fn parents(&self) -> &[Arc<TableObject>] {
        &self.parents
    }

    pub fn args(&self) -> &Record {
        &self.args
    }

    fn parents_value(&self) -> Value {
        Value::Array(Array::new(
            Type::Table,
            self.parents.iter().cloned().map(Value::from).collect(),
        ))
    }

    /// Properties are the call arguments plus `kind` and `parents`.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            TABLE_KIND_KEY => Some(Value::String(self.kind.to_string())),
            TABLE_PARENTS_KEY => Some(self.parents_value()),
            _ => self.args.get(key).cloned(),
        }
    }

    pub fn len(&self) -> usize {
        self.args.len() + 2
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn range(&self, f: &mut dyn FnMut(&str, &Value)) {
        self.args.range(&mut *f);
        f(TABLE_KIND_KEY, &Value::String(self.kind.to_string()));
        f(TABLE_PARENTS_KEY, &self.parents_value());
    }
}

/// Owns every pipeline node created while evaluating one program.
#[derive(Debug, Default)]
pub struct TableArena {
    nodes: Vec<Arc<TableObject>>,
}

impl TableArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(
        &mut self,
        spec: OperationSpec,
        parents: Vec<Arc<TableObject>>,
        args: Record,
    ) -> Arc<TableObject> {
        let node = Arc::new(TableObject {
            id: TableId(self.nodes.len()),
            kind: spec.kind(),
            spec,
            parents,
            args,
        });
        self.nodes.push(node.clone());
        node
    }

    pub fn get(&self, id: TableId) -> Option<&Arc<TableObject>> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{FromOpSpec, RangeOpSpec};
    use crate::time::{Duration, QueryTime};

    #[test]
    fn test_alloc_assigns_sequential_ids() {
        let mut arena = TableArena::new();
        let from = arena.alloc(
            OperationSpec::From(FromOpSpec::bucket("b")),
            vec![],
            Record::new().with("bucket", "b"),
        );
        let range = arena.alloc(
            OperationSpec::Range(RangeOpSpec::new(QueryTime::relative(-Duration::from_hours(1)))),
            vec![from.clone()],
            Record::new(),
        );
        assert_eq!(from.id(), TableId(0));
        assert_eq!(range.id(), TableId(1));
        assert_eq!(range.kind().as_str(), "range");
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_table_object_properties() {
        let mut arena = TableArena::new();
        let from = arena.alloc(
            OperationSpec::From(FromOpSpec::bucket("b")),
            vec![],
            Record::new().with("bucket", "b"),
        );
        assert_eq!(from.get("kind"), Some(Value::from("from")));
        assert_eq!(from.get("bucket"), Some(Value::from("b")));
        assert_eq!(from.get("parents").map(|p| p.array().len()), Some(0));

        let mut keys = Vec::new();
        from.range(&mut |k, _| keys.push(k.to_string()));
        assert_eq!(keys, vec!["bucket", "kind", "parents"]);
        assert_eq!(from.len(), 3);
    }
}
