//! Compiled query specification
//!
//! The Spec is the one artifact the compiler hands to planners and other processes, so
//! its JSON field names (`operations`, `edges`, `id`, `spec`, `parent`, `child`, `now`)
//! are stable.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

use crate::operations::OperationSpec;
use crate::time::Time;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("found duplicate operation ID {0:?}")]
    DuplicateId(String),

    #[error("edge references unknown operation {0:?}")]
    UnknownOperation(String),

    #[error("found cycle in query")]
    Cycle,

    #[error("query has no operations")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        OperationId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        OperationId(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationKind(String);

impl OperationKind {
    pub fn new(kind: impl Into<String>) -> Self {
        OperationKind(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationKind {
    fn from(s: &str) -> Self {
        OperationKind(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub spec: OperationSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub parent: OperationId,
    pub child: OperationId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    pub operations: Vec<Operation>,
    pub edges: Vec<Edge>,
    pub now: Time,
}

impl Spec {
    pub fn new(now: Time) -> Self {
        Self {
            operations: Vec::new(),
            edges: Vec::new(),
            now,
        }
    }

    /// SHA-256 over the canonical JSON form
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("spec should always serialize");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn operation(&self, id: &OperationId) -> Option<&Operation> {
        self.operations.iter().find(|o| &o.id == id)
    }

    pub fn parents(&self, id: &OperationId) -> Vec<&OperationId> {
        self.edges
            .iter()
            .filter(|e| &e.child == id)
            .map(|e| &e.parent)
            .collect()
    }

    pub fn children(&self, id: &OperationId) -> Vec<&OperationId> {
        self.edges
            .iter()
            .filter(|e| &e.parent == id)
            .map(|e| &e.child)
            .collect()
    }

    /// Checks that IDs are unique, edges are closed over the operations and the graph
    /// is acyclic.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.operations.is_empty() {
            return Err(SpecError::Empty);
        }
        let mut ids = HashSet::new();
        for op in &self.operations {
            if !ids.insert(&op.id) {
                return Err(SpecError::DuplicateId(op.id.to_string()));
            }
        }
        for e in &self.edges {
            for id in [&e.parent, &e.child] {
                if !ids.contains(id) {
                    return Err(SpecError::UnknownOperation(id.to_string()));
                }
            }
        }
        self.topological_order().map(|_| ())
    }

    /// Operation IDs ordered parents first. Ties keep the order of `operations`.
    pub fn topological_order(&self) -> Result<Vec<OperationId>, SpecError> {
        let position: HashMap<&OperationId, usize> = self
            .operations
            .iter()
            .enumerate()
            .map(|(i, o)| (&o.id, i))
            .collect();
        let mut in_degree = vec![0usize; self.operations.len()];
        let mut children: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for e in &self.edges {
            let (Some(&p), Some(&c)) = (position.get(&e.parent), position.get(&e.child)) else {
                return Err(SpecError::UnknownOperation(e.child.to_string()));
            };
            in_degree[c] += 1;
            children.entry(p).or_default().push(c);
        }

        let mut ready: VecDeque<usize> = (0..self.operations.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.operations.len());
        while let Some(i) = ready.pop_front() {
            order.push(self.operations[i].id.clone());
            for &c in children.get(&i).map(Vec::as_slice).unwrap_or(&[]) {
                in_degree[c] -= 1;
                if in_degree[c] == 0 {
                    ready.push_back(c);
                }
            }
        }
        if order.len() != self.operations.len() {
            return Err(SpecError::Cycle);
        }
        Ok(order)
    }

    /// Visits operations parents first.
    pub fn walk<E>(&self, mut f: impl FnMut(&Operation) -> Result<(), E>) -> Result<(), E>
    where
        E: From<SpecError>,
    {
        for id in self.topological_order()? {
            if let Some(op) = self.operation(&id) {
                f(op)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{AggregateOpSpec, FromOpSpec};

    fn linear_spec() -> Spec {
        Spec {
            operations: vec![
                Operation {
                    id: "from0".into(),
                    spec: OperationSpec::From(FromOpSpec::bucket("b")),
                },
                Operation {
                    id: "mean0".into(),
                    spec: OperationSpec::Mean(AggregateOpSpec::default()),
                },
            ],
            edges: vec![Edge {
                parent: "from0".into(),
                child: "mean0".into(),
            }],
            now: Time::from_unix(0),
        }
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(linear_spec()).unwrap();
        assert_eq!(json["operations"][0]["id"], "from0");
        assert_eq!(json["operations"][0]["spec"]["kind"], "from");
        assert_eq!(json["operations"][0]["spec"]["bucket"], "b");
        assert_eq!(json["edges"][0]["parent"], "from0");
        assert_eq!(json["edges"][0]["child"], "mean0");
        assert_eq!(json["now"], "1970-01-01T00:00:00Z");

        let back: Spec = serde_json::from_value(json).unwrap();
        assert_eq!(back, linear_spec());
    }

    #[test]
    fn test_validate_detects_cycle() {
        let mut spec = linear_spec();
        spec.edges.push(Edge {
            parent: "mean0".into(),
            child: "from0".into(),
        });
        assert_eq!(spec.validate(), Err(SpecError::Cycle));
    }

    #[test]
    fn test_validate_unknown_edge() {
        let mut spec = linear_spec();
        spec.edges[0].child = "sum0".into();
        assert_eq!(
            spec.validate(),
            Err(SpecError::UnknownOperation("sum0".to_string()))
        );
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(linear_spec().fingerprint(), linear_spec().fingerprint());
        let mut other = linear_spec();
        other.now = Time::from_unix(1);
        assert_ne!(linear_spec().fingerprint(), other.fingerprint());
    }
}
