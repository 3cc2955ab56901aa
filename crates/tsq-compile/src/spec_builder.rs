//! Turns the side effects of an evaluated program into a [`Spec`]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;
use tsq_ir::{
    Edge, Function, Object, Operation, OperationId, OperationKind, Record, Spec, TableId,
    TableObject, Value,
};

use crate::error::CompileError;
use crate::interpreter::Interpreter;

pub const NOW_OPTION: &str = "now";

/// Walks the table objects reachable from `side_effects`, parents first, giving each
/// distinct node one ID of the form `<kind><n>`. `Spec.now` comes from calling the
/// `now` option.
pub fn to_spec(itrp: &mut Interpreter, side_effects: &[Value]) -> Result<Spec, CompileError> {
    let mut builder = SpecBuilder::default();
    for value in side_effects {
        if let Value::Object(Object::Table(t)) = value {
            builder.visit(t);
        }
    }

    let now = match itrp.option(NOW_OPTION).cloned() {
        Some(Value::Function(f)) => call_now(itrp, &f)?,
        Some(other) => {
            return Err(CompileError::Eval(format!(
                "option {:?} must be a function, got {}",
                NOW_OPTION,
                other.kind()
            )))
        }
        None => return Err(CompileError::MissingOption(NOW_OPTION.to_string())),
    };

    let mut spec = builder.spec;
    spec.now = now;
    debug!(
        operations = spec.operations.len(),
        edges = spec.edges.len(),
        now = %spec.now,
        "built spec"
    );
    Ok(spec)
}

fn call_now(itrp: &mut Interpreter, f: &Function) -> Result<tsq_ir::Time, CompileError> {
    match itrp.call(f, Record::new())? {
        Value::Time(t) => Ok(t),
        other => Err(CompileError::Eval(format!(
            "option {:?} must return a time, got {}",
            NOW_OPTION,
            other.kind()
        ))),
    }
}

#[derive(Default)]
struct SpecBuilder {
    spec: Spec,
    ids: HashMap<TableId, OperationId>,
    visited: HashSet<TableId>,
    counters: BTreeMap<OperationKind, usize>,
}

impl SpecBuilder {
    fn visit(&mut self, node: &Arc<TableObject>) {
        if !self.visited.insert(node.id()) {
            return;
        }
        for parent in node.parents() {
            self.visit(parent);
        }

        let id = self.next_id(node.kind());
        let mut op_spec = node.spec().clone();
        op_spec.assign_ids(&|t| self.ids.get(&t).cloned());
        self.ids.insert(node.id(), id.clone());
        self.spec.operations.push(Operation {
            id: id.clone(),
            spec: op_spec,
        });

        for parent in node.parents() {
            if let Some(parent_id) = self.ids.get(&parent.id()) {
                self.spec.edges.push(Edge {
                    parent: parent_id.clone(),
                    child: id.clone(),
                });
            }
        }
    }

    fn next_id(&mut self, kind: &OperationKind) -> OperationId {
        let n = self.counters.entry(kind.clone()).or_insert(0);
        let id = OperationId::new(format!("{}{}", kind, n));
        *n += 1;
        id
    }
}
