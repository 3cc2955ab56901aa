//! The physical plan and the graph edits push-down needs

use std::collections::{BTreeMap, HashMap};

use tracing::trace;
use tsq_ir::Time;

use crate::procedure::{Procedure, ProcedureId, ProcedureSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resources {
    /// Maximum number of transformations that may run at once.
    pub concurrency_quota: usize,
    /// Zero means unlimited.
    pub memory_bytes_quota: i64,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            concurrency_quota: 1,
            memory_bytes_quota: 0,
        }
    }
}

/// Names a procedure whose output is a query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YieldSpec {
    pub id: ProcedureId,
}

#[derive(Debug, Clone)]
pub struct PlanSpec {
    pub now: Time,
    pub resources: Resources,
    pub procedures: HashMap<ProcedureId, Procedure>,
    /// Procedure IDs, parents before children.
    pub order: Vec<ProcedureId>,
    pub results: BTreeMap<String, YieldSpec>,
}

impl PlanSpec {
    pub fn new(now: Time) -> Self {
        Self {
            now,
            resources: Resources::default(),
            procedures: HashMap::new(),
            order: Vec::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn procedure(&self, id: ProcedureId) -> Option<&Procedure> {
        self.procedures.get(&id)
    }

    pub fn procedure_mut(&mut self, id: ProcedureId) -> Option<&mut Procedure> {
        self.procedures.get_mut(&id)
    }

    pub fn parents(&self, id: ProcedureId) -> Vec<&Procedure> {
        self.related(id, |p| &p.parents)
    }

    pub fn children(&self, id: ProcedureId) -> Vec<&Procedure> {
        self.related(id, |p| &p.children)
    }

    fn related(&self, id: ProcedureId, f: impl Fn(&Procedure) -> &Vec<ProcedureId>) -> Vec<&Procedure> {
        self.procedures
            .get(&id)
            .map(|p| f(p).iter().filter_map(|i| self.procedures.get(i)).collect())
            .unwrap_or_default()
    }

    /// Procedures without parents.
    pub fn roots(&self) -> Vec<ProcedureId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.procedures.get(id).map_or(false, |p| p.parents.is_empty()))
            .collect()
    }

    /// Visits procedures parents first.
    pub fn walk<E>(&self, mut f: impl FnMut(&Procedure) -> Result<(), E>) -> Result<(), E> {
        for id in &self.order {
            if let Some(p) = self.procedures.get(id) {
                f(p)?;
            }
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, procedure: Procedure) {
        self.order.push(procedure.id);
        self.procedures.insert(procedure.id, procedure);
    }

    /// Removes a procedure, connecting its children straight to its parents.
    pub(crate) fn remove_procedure(&mut self, id: ProcedureId) {
        let Some(removed) = self.procedures.remove(&id) else {
            return;
        };
        self.order.retain(|o| *o != id);

        for parent_id in &removed.parents {
            if let Some(parent) = self.procedures.get_mut(parent_id) {
                let mut children = Vec::with_capacity(parent.children.len() + removed.children.len());
                for c in &parent.children {
                    if *c == id {
                        children.extend(removed.children.iter().copied());
                    } else {
                        children.push(*c);
                    }
                }
                parent.children = children;
            }
        }

        for child_id in &removed.children {
            if let Some(child) = self.procedures.get_mut(child_id) {
                let mut parents = Vec::with_capacity(child.parents.len() + removed.parents.len());
                for p in &child.parents {
                    if *p == id {
                        parents.extend(removed.parents.iter().copied());
                    } else {
                        parents.push(*p);
                    }
                }
                child.parents = parents;
                if let (Some(aware), Some(new)) =
                    (child.spec.as_parent_aware(), removed.parents.first())
                {
                    aware.parent_changed(id, *new);
                }
            }
        }
        trace!(procedure = %id, kind = removed.kind(), "removed procedure");
    }

    fn replace_parent(&mut self, child: ProcedureId, old: ProcedureId, new: ProcedureId) {
        if let Some(c) = self.procedures.get_mut(&child) {
            for p in c.parents.iter_mut().filter(|p| **p == old) {
                *p = new;
            }
            if let Some(aware) = c.spec.as_parent_aware() {
                aware.parent_changed(old, new);
            }
        }
        if let Some(o) = self.procedures.get_mut(&old) {
            o.children.retain(|c| *c != child);
        }
        if let Some(n) = self.procedures.get_mut(&new) {
            if !n.children.contains(&child) {
                n.children.push(child);
            }
        }
    }

    /// Copies `chain` (a root followed by descendants, each the parent of the next) and
    /// moves `leaf` from the last original onto the copies. Returns the copy of the root.
    pub(crate) fn duplicate_chain(&mut self, chain: &[ProcedureId], leaf: ProcedureId) -> Option<ProcedureId> {
        let mut prev: Option<(ProcedureId, ProcedureId)> = None;
        let mut root_copy = None;

        for &old_id in chain {
            let original = self.procedures.get(&old_id)?.clone();
            let mut new_id = old_id.duplicate();
            while self.procedures.contains_key(&new_id) {
                new_id = new_id.duplicate();
            }

            let mut copy = original;
            copy.id = new_id;
            copy.children.clear();
            if let Some((old_parent, new_parent)) = prev {
                for p in copy.parents.iter_mut().filter(|p| **p == old_parent) {
                    *p = new_parent;
                }
                if let Some(aware) = copy.spec.as_parent_aware() {
                    aware.parent_changed(old_parent, new_parent);
                }
            }
            for p in &copy.parents {
                if let Some(parent) = self.procedures.get_mut(p) {
                    parent.children.push(new_id);
                }
            }

            let pos = self.order.iter().position(|o| *o == old_id).map_or(self.order.len(), |i| i + 1);
            self.order.insert(pos, new_id);
            self.procedures.insert(new_id, copy);

            root_copy.get_or_insert(new_id);
            prev = Some((old_id, new_id));
        }

        if let Some((old_last, new_last)) = prev {
            self.replace_parent(leaf, old_last, new_last);
        }
        self.prune_chain(chain);
        root_copy
    }

    /// Removes originals of a duplicated chain that fed nothing but the moved leaf. Left
    /// in place they would still read as sources and count as unnamed results.
    fn prune_chain(&mut self, chain: &[ProcedureId]) {
        for &id in chain.iter().rev() {
            let orphaned = self
                .procedures
                .get(&id)
                .map_or(false, |p| p.children.is_empty() && p.spec.as_yield().is_none());
            if !orphaned {
                break;
            }
            self.remove_procedure(id);
        }
    }
}

/// The ancestor a push-down merges into. Handed to
/// [`PushDownProcedureSpec::push_down`](crate::PushDownProcedureSpec::push_down).
pub struct PushDownRoot<'a> {
    plan: &'a mut PlanSpec,
    root: ProcedureId,
    /// Procedures between the root and the pushed procedure, root side first.
    path: Vec<ProcedureId>,
    pushed: ProcedureId,
}

impl<'a> PushDownRoot<'a> {
    pub(crate) fn new(
        plan: &'a mut PlanSpec,
        root: ProcedureId,
        path: Vec<ProcedureId>,
        pushed: ProcedureId,
    ) -> Self {
        Self {
            plan,
            root,
            path,
            pushed,
        }
    }

    pub fn id(&self) -> ProcedureId {
        self.root
    }

    /// The instant relative query times resolve against.
    pub fn now(&self) -> Time {
        self.plan.now
    }

    pub fn spec(&self) -> Option<&dyn ProcedureSpec> {
        self.plan.procedure(self.root).map(|p| p.spec.as_ref())
    }

    pub fn spec_mut(&mut self) -> Option<&mut (dyn ProcedureSpec + 'static)> {
        self.plan.procedure_mut(self.root).map(|p| p.spec.as_mut())
    }

    /// Whether the root, or a procedure between it and the pushed one, also feeds other
    /// children. Changing the shape of such a root's output affects them too.
    pub fn is_shared(&self) -> bool {
        std::iter::once(self.root)
            .chain(self.path.iter().copied())
            .any(|id| self.plan.procedure(id).map_or(false, |p| p.children.len() > 1))
    }

    /// Gives the pushed procedure its own copy of the root (and of the procedures in
    /// between) so other children of the root are unaffected. Returns the copy's spec.
    pub fn duplicate(&mut self) -> Option<&mut (dyn ProcedureSpec + 'static)> {
        let mut chain = Vec::with_capacity(self.path.len() + 1);
        chain.push(self.root);
        chain.extend(self.path.iter().copied());
        self.root = self.plan.duplicate_chain(&chain, self.pushed)?;
        self.spec_mut()
    }
}
