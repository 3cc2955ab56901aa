use std::sync::Arc;

use tracing::{debug, instrument, trace};
use tsq_ir::{OperationId, Spec, DEFAULT_RESULT_NAME};

use crate::bounds::BoundsSpec;
use crate::error::PlanError;
use crate::plan::{PlanSpec, PushDownRoot, Resources, YieldSpec};
use crate::procedure::{Procedure, ProcedureId, PushDownRule};
use crate::registry::{Administration, ProcedureRegistry};

struct IdConverter;

impl Administration for IdConverter {
    fn convert_id(&self, id: &OperationId) -> ProcedureId {
        ProcedureId::from_operation(id)
    }
}

/// Turns a compiled [`Spec`] into a [`PlanSpec`].
#[derive(Clone)]
pub struct Planner {
    procedures: Arc<ProcedureRegistry>,
    resources: Resources,
}

impl Planner {
    pub fn new(procedures: Arc<ProcedureRegistry>) -> Self {
        Self {
            procedures,
            resources: Resources::default(),
        }
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    #[instrument(skip_all, fields(operations = spec.operations.len()))]
    pub fn plan(&self, spec: &Spec) -> Result<PlanSpec, PlanError> {
        if !self.procedures.is_frozen() {
            return Err(PlanError::NotFrozen);
        }
        spec.validate()?;

        let mut plan = PlanSpec::new(spec.now);
        plan.resources = self.resources;

        for op_id in spec.topological_order()? {
            let Some(op) = spec.operation(&op_id) else {
                continue;
            };
            let kind = op.spec.kind();
            let create = self
                .procedures
                .candidates(kind.as_str())
                .into_iter()
                .next()
                .ok_or_else(|| PlanError::NoProcedure(kind.to_string()))?;

            let mut procedure = Procedure::new(
                ProcedureId::from_operation(&op.id),
                create(&op.spec, &IdConverter)?,
            );
            procedure.parents = spec
                .parents(&op.id)
                .into_iter()
                .map(ProcedureId::from_operation)
                .collect();
            procedure.children = spec
                .children(&op.id)
                .into_iter()
                .map(ProcedureId::from_operation)
                .collect();
            trace!(operation = %op.id, procedure = %procedure.id, kind = procedure.kind(), "created procedure");
            plan.insert(procedure);
        }

        push_down(&mut plan);
        compute_bounds(&mut plan);
        collect_results(&mut plan)?;

        debug!(
            procedures = plan.procedures.len(),
            results = plan.results.len(),
            "planned query"
        );
        Ok(plan)
    }
}

fn push_down(plan: &mut PlanSpec) {
    for id in plan.order.clone() {
        let Some(spec) = plan.procedure(id).map(|p| p.spec.copy()) else {
            continue;
        };
        let Some(pushable) = spec.as_push_down() else {
            continue;
        };

        let mut matched = false;
        for rule in pushable.push_down_rules() {
            let mut found = Vec::new();
            search(plan, id, &rule, &mut Vec::new(), &mut found);
            for (root, path) in found {
                trace!(procedure = %id, root = %root, kind = spec.kind(), "pushing down");
                let mut target = PushDownRoot::new(plan, root, path, id);
                pushable.push_down(&mut target);
                matched = true;
            }
        }
        if matched {
            plan.remove_procedure(id);
        }
    }
}

/// Collects every ancestor of `id` that `rule` can push into, together with the
/// procedures passed through on the way (root side first).
fn search(
    plan: &PlanSpec,
    id: ProcedureId,
    rule: &PushDownRule,
    path: &mut Vec<ProcedureId>,
    found: &mut Vec<(ProcedureId, Vec<ProcedureId>)>,
) {
    for parent in plan.parents(id) {
        let kind = parent.kind();
        if kind == rule.root {
            if rule.is_match(parent.spec.as_ref()) {
                found.push((parent.id, path.iter().rev().copied().collect()));
            }
        } else if rule.is_through(kind) {
            path.push(parent.id);
            search(plan, parent.id, rule, path, found);
            path.pop();
        }
    }
}

fn compute_bounds(plan: &mut PlanSpec) {
    let now = plan.now;
    for id in plan.order.clone() {
        let Some(procedure) = plan.procedure(id) else {
            continue;
        };
        let own = procedure
            .spec
            .as_bounded()
            .map(|b| b.time_bounds())
            .unwrap_or_default();
        let parents: Vec<BoundsSpec> = plan.parents(id).iter().map(|p| p.bounds).collect();

        let bounds = match parents.split_first() {
            None => own,
            Some((first, rest)) => {
                let union = rest.iter().fold(*first, |acc, b| acc.union(b, now));
                if own.is_zero() {
                    union
                } else {
                    own.intersect(&union, now)
                }
            }
        };
        if let Some(p) = plan.procedure_mut(id) {
            p.bounds = bounds;
        }
    }
}

fn collect_results(plan: &mut PlanSpec) -> Result<(), PlanError> {
    for id in &plan.order {
        let Some(procedure) = plan.procedures.get(id) else {
            continue;
        };
        if let Some(y) = procedure.spec.as_yield() {
            let name = y.yield_name().to_string();
            if plan.results.contains_key(&name) {
                return Err(PlanError::DuplicateYield(name));
            }
            plan.results.insert(name, YieldSpec { id: *id });
        }
    }
    if !plan.results.is_empty() {
        return Ok(());
    }

    let leaves: Vec<ProcedureId> = plan
        .order
        .iter()
        .copied()
        .filter(|id| plan.procedures.get(id).map_or(false, |p| p.children.is_empty()))
        .collect();
    match leaves.as_slice() {
        [leaf] => {
            plan.results
                .insert(DEFAULT_RESULT_NAME.to_string(), YieldSpec { id: *leaf });
            Ok(())
        }
        _ => Err(PlanError::UnnamedResults(leaves.len())),
    }
}
