//! Planning specs with a small set of procedures.

use std::sync::Arc;

use tsq_ir::{
    AggregateOpSpec, Duration, Edge, FromOpSpec, KeepOpSpec, Operation, OperationId,
    OperationSpec, QueryTime, RangeOpSpec, Spec, Time, YieldOpSpec,
};
use tsq_plan::{
    procedure_spec_common, Administration, BoundedProcedureSpec, BoundsSpec, PlanError,
    PlanSpec, Planner, ProcedureId, ProcedureKind, ProcedureRegistry, ProcedureSpec,
    PushDownProcedureSpec, PushDownRoot, PushDownRule, YieldProcedureSpec,
};

#[derive(Debug, Clone, Default)]
struct FromProc {
    bucket: String,
    bounds: Option<BoundsSpec>,
    aggregate: Option<&'static str>,
}

impl ProcedureSpec for FromProc {
    fn kind(&self) -> ProcedureKind {
        "from"
    }

    procedure_spec_common!();

    fn as_bounded(&self) -> Option<&dyn BoundedProcedureSpec> {
        self.bounds.as_ref().map(|_| self as &dyn BoundedProcedureSpec)
    }
}

impl BoundedProcedureSpec for FromProc {
    fn time_bounds(&self) -> BoundsSpec {
        self.bounds.unwrap_or_default()
    }
}

/// Hands the pushed procedure its own `from` when `conflicts` says the current one is taken.
fn push_into_from(
    root: &mut PushDownRoot<'_>,
    conflicts: fn(&FromProc) -> bool,
    apply: impl FnOnce(&mut FromProc),
) {
    let taken = root
        .spec()
        .and_then(|s| s.downcast_ref::<FromProc>())
        .map_or(false, conflicts);
    let target = if taken { root.duplicate() } else { root.spec_mut() };
    if let Some(from) = target.and_then(|s| s.downcast_mut::<FromProc>()) {
        apply(from);
    }
}

#[derive(Debug, Clone)]
struct RangeProc {
    bounds: BoundsSpec,
}

impl ProcedureSpec for RangeProc {
    fn kind(&self) -> ProcedureKind {
        "range"
    }

    procedure_spec_common!();

    fn as_push_down(&self) -> Option<&dyn PushDownProcedureSpec> {
        Some(self)
    }

    fn as_bounded(&self) -> Option<&dyn BoundedProcedureSpec> {
        Some(self)
    }
}

impl BoundedProcedureSpec for RangeProc {
    fn time_bounds(&self) -> BoundsSpec {
        self.bounds
    }
}

impl PushDownProcedureSpec for RangeProc {
    fn push_down_rules(&self) -> Vec<PushDownRule> {
        vec![PushDownRule::new("from")]
    }

    fn push_down(&self, root: &mut PushDownRoot<'_>) {
        let bounds = self.bounds;
        push_into_from(root, |f| f.bounds.is_some(), |f| f.bounds = Some(bounds));
    }
}

#[derive(Debug, Clone)]
struct AggregateProc {
    method: &'static str,
}

impl ProcedureSpec for AggregateProc {
    fn kind(&self) -> ProcedureKind {
        self.method
    }

    procedure_spec_common!();

    fn as_push_down(&self) -> Option<&dyn PushDownProcedureSpec> {
        Some(self)
    }
}

impl PushDownProcedureSpec for AggregateProc {
    fn push_down_rules(&self) -> Vec<PushDownRule> {
        vec![PushDownRule::new("from")
            .through(&["keep"])
            .matching(|s| s.downcast_ref::<FromProc>().map_or(false, |f| !f.bucket.is_empty()))]
    }

    fn push_down(&self, root: &mut PushDownRoot<'_>) {
        let method = self.method;
        push_into_from(root, |f| f.aggregate.is_some(), |f| f.aggregate = Some(method));
    }
}

#[derive(Debug, Clone)]
struct PassProc {
    kind: ProcedureKind,
}

impl ProcedureSpec for PassProc {
    fn kind(&self) -> ProcedureKind {
        self.kind
    }

    procedure_spec_common!();
}

#[derive(Debug, Clone)]
struct YieldProc {
    name: String,
}

impl ProcedureSpec for YieldProc {
    fn kind(&self) -> ProcedureKind {
        "yield"
    }

    procedure_spec_common!();

    fn as_yield(&self) -> Option<&dyn YieldProcedureSpec> {
        Some(self)
    }
}

impl YieldProcedureSpec for YieldProc {
    fn yield_name(&self) -> &str {
        &self.name
    }
}

fn unexpected(spec: &OperationSpec) -> PlanError {
    PlanError::invalid(spec.kind().as_str(), "unexpected operation spec")
}

fn create_from(spec: &OperationSpec, _: &dyn Administration) -> Result<Box<dyn ProcedureSpec>, PlanError> {
    match spec {
        OperationSpec::From(f) => Ok(Box::new(FromProc {
            bucket: f.bucket.clone().unwrap_or_default(),
            ..Default::default()
        })),
        other => Err(unexpected(other)),
    }
}

fn create_range(spec: &OperationSpec, _: &dyn Administration) -> Result<Box<dyn ProcedureSpec>, PlanError> {
    match spec {
        OperationSpec::Range(r) => Ok(Box::new(RangeProc {
            bounds: BoundsSpec::new(r.start, r.stop),
        })),
        other => Err(unexpected(other)),
    }
}

fn create_aggregate(spec: &OperationSpec, _: &dyn Administration) -> Result<Box<dyn ProcedureSpec>, PlanError> {
    match spec {
        OperationSpec::Count(_) => Ok(Box::new(AggregateProc { method: "count" })),
        OperationSpec::Sum(_) => Ok(Box::new(AggregateProc { method: "sum" })),
        other => Err(unexpected(other)),
    }
}

fn create_pass(spec: &OperationSpec, _: &dyn Administration) -> Result<Box<dyn ProcedureSpec>, PlanError> {
    match spec {
        OperationSpec::Keep(_) => Ok(Box::new(PassProc { kind: "keep" })),
        OperationSpec::Mean(_) => Ok(Box::new(PassProc { kind: "mean" })),
        other => Err(unexpected(other)),
    }
}

fn create_yield(spec: &OperationSpec, _: &dyn Administration) -> Result<Box<dyn ProcedureSpec>, PlanError> {
    match spec {
        OperationSpec::Yield(y) => Ok(Box::new(YieldProc {
            name: y.name.clone(),
        })),
        other => Err(unexpected(other)),
    }
}

fn planner() -> Planner {
    let mut registry = ProcedureRegistry::new();
    registry.register("from", create_from, &["from"]).unwrap();
    registry.register("range", create_range, &["range"]).unwrap();
    registry.register("count", create_aggregate, &["count"]).unwrap();
    registry.register("sum", create_aggregate, &["sum"]).unwrap();
    registry.register("keep", create_pass, &["keep"]).unwrap();
    registry.register("mean", create_pass, &["mean"]).unwrap();
    registry.register("yield", create_yield, &["yield"]).unwrap();
    registry.freeze();
    Planner::new(Arc::new(registry))
}

fn hours(h: i64) -> QueryTime {
    QueryTime::relative(Duration::from_hours(h))
}

fn op(id: &str, spec: OperationSpec) -> Operation {
    Operation { id: id.into(), spec }
}

fn named_yield(id: &str, name: &str) -> Operation {
    op(id, OperationSpec::Yield(YieldOpSpec { name: name.into() }))
}

fn spec(operations: Vec<Operation>, edges: &[(&str, &str)]) -> Spec {
    Spec {
        operations,
        edges: edges
            .iter()
            .map(|(p, c)| Edge {
                parent: (*p).into(),
                child: (*c).into(),
            })
            .collect(),
        now: Time::parse_rfc3339("2018-05-22T19:53:26Z").unwrap(),
    }
}

fn pid(op: &str) -> ProcedureId {
    ProcedureId::from_operation(&OperationId::from(op))
}

fn kinds(plan: &PlanSpec) -> Vec<&'static str> {
    plan.order
        .iter()
        .map(|id| plan.procedures[id].kind())
        .collect()
}

fn from_spec(plan: &PlanSpec, id: ProcedureId) -> &FromProc {
    plan.procedures[&id].spec.downcast_ref::<FromProc>().unwrap()
}

#[test]
fn test_range_is_pushed_into_from() {
    let plan = planner()
        .plan(&spec(
            vec![
                op("from0", OperationSpec::From(FromOpSpec::bucket("b"))),
                op("range0", OperationSpec::Range(RangeOpSpec::new(hours(-1)))),
                op("mean0", OperationSpec::Mean(AggregateOpSpec::default())),
            ],
            &[("from0", "range0"), ("range0", "mean0")],
        ))
        .unwrap();

    assert_eq!(kinds(&plan), vec!["from", "mean"]);
    let want = BoundsSpec::new(hours(-1), QueryTime::NOW);
    assert_eq!(from_spec(&plan, pid("from0")).bounds, Some(want));
    assert_eq!(plan.procedures[&pid("from0")].bounds, want);
    assert_eq!(plan.procedures[&pid("from0")].children, vec![pid("mean0")]);
    assert_eq!(plan.procedures[&pid("mean0")].parents, vec![pid("from0")]);
    assert_eq!(plan.procedures[&pid("mean0")].bounds, want);
    assert_eq!(plan.results["_result"].id, pid("mean0"));
}

#[test]
fn test_bounds_intersect_with_parents() {
    let plan = planner()
        .plan(&spec(
            vec![
                op("from0", OperationSpec::From(FromOpSpec::bucket("b"))),
                op("range0", OperationSpec::Range(RangeOpSpec::new(hours(-2)))),
                op("keep0", OperationSpec::Keep(KeepOpSpec::default())),
                op("range1", OperationSpec::Range(RangeOpSpec::new(hours(-3)))),
            ],
            &[("from0", "range0"), ("range0", "keep0"), ("keep0", "range1")],
        ))
        .unwrap();

    assert_eq!(kinds(&plan), vec!["from", "keep", "range"]);
    assert_eq!(
        plan.procedures[&pid("range1")].bounds,
        BoundsSpec::new(hours(-2), QueryTime::NOW)
    );
}

#[test]
fn test_shared_from_is_duplicated() {
    let plan = planner()
        .plan(&spec(
            vec![
                op("from0", OperationSpec::From(FromOpSpec::bucket("b"))),
                op("range0", OperationSpec::Range(RangeOpSpec::new(hours(-1)))),
                op("range1", OperationSpec::Range(RangeOpSpec::new(hours(-2)))),
                named_yield("yield0", "short"),
                named_yield("yield1", "long"),
            ],
            &[
                ("from0", "range0"),
                ("from0", "range1"),
                ("range0", "yield0"),
                ("range1", "yield1"),
            ],
        ))
        .unwrap();

    let dup = pid("from0").duplicate();
    assert_eq!(kinds(&plan), vec!["from", "from", "yield", "yield"]);
    assert_eq!(plan.order[1], dup);
    assert_eq!(
        from_spec(&plan, pid("from0")).bounds,
        Some(BoundsSpec::new(hours(-1), QueryTime::NOW))
    );
    assert_eq!(
        from_spec(&plan, dup).bounds,
        Some(BoundsSpec::new(hours(-2), QueryTime::NOW))
    );
    assert_eq!(plan.procedures[&pid("from0")].children, vec![pid("yield0")]);
    assert_eq!(plan.procedures[&dup].children, vec![pid("yield1")]);
    assert_eq!(plan.procedures[&pid("yield1")].parents, vec![dup]);
    assert_eq!(plan.results["short"].id, pid("yield0"));
    assert_eq!(plan.results["long"].id, pid("yield1"));
    assert_eq!(plan.roots(), vec![pid("from0"), dup]);
}

#[test]
fn test_duplicated_root_without_other_children_is_pruned() {
    let plan = planner()
        .plan(&spec(
            vec![
                op("from0", OperationSpec::From(FromOpSpec::bucket("b"))),
                op("range0", OperationSpec::Range(RangeOpSpec::new(hours(-2)))),
                op("range1", OperationSpec::Range(RangeOpSpec::new(hours(-1)))),
            ],
            &[("from0", "range0"), ("range0", "range1")],
        ))
        .unwrap();

    let dup = pid("from0").duplicate();
    assert_eq!(kinds(&plan), vec!["from"]);
    assert!(!plan.procedures.contains_key(&pid("from0")));
    assert_eq!(plan.roots(), vec![dup]);
    assert_eq!(
        from_spec(&plan, dup).bounds,
        Some(BoundsSpec::new(hours(-1), QueryTime::NOW))
    );
    assert_eq!(plan.results["_result"].id, dup);
}

#[test]
fn test_aggregates_push_through_and_duplicate_the_chain() {
    let plan = planner()
        .plan(&spec(
            vec![
                op("from0", OperationSpec::From(FromOpSpec::bucket("b"))),
                op("keep0", OperationSpec::Keep(KeepOpSpec::default())),
                op("count0", OperationSpec::Count(AggregateOpSpec::default())),
                op("sum0", OperationSpec::Sum(AggregateOpSpec::default())),
                named_yield("yield0", "count"),
                named_yield("yield1", "sum"),
            ],
            &[
                ("from0", "keep0"),
                ("keep0", "count0"),
                ("keep0", "sum0"),
                ("count0", "yield0"),
                ("sum0", "yield1"),
            ],
        ))
        .unwrap();

    let from_dup = pid("from0").duplicate();
    let keep_dup = pid("keep0").duplicate();
    assert_eq!(
        plan.order,
        vec![pid("from0"), from_dup, pid("keep0"), keep_dup, pid("yield0"), pid("yield1")]
    );
    assert_eq!(from_spec(&plan, pid("from0")).aggregate, Some("count"));
    assert_eq!(from_spec(&plan, from_dup).aggregate, Some("sum"));
    assert_eq!(plan.procedures[&from_dup].children, vec![keep_dup]);
    assert_eq!(plan.procedures[&keep_dup].parents, vec![from_dup]);
    assert_eq!(plan.procedures[&keep_dup].children, vec![pid("yield1")]);
    assert_eq!(plan.procedures[&pid("keep0")].children, vec![pid("yield0")]);
}

#[test]
fn test_push_down_respects_match() {
    let plan = planner()
        .plan(&spec(
            vec![
                op("from0", OperationSpec::From(FromOpSpec::default())),
                op("count0", OperationSpec::Count(AggregateOpSpec::default())),
            ],
            &[("from0", "count0")],
        ))
        .unwrap();
    assert_eq!(kinds(&plan), vec!["from", "count"]);
    assert_eq!(from_spec(&plan, pid("from0")).aggregate, None);
}

#[test]
fn test_plan_errors() {
    let planner = planner();
    let unknown = spec(
        vec![
            op("from0", OperationSpec::From(FromOpSpec::bucket("b"))),
            op("drop0", OperationSpec::Drop(Default::default())),
        ],
        &[("from0", "drop0")],
    );
    assert!(matches!(
        planner.plan(&unknown),
        Err(PlanError::NoProcedure(kind)) if kind == "drop"
    ));

    let duplicate_yield = spec(
        vec![
            op("from0", OperationSpec::From(FromOpSpec::bucket("b"))),
            named_yield("yield0", "x"),
            named_yield("yield1", "x"),
        ],
        &[("from0", "yield0"), ("from0", "yield1")],
    );
    assert!(matches!(
        planner.plan(&duplicate_yield),
        Err(PlanError::DuplicateYield(name)) if name == "x"
    ));

    let two_leaves = spec(
        vec![
            op("from0", OperationSpec::From(FromOpSpec::bucket("a"))),
            op("from1", OperationSpec::From(FromOpSpec::bucket("b"))),
        ],
        &[],
    );
    assert!(matches!(
        planner.plan(&two_leaves),
        Err(PlanError::UnnamedResults(2))
    ));

    assert!(matches!(
        planner.plan(&spec(vec![], &[])),
        Err(PlanError::Spec(_))
    ));
}

#[test]
fn test_unfrozen_registry_is_rejected() {
    let planner = Planner::new(Arc::new(ProcedureRegistry::new()));
    let s = spec(vec![op("from0", OperationSpec::From(FromOpSpec::bucket("b")))], &[]);
    assert!(matches!(planner.plan(&s), Err(PlanError::NotFrozen)));
}
