//! Procedures: the physical nodes of a plan, and the capabilities their specs expose

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use tsq_ir::OperationId;
use uuid::Uuid;

use crate::bounds::BoundsSpec;
use crate::plan::PushDownRoot;

/// Namespace for procedure IDs derived from operation IDs.
const PROCEDURE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a57_93de_4c0b_8e61_0d4a_5b7f_3c21);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcedureId(Uuid);

impl ProcedureId {
    pub const ZERO: ProcedureId = ProcedureId(Uuid::nil());

    /// Stable ID for the procedure planned from `id`.
    pub fn from_operation(id: &OperationId) -> Self {
        ProcedureId(Uuid::new_v5(&PROCEDURE_NAMESPACE, id.as_str().as_bytes()))
    }

    /// Stable ID for a copy of this procedure.
    pub fn duplicate(&self) -> Self {
        let name = format!("{}dup", self.0);
        ProcedureId(Uuid::new_v5(&PROCEDURE_NAMESPACE, name.as_bytes()))
    }
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type ProcedureKind = &'static str;

/// Parameters of one planned procedure. Optional capabilities are exposed through the
/// `as_*` accessors, which return `None` unless the spec implements them.
pub trait ProcedureSpec: fmt::Debug + Send + Sync {
    fn kind(&self) -> ProcedureKind;

    fn copy(&self) -> Box<dyn ProcedureSpec>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn as_push_down(&self) -> Option<&dyn PushDownProcedureSpec> {
        None
    }

    fn as_bounded(&self) -> Option<&dyn BoundedProcedureSpec> {
        None
    }

    fn as_aggregate(&self) -> Option<&dyn AggregateProcedureSpec> {
        None
    }

    fn as_parent_aware(&mut self) -> Option<&mut dyn ParentAwareProcedureSpec> {
        None
    }

    fn as_yield(&self) -> Option<&dyn YieldProcedureSpec> {
        None
    }
}

impl<'a> dyn ProcedureSpec + 'a {
    pub fn downcast_ref<T: ProcedureSpec + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    pub fn downcast_mut<T: ProcedureSpec + 'static>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }
}

impl Clone for Box<dyn ProcedureSpec> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

/// Implements the boilerplate `ProcedureSpec` methods for a `Clone` type.
#[macro_export]
macro_rules! procedure_spec_common {
    () => {
        fn copy(&self) -> Box<dyn $crate::ProcedureSpec> {
            Box::new(self.clone())
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    };
}

/// A spec that can be absorbed by an ancestor, e.g. `range` into `from`.
pub trait PushDownProcedureSpec {
    fn push_down_rules(&self) -> Vec<PushDownRule>;

    /// Merges this procedure's parameters into `root`. Call [`PushDownRoot::duplicate`]
    /// when `root` already holds conflicting state.
    fn push_down(&self, root: &mut PushDownRoot<'_>);
}

pub trait BoundedProcedureSpec {
    fn time_bounds(&self) -> BoundsSpec;
}

pub trait AggregateProcedureSpec {
    /// Name of the aggregate the storage layer should compute.
    fn aggregate_method(&self) -> &'static str;

    /// Procedure combining partial results produced by pushed-down aggregates.
    fn re_aggregate_spec(&self) -> Box<dyn ProcedureSpec>;
}

pub trait ParentAwareProcedureSpec {
    fn parent_changed(&mut self, old: ProcedureId, new: ProcedureId);
}

pub trait YieldProcedureSpec {
    fn yield_name(&self) -> &str;
}

/// Walk from a procedure up through ancestors of a `through` kind until a `root` kind is
/// found whose spec satisfies `matches`.
#[derive(Clone)]
pub struct PushDownRule {
    pub root: ProcedureKind,
    pub through: Vec<ProcedureKind>,
    pub matches: Option<fn(&dyn ProcedureSpec) -> bool>,
}

impl PushDownRule {
    pub fn new(root: ProcedureKind) -> Self {
        Self {
            root,
            through: Vec::new(),
            matches: None,
        }
    }

    pub fn through(mut self, kinds: &[ProcedureKind]) -> Self {
        self.through = kinds.to_vec();
        self
    }

    pub fn matching(mut self, f: fn(&dyn ProcedureSpec) -> bool) -> Self {
        self.matches = Some(f);
        self
    }

    pub(crate) fn is_through(&self, kind: ProcedureKind) -> bool {
        self.through.contains(&kind)
    }

    pub(crate) fn is_match(&self, spec: &dyn ProcedureSpec) -> bool {
        self.matches.map_or(true, |f| f(spec))
    }
}

impl fmt::Debug for PushDownRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushDownRule")
            .field("root", &self.root)
            .field("through", &self.through)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Procedure {
    pub id: ProcedureId,
    pub parents: Vec<ProcedureId>,
    pub children: Vec<ProcedureId>,
    pub spec: Box<dyn ProcedureSpec>,
    pub bounds: BoundsSpec,
}

impl Procedure {
    pub fn new(id: ProcedureId, spec: Box<dyn ProcedureSpec>) -> Self {
        Self {
            id,
            parents: Vec::new(),
            children: Vec::new(),
            spec,
            bounds: BoundsSpec::default(),
        }
    }

    pub fn kind(&self) -> ProcedureKind {
        self.spec.kind()
    }
}
