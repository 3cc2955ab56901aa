//! Procedure registry: operation kind to candidate procedure constructors

use tracing::debug;
use tsq_ir::{OperationId, OperationSpec};
use tsq_registry::{FatalError, Index, Registry};

use crate::error::PlanError;
use crate::procedure::{ProcedureId, ProcedureKind, ProcedureSpec};

/// Context handed to procedure constructors.
pub trait Administration {
    /// Procedure ID the operation `id` is planned as.
    fn convert_id(&self, id: &OperationId) -> ProcedureId;
}

pub type CreateProcedureSpec =
    fn(&OperationSpec, &dyn Administration) -> Result<Box<dyn ProcedureSpec>, PlanError>;

#[derive(Debug, Clone)]
pub struct ProcedureRegistry {
    kinds: Registry<CreateProcedureSpec>,
    by_operation: Index<ProcedureKind>,
}

impl Default for ProcedureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self {
            kinds: Registry::new("procedure"),
            by_operation: Index::new("procedure"),
        }
    }

    /// Registers `kind` and makes it a candidate for every operation kind in `operations`.
    pub fn register(
        &mut self,
        kind: ProcedureKind,
        create: CreateProcedureSpec,
        operations: &[&str],
    ) -> Result<(), FatalError> {
        self.kinds.register(kind, create)?;
        for op in operations {
            self.by_operation.add(*op, kind)?;
        }
        debug!(procedure = kind, operations = ?operations, "registered procedure");
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.kinds.freeze();
        self.by_operation.freeze();
    }

    pub fn is_frozen(&self) -> bool {
        self.kinds.is_frozen()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains(kind)
    }

    /// Constructors able to plan an operation of `operation_kind`, in registration order.
    pub fn candidates(&self, operation_kind: &str) -> Vec<CreateProcedureSpec> {
        self.by_operation
            .get(operation_kind)
            .iter()
            .filter_map(|k| self.kinds.get(k).copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure_spec_common;

    #[derive(Debug, Clone)]
    struct Passthrough;

    impl ProcedureSpec for Passthrough {
        fn kind(&self) -> ProcedureKind {
            "passthrough"
        }

        procedure_spec_common!();
    }

    fn create(_: &OperationSpec, _: &dyn Administration) -> Result<Box<dyn ProcedureSpec>, PlanError> {
        Ok(Box::new(Passthrough))
    }

    #[test]
    fn test_register_indexes_operations() {
        let mut registry = ProcedureRegistry::new();
        registry.register("passthrough", create, &["yield", "keep"]).unwrap();
        registry.freeze();

        assert!(registry.contains("passthrough"));
        assert_eq!(registry.candidates("yield").len(), 1);
        assert_eq!(registry.candidates("keep").len(), 1);
        assert!(registry.candidates("mean").is_empty());
    }

    #[test]
    fn test_duplicate_procedure_is_fatal() {
        let mut registry = ProcedureRegistry::new();
        registry.register("passthrough", create, &["yield"]).unwrap();
        assert_eq!(
            registry.register("passthrough", create, &["yield"]),
            Err(FatalError::Duplicate {
                registry: "procedure",
                name: "passthrough".to_string(),
            })
        );
    }

    #[test]
    fn test_register_after_freeze_is_fatal() {
        let mut registry = ProcedureRegistry::new();
        registry.freeze();
        assert!(matches!(
            registry.register("passthrough", create, &[]),
            Err(FatalError::Frozen { .. })
        ));
    }
}
