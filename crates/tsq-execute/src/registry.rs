//! Procedure kind to transformation and source constructors

use tsq_plan::{ProcedureKind, ProcedureSpec};
use tsq_registry::{FatalError, Registry};

use crate::dataset::{AccumulationMode, DatasetId, DatasetRef};
use crate::error::ExecuteError;
use crate::transformation::{Administration, Source, TransformationRef};

pub type CreateTransformation = fn(
    DatasetId,
    AccumulationMode,
    &dyn ProcedureSpec,
    &Administration,
) -> Result<(TransformationRef, DatasetRef), ExecuteError>;

pub type CreateSource =
    fn(&dyn ProcedureSpec, DatasetId, &Administration) -> Result<Box<dyn Source>, ExecuteError>;

#[derive(Debug, Clone)]
pub struct TransformationRegistry {
    transformations: Registry<CreateTransformation>,
    sources: Registry<CreateSource>,
}

impl Default for TransformationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformationRegistry {
    pub fn new() -> Self {
        Self {
            transformations: Registry::new("transformation"),
            sources: Registry::new("source"),
        }
    }

    pub fn register_transformation(
        &mut self,
        kind: ProcedureKind,
        create: CreateTransformation,
    ) -> Result<(), FatalError> {
        self.transformations.register(kind, create)
    }

    pub fn register_source(&mut self, kind: ProcedureKind, create: CreateSource) -> Result<(), FatalError> {
        self.sources.register(kind, create)
    }

    pub fn freeze(&mut self) {
        self.transformations.freeze();
        self.sources.freeze();
    }

    pub fn is_frozen(&self) -> bool {
        self.transformations.is_frozen() && self.sources.is_frozen()
    }

    pub fn transformation(&self, kind: &str) -> Result<CreateTransformation, ExecuteError> {
        self.transformations
            .get(kind)
            .copied()
            .ok_or_else(|| ExecuteError::NoTransformation(kind.to_string()))
    }

    pub fn source(&self, kind: &str) -> Result<CreateSource, ExecuteError> {
        self.sources
            .get(kind)
            .copied()
            .ok_or_else(|| ExecuteError::NoSource(kind.to_string()))
    }
}
