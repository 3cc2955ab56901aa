use std::sync::Arc;

use tracing::{debug, instrument};
use tsq_ir::{Spec, Time, Value};

use crate::builtin::NativeFunction;
use crate::error::CompileError;
use crate::interpreter::Interpreter;
use crate::registry::FunctionRegistry;
use crate::spec_builder::{to_spec, NOW_OPTION};

/// Compiles query scripts against a frozen [`FunctionRegistry`].
#[derive(Clone)]
pub struct Compiler {
    functions: Arc<FunctionRegistry>,
}

impl Compiler {
    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Self { functions }
    }

    /// Parses and evaluates `script` with the `now` option fixed to `now`. A script may
    /// still override `now` with its own option statement.
    pub fn eval(&self, script: &str, now: Time) -> Result<Interpreter, CompileError> {
        if !self.functions.is_frozen() {
            return Err(CompileError::NotFrozen);
        }
        let program = tsq_ast::parse_program(script, &self.functions.declared())?;
        let mut itrp = Interpreter::new(self.functions.globals(), self.functions.options_record());
        itrp.set_option(
            NOW_OPTION,
            Value::Function(tsq_ir::Function::Builtin(Arc::new(
                NativeFunction::constant_time(NOW_OPTION, now),
            ))),
        );
        itrp.eval(&program)?;
        Ok(itrp)
    }

    #[instrument(skip(self, script), fields(script_len = script.len()))]
    pub fn compile(&self, script: &str, now: Time) -> Result<Spec, CompileError> {
        let mut itrp = self.eval(script, now)?;
        let side_effects = itrp.side_effects().to_vec();
        let spec = to_spec(&mut itrp, &side_effects)?;
        spec.validate()?;
        debug!(fingerprint = %spec.fingerprint(), "compiled query");
        Ok(spec)
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }
}
