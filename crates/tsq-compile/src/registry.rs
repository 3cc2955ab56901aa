//! Builtin functions, options and builtin scripts visible to every query

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};
use tsq_ir::{BuiltinFunction, Function, FunctionSignature, Record, Value};
use tsq_registry::{FatalError, Registry};

use crate::builtin::{CreateOperationSpec, OperationFunction};
use crate::interpreter::Interpreter;

pub struct FunctionRegistry {
    functions: Registry<Function>,
    options: Registry<Value>,
    scripts: Registry<String>,
    /// Functions plus everything the builtin scripts defined; filled by `freeze`.
    globals: Record,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: Registry::new("function"),
            options: Registry::new("option"),
            scripts: Registry::new("builtin script"),
            globals: Record::new(),
        }
    }

    pub fn register_function(
        &mut self,
        name: &str,
        create: CreateOperationSpec,
        signature: FunctionSignature,
    ) -> Result<(), FatalError> {
        self.register_builtin(Arc::new(OperationFunction::new(
            name, create, signature, false,
        )))
    }

    /// Like [`Self::register_function`], but every call result becomes a side effect of
    /// the program, e.g. `yield`.
    pub fn register_function_with_side_effect(
        &mut self,
        name: &str,
        create: CreateOperationSpec,
        signature: FunctionSignature,
    ) -> Result<(), FatalError> {
        self.register_builtin(Arc::new(OperationFunction::new(
            name, create, signature, true,
        )))
    }

    pub fn register_builtin(&mut self, f: Arc<dyn BuiltinFunction>) -> Result<(), FatalError> {
        let name = f.name().to_string();
        self.functions.register(name, Function::Builtin(f))
    }

    pub fn register_option(&mut self, name: &str, value: Value) -> Result<(), FatalError> {
        self.options.register(name, value)
    }

    /// Script source evaluated at freeze time; its variables become globals.
    pub fn register_builtin_script(&mut self, name: &str, source: &str) -> Result<(), FatalError> {
        self.scripts.register(name, source.to_string())
    }

    /// Evaluates the builtin scripts and seals the registry.
    pub fn freeze(&mut self) -> Result<(), FatalError> {
        if self.functions.is_frozen() {
            return Ok(());
        }

        let mut globals = Record::new();
        for (name, f) in self.functions.iter() {
            globals.set(name, Value::Function(f.clone()));
        }

        let mut itrp = Interpreter::new(globals, self.options_record());
        for (name, source) in self.scripts.iter() {
            let declared: BTreeSet<String> = itrp
                .globals()
                .keys()
                .chain(itrp.options().keys())
                .cloned()
                .collect();
            let script_error = |message: String| FatalError::Script {
                name: name.to_string(),
                message,
            };
            let program = tsq_ast::parse_program(source, &declared)
                .map_err(|e| script_error(e.to_string()))?;
            itrp.eval(&program).map_err(|e| script_error(e.to_string()))?;
            debug!(script = name, "evaluated builtin script");
        }

        self.globals = itrp.globals().clone();
        self.functions.freeze();
        self.options.freeze();
        self.scripts.freeze();
        info!(
            functions = self.functions.len(),
            options = self.options.len(),
            scripts = self.scripts.len(),
            "function registry frozen"
        );
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.functions.is_frozen()
    }

    pub fn globals(&self) -> Record {
        self.globals.clone()
    }

    pub fn options_record(&self) -> Record {
        self.options
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Every name a query may refer to without declaring it.
    pub fn declared(&self) -> BTreeSet<String> {
        self.globals
            .keys()
            .cloned()
            .chain(self.options.names().map(str::to_string))
            .collect()
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
