//! Builtin function values
//!
//! [`OperationFunction`] wraps an operation-spec constructor: calling it checks the
//! keyword arguments, builds the spec, records parents and allocates a [`TableObject`].
//! [`NativeFunction`] wraps any other Rust closure, such as the `now` option.

use std::sync::Arc;

use tsq_ir::{
    Arguments, BuiltinFunction, FunctionSignature, Object, OperationSpec, Record,
    TableArena, TableObject, Value, ValueError,
};

/// Constructor registered for an operation kind.
pub type CreateOperationSpec =
    fn(&mut Arguments, &mut Administration) -> Result<OperationSpec, ValueError>;

/// Collects the parents of the node being built. A parent is recorded once no matter
/// how many arguments refer to it.
#[derive(Debug, Default)]
pub struct Administration {
    parents: Vec<Arc<TableObject>>,
}

impl Administration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the table passed as argument `name`, normally the pipe argument.
    pub fn add_parent_from_args(
        &mut self,
        args: &mut Arguments,
        name: &str,
    ) -> Result<(), ValueError> {
        let table = as_table(name, &args.get_required(name)?)?;
        self.add_parent(table);
        Ok(())
    }

    pub fn add_parent(&mut self, table: Arc<TableObject>) {
        if !self.parents.iter().any(|p| p.id() == table.id()) {
            self.parents.push(table);
        }
    }

    pub fn parents(&self) -> &[Arc<TableObject>] {
        &self.parents
    }

    fn into_parents(self) -> Vec<Arc<TableObject>> {
        self.parents
    }
}

/// Extracts a pipeline node from an argument value.
pub fn as_table(name: &str, value: &Value) -> Result<Arc<TableObject>, ValueError> {
    match value {
        Value::Object(Object::Table(t)) => Ok(t.clone()),
        other => Err(ValueError::Invalid(format!(
            "argument {:?} must be a table, got {}",
            name,
            other.type_of()
        ))),
    }
}

/// Validates call arguments against a signature: required parameters are present,
/// every supplied keyword is declared and has an acceptable type.
pub fn check_arguments(signature: &FunctionSignature, args: &Record) -> Result<(), ValueError> {
    for name in &signature.required {
        if args.get(name).is_none() {
            return Err(ValueError::MissingArgument(name.clone()));
        }
    }
    let mut unknown = Vec::new();
    for name in args.keys() {
        let Some(value) = args.get(name) else { continue };
        match signature.params.get(name) {
            None => unknown.push(name.clone()),
            Some(expected) if !expected.accepts(&value.type_of()) => {
                return Err(ValueError::Invalid(format!(
                    "keyword argument {:?} should be of type {}, but got {}",
                    name,
                    expected,
                    value.type_of()
                )))
            }
            Some(_) => {}
        }
    }
    if !unknown.is_empty() {
        return Err(ValueError::UnusedArguments(unknown));
    }
    Ok(())
}

pub struct OperationFunction {
    name: String,
    signature: FunctionSignature,
    create: CreateOperationSpec,
    side_effect: bool,
}

impl OperationFunction {
    pub fn new(
        name: impl Into<String>,
        create: CreateOperationSpec,
        signature: FunctionSignature,
        side_effect: bool,
    ) -> Self {
        Self {
            name: name.into(),
            signature,
            create,
            side_effect,
        }
    }
}

impl BuiltinFunction for OperationFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    fn has_side_effect(&self) -> bool {
        self.side_effect
    }

    fn call(&self, arena: &mut TableArena, args: Record) -> Result<Value, ValueError> {
        check_arguments(&self.signature, &args)?;

        let mut arguments = Arguments::new(args);
        let mut admin = Administration::new();
        if let Some(pipe) = &self.signature.pipe_argument {
            admin.add_parent_from_args(&mut arguments, pipe)?;
        }

        let spec = (self.create)(&mut arguments, &mut admin)?;
        let unused = arguments.list_unused();
        if !unused.is_empty() {
            return Err(ValueError::UnusedArguments(unused));
        }

        let node = arena.alloc(spec, admin.into_parents(), arguments.into_record());
        Ok(Value::from(node))
    }
}

type NativeCall = dyn Fn(&mut Arguments) -> Result<Value, ValueError> + Send + Sync;

pub struct NativeFunction {
    name: String,
    signature: FunctionSignature,
    side_effect: bool,
    call: Box<NativeCall>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        signature: FunctionSignature,
        call: impl Fn(&mut Arguments) -> Result<Value, ValueError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            signature,
            side_effect: false,
            call: Box::new(call),
        }
    }

    /// Zero-argument function returning a fixed instant; used for the `now` option.
    pub fn constant_time(name: impl Into<String>, t: tsq_ir::Time) -> Self {
        Self::new(
            name,
            FunctionSignature::new(tsq_ir::Type::Time),
            move |_| Ok(Value::Time(t)),
        )
    }
}

impl BuiltinFunction for NativeFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    fn has_side_effect(&self) -> bool {
        self.side_effect
    }

    fn call(&self, _arena: &mut TableArena, args: Record) -> Result<Value, ValueError> {
        check_arguments(&self.signature, &args)?;
        let mut arguments = Arguments::new(args);
        (self.call)(&mut arguments)
    }
}

/// Splits a record of tables, as given to `join(tables: {a: x, b: y})`.
pub fn tables_from_object(
    name: &str,
    object: &Object,
) -> Result<Vec<(String, Arc<TableObject>)>, ValueError> {
    let mut entries = Vec::new();
    object.range(|key, value| entries.push((key.to_string(), value.clone())));
    entries
        .into_iter()
        .map(|(key, value)| {
            let table = as_table(&format!("{}.{}", name, key), &value)?;
            Ok((key, table))
        })
        .collect()
}
