//! Tree-walking interpreter over the semantic program
//!
//! Evaluation produces ordinary values plus a list of side effects. Pipeline builtins
//! allocate their [`TableObject`](tsq_ir::TableObject)s in the interpreter's arena, so
//! the side effects of a query script are the roots of its dataflow graph.

use std::sync::Arc;

use tracing::trace;
use tsq_ir::semantic::{Expression, FunctionExpression, Program, Statement};
use tsq_ir::{Array, Function, Lambda, Record, TableArena, Value, ValueError};

use crate::error::CompileError;
use crate::operators;

pub struct Interpreter {
    globals: Record,
    options: Record,
    /// Local scopes of the functions being evaluated, innermost last.
    frames: Vec<Record>,
    side_effects: Vec<Value>,
    arena: TableArena,
}

impl Interpreter {
    pub fn new(globals: Record, options: Record) -> Self {
        Self {
            globals,
            options,
            frames: Vec::new(),
            side_effects: Vec::new(),
            arena: TableArena::new(),
        }
    }

    pub fn eval(&mut self, program: &Program) -> Result<(), CompileError> {
        for stmt in &program.body {
            self.eval_statement(stmt)?;
        }
        Ok(())
    }

    fn eval_statement(&mut self, stmt: &Statement) -> Result<(), CompileError> {
        match stmt {
            Statement::Option { name, init } => {
                let value = self.eval_expression(init)?;
                trace!(option = %name, "set option");
                self.options.set(name.clone(), value);
            }
            Statement::Variable { name, init } => {
                let value = self.eval_expression(init)?;
                self.globals.set(name.clone(), value);
            }
            Statement::Expression { expression } => {
                let value = self.eval_expression(expression)?;
                self.side_effects.push(value);
            }
        }
        Ok(())
    }

    pub fn eval_expression(&mut self, expr: &Expression) -> Result<Value, CompileError> {
        Ok(match expr {
            Expression::Identifier { name } => self.lookup(name)?,
            Expression::StringLiteral { value } => Value::String(value.clone()),
            Expression::IntegerLiteral { value } => Value::Int(*value),
            Expression::FloatLiteral { value } => Value::Float(*value),
            Expression::BooleanLiteral { value } => Value::Bool(*value),
            Expression::DurationLiteral { value } => Value::Duration(*value),
            Expression::DateTimeLiteral { value } => Value::Time(*value),
            Expression::RegexpLiteral { value } => Value::regexp_from_str(value)?,
            Expression::Array { elements } => {
                let values = elements
                    .iter()
                    .map(|e| self.eval_expression(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Value::Array(Array::from_values(values))
            }
            Expression::Object { properties } => {
                let mut record = Record::new();
                for p in properties {
                    let value = self.eval_expression(&p.value)?;
                    record.set(p.key.clone(), value);
                }
                Value::from(record)
            }
            Expression::Member { object, property } => match self.eval_expression(object)? {
                Value::Object(o) => o
                    .get(property)
                    .ok_or_else(|| CompileError::MissingProperty(property.clone()))?,
                other => {
                    return Err(CompileError::Eval(format!(
                        "cannot access property {:?} of {}",
                        property,
                        other.kind()
                    )))
                }
            },
            Expression::Call { callee, arguments } => self.eval_call(callee, arguments, None)?,
            Expression::Pipe { argument, call } => {
                let piped = self.eval_expression(argument)?;
                match call.as_ref() {
                    Expression::Call { callee, arguments } => {
                        self.eval_call(callee, arguments, Some(piped))?
                    }
                    _ => {
                        return Err(CompileError::Eval(
                            "pipe destination must be a function call".to_string(),
                        ))
                    }
                }
            }
            Expression::Binary {
                operator,
                left,
                right,
            } => {
                let l = self.eval_expression(left)?;
                let r = self.eval_expression(right)?;
                operators::binary(*operator, &l, &r)?
            }
            Expression::Logical {
                operator,
                left,
                right,
            } => {
                use tsq_ir::semantic::LogicalOperator;
                let l = self.eval_bool(left)?;
                let short_circuit = match operator {
                    LogicalOperator::And => !l,
                    LogicalOperator::Or => l,
                };
                if short_circuit {
                    Value::Bool(l)
                } else {
                    Value::Bool(self.eval_bool(right)?)
                }
            }
            Expression::Unary { operator, argument } => {
                let v = self.eval_expression(argument)?;
                operators::unary(*operator, &v)?
            }
            Expression::Function(f) => Value::Function(Function::Lambda(Arc::new(Lambda {
                expr: f.clone(),
                scope: self.capture(f),
            }))),
        })
    }

    fn eval_bool(&mut self, expr: &Expression) -> Result<bool, CompileError> {
        match self.eval_expression(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(CompileError::Eval(format!(
                "logical operand must be bool, got {}",
                other.kind()
            ))),
        }
    }

    fn eval_call(
        &mut self,
        callee: &Expression,
        arguments: &[tsq_ir::semantic::Property],
        piped: Option<Value>,
    ) -> Result<Value, CompileError> {
        let function = match self.eval_expression(callee)? {
            Value::Function(f) => f,
            other => return Err(CompileError::NotCallable(other.kind())),
        };

        let mut args = Record::new();
        for p in arguments {
            let value = self.eval_expression(&p.value)?;
            args.set(p.key.clone(), value);
        }
        if let Some(value) = piped {
            let pipe = function
                .signature()
                .pipe_argument
                .ok_or_else(|| CompileError::NoPipeArgument(function.name().to_string()))?;
            args.set(pipe, value);
        }

        self.call(&function, args)
    }

    /// Calls a function value. Results of side-effecting functions are recorded.
    pub fn call(&mut self, function: &Function, args: Record) -> Result<Value, CompileError> {
        let value = match function {
            Function::Builtin(b) => b.call(&mut self.arena, args)?,
            Function::Lambda(l) => self.call_function(&l.expr, l.scope.clone(), args)?,
        };
        if function.has_side_effect() {
            self.side_effects.push(value.clone());
        }
        Ok(value)
    }

    /// Evaluates a function body with `scope` as its closure and `args` bound to its
    /// parameters. Missing arguments fall back to parameter defaults.
    pub fn call_function(
        &mut self,
        f: &FunctionExpression,
        scope: Record,
        args: Record,
    ) -> Result<Value, CompileError> {
        let saved = std::mem::replace(&mut self.frames, vec![scope, Record::new()]);
        let result = self.bind_and_eval(f, args);
        self.frames = saved;
        result
    }

    fn bind_and_eval(
        &mut self,
        f: &FunctionExpression,
        mut args: Record,
    ) -> Result<Value, CompileError> {
        for param in &f.params {
            let value = match (args.remove(&param.key), &param.default) {
                (Some(v), _) => v,
                (None, Some(default)) => self.eval_expression(default)?,
                (None, None) => return Err(ValueError::MissingArgument(param.key.clone()).into()),
            };
            if let Some(frame) = self.frames.last_mut() {
                frame.set(param.key.clone(), value);
            }
        }
        if !args.is_empty() {
            return Err(ValueError::UnusedArguments(args.keys().cloned().collect()).into());
        }
        self.eval_expression(&f.body)
    }

    fn lookup(&self, name: &str) -> Result<Value, CompileError> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.get(name))
            .or_else(|| self.globals.get(name))
            .or_else(|| self.options.get(name))
            .cloned()
            .ok_or_else(|| CompileError::Undefined(name.to_string()))
    }

    /// Snapshot of every value `f` reads from its enclosing scopes. Names not defined
    /// yet are left out and looked up when the function is called.
    fn capture(&self, f: &FunctionExpression) -> Record {
        let mut scope = Record::new();
        for name in f.free_identifiers() {
            if let Ok(value) = self.lookup(&name) {
                scope.set(name, value);
            }
        }
        scope
    }

    pub fn set_option(&mut self, name: impl Into<String>, value: Value) {
        self.options.set(name, value);
    }

    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn globals(&self) -> &Record {
        &self.globals
    }

    pub fn options(&self) -> &Record {
        &self.options
    }

    pub fn side_effects(&self) -> &[Value] {
        &self.side_effects
    }

    pub fn arena(&self) -> &TableArena {
        &self.arena
    }
}
