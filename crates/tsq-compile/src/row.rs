//! Functions evaluated once per row or per column name at execution time

use tsq_ir::semantic::{Expression, FunctionExpression, Property};
use tsq_ir::{Lambda, Object, Record, Value, ValueError};

use crate::error::CompileError;
use crate::interpreter::Interpreter;

/// A single-parameter function such as the `(r) => r._value > 0` of `filter` or the
/// `(column) => ...` of `rename`.
pub struct RowFunction {
    expr: FunctionExpression,
    param: String,
    scope: Interpreter,
}

impl RowFunction {
    pub fn new(expr: FunctionExpression) -> Result<Self, CompileError> {
        let param = match expr.params.as_slice() {
            [p] => p.key.clone(),
            params => {
                return Err(CompileError::Eval(format!(
                    "row function must take exactly one parameter, found {}",
                    params.len()
                )))
            }
        };
        Ok(Self {
            expr,
            param,
            scope: Interpreter::new(Record::new(), Record::new()),
        })
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    pub fn eval(&mut self, arg: Value) -> Result<Value, CompileError> {
        let args = Record::new().with(self.param.clone(), arg);
        self.scope.call_function(&self.expr, Record::new(), args)
    }

    pub fn eval_bool(&mut self, arg: Value) -> Result<bool, CompileError> {
        match self.eval(arg)? {
            Value::Bool(b) => Ok(b),
            other => Err(CompileError::Eval(format!(
                "function must return bool, got {}",
                other.kind()
            ))),
        }
    }

    pub fn eval_string(&mut self, arg: Value) -> Result<String, CompileError> {
        match self.eval(arg)? {
            Value::String(s) => Ok(s),
            other => Err(CompileError::Eval(format!(
                "function must return string, got {}",
                other.kind()
            ))),
        }
    }
}

/// Replaces the identifiers `lambda` closed over with literals of their captured values,
/// so the function can be carried in an operation spec and evaluated without the script.
pub fn resolve(lambda: &Lambda) -> Result<FunctionExpression, ValueError> {
    let mut bound = Vec::new();
    resolve_function(&lambda.expr, &lambda.scope, &mut bound)
}

fn resolve_function(
    f: &FunctionExpression,
    scope: &Record,
    bound: &mut Vec<String>,
) -> Result<FunctionExpression, ValueError> {
    let mut params = f.params.clone();
    for p in &mut params {
        if let Some(default) = &p.default {
            p.default = Some(resolve_expression(default, scope, bound)?);
        }
    }
    let depth = bound.len();
    bound.extend(f.params.iter().map(|p| p.key.clone()));
    let body = resolve_expression(&f.body, scope, bound);
    bound.truncate(depth);
    Ok(FunctionExpression {
        params,
        body: Box::new(body?),
    })
}

fn resolve_expression(
    expr: &Expression,
    scope: &Record,
    bound: &mut Vec<String>,
) -> Result<Expression, ValueError> {
    Ok(match expr {
        Expression::Identifier { name } if !bound.contains(name) => match scope.get(name) {
            Some(value) => literal(name, value)?,
            None => expr.clone(),
        },
        Expression::Array { elements } => Expression::Array {
            elements: elements
                .iter()
                .map(|e| resolve_expression(e, scope, bound))
                .collect::<Result<_, _>>()?,
        },
        Expression::Object { properties } => Expression::Object {
            properties: resolve_properties(properties, scope, bound)?,
        },
        Expression::Member { object, property } => Expression::Member {
            object: boxed(object, scope, bound)?,
            property: property.clone(),
        },
        Expression::Call { callee, arguments } => Expression::Call {
            callee: boxed(callee, scope, bound)?,
            arguments: resolve_properties(arguments, scope, bound)?,
        },
        Expression::Pipe { argument, call } => Expression::Pipe {
            argument: boxed(argument, scope, bound)?,
            call: boxed(call, scope, bound)?,
        },
        Expression::Binary {
            operator,
            left,
            right,
        } => Expression::Binary {
            operator: *operator,
            left: boxed(left, scope, bound)?,
            right: boxed(right, scope, bound)?,
        },
        Expression::Logical {
            operator,
            left,
            right,
        } => Expression::Logical {
            operator: *operator,
            left: boxed(left, scope, bound)?,
            right: boxed(right, scope, bound)?,
        },
        Expression::Unary { operator, argument } => Expression::Unary {
            operator: *operator,
            argument: boxed(argument, scope, bound)?,
        },
        Expression::Function(f) => Expression::Function(resolve_function(f, scope, bound)?),
        other => other.clone(),
    })
}

fn boxed(
    expr: &Expression,
    scope: &Record,
    bound: &mut Vec<String>,
) -> Result<Box<Expression>, ValueError> {
    resolve_expression(expr, scope, bound).map(Box::new)
}

fn resolve_properties(
    properties: &[Property],
    scope: &Record,
    bound: &mut Vec<String>,
) -> Result<Vec<Property>, ValueError> {
    properties
        .iter()
        .map(|p| {
            Ok(Property {
                key: p.key.clone(),
                value: resolve_expression(&p.value, scope, bound)?,
            })
        })
        .collect()
}

fn literal(name: &str, value: &Value) -> Result<Expression, ValueError> {
    Ok(match value {
        Value::String(s) => Expression::string(s.clone()),
        Value::Int(v) => Expression::IntegerLiteral { value: *v },
        Value::Float(v) => Expression::FloatLiteral { value: *v },
        Value::Bool(v) => Expression::BooleanLiteral { value: *v },
        Value::Duration(v) => Expression::DurationLiteral { value: *v },
        Value::Time(v) => Expression::DateTimeLiteral { value: *v },
        Value::Regexp(r) => Expression::RegexpLiteral {
            value: r.as_str().to_string(),
        },
        Value::Array(a) => Expression::Array {
            elements: a
                .iter()
                .map(|v| literal(name, v))
                .collect::<Result<_, _>>()?,
        },
        Value::Object(Object::Record(r)) => {
            let mut properties = Vec::with_capacity(r.len());
            for (key, v) in r.iter() {
                properties.push(Property {
                    key: key.clone(),
                    value: literal(name, v)?,
                });
            }
            Expression::Object { properties }
        }
        other => {
            return Err(ValueError::Invalid(format!(
                "identifier {:?} of kind {} cannot be used in a row function",
                name,
                other.kind()
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tsq_ir::semantic::Statement;
    use tsq_ir::Function;

    fn function(source: &str) -> FunctionExpression {
        let program = tsq_ast::parse_program(source, &BTreeSet::new()).unwrap();
        match &program.body[0] {
            Statement::Expression {
                expression: Expression::Function(f),
            } => f.clone(),
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_predicate() {
        let mut f = RowFunction::new(function(r#"(r) => r._value > 1.5 and r.host =~ /^a/"#)).unwrap();
        let row = Record::new().with("_value", 2.0).with("host", "alpha");
        assert!(f.eval_bool(Value::from(row)).unwrap());
        let row = Record::new().with("_value", 1.0).with("host", "alpha");
        assert!(!f.eval_bool(Value::from(row)).unwrap());
    }

    #[test]
    fn test_string_function() {
        let mut f = RowFunction::new(function(r#"(column) => "new_" + column"#)).unwrap();
        assert_eq!(f.eval_string(Value::from("host")).unwrap(), "new_host");
    }

    fn lambda(source: &str) -> Arc<Lambda> {
        let program = tsq_ast::parse_program(source, &BTreeSet::new()).unwrap();
        let mut itrp = Interpreter::new(Record::new(), Record::new());
        itrp.eval(&program).unwrap();
        match itrp.global("f") {
            Some(Value::Function(Function::Lambda(l))) => l.clone(),
            other => panic!("expected lambda f, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_inlines_captured_values() {
        let l = lambda("t = 2.0\nlimits = {low: 0.5}\nf = (r) => r > t and r > limits.low");
        let expr = resolve(&l).unwrap();
        assert!(expr.free_identifiers().is_empty());
        let mut f = RowFunction::new(expr).unwrap();
        assert!(f.eval_bool(Value::Float(3.0)).unwrap());
        assert!(!f.eval_bool(Value::Float(1.0)).unwrap());
    }

    #[test]
    fn test_resolve_rejects_captured_functions() {
        let err = resolve(&lambda("g = (x) => x\nf = (r) => g(x: r)")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "identifier \"g\" of kind function cannot be used in a row function"
        );
    }

    #[test]
    fn test_requires_one_param() {
        assert!(RowFunction::new(function("(a, b) => a")).is_err());
    }
}
