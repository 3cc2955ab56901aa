//! Convert AST to the semantic program
//!
//! Lowering checks that every identifier is declared before use and that the
//! right-hand side of a pipe is a call. Negated numeric and duration literals are
//! folded into a single literal.

use std::collections::BTreeSet;

use tsq_ir::semantic as ir;

use crate::ast::*;
use crate::parser::ParseError;

impl Program {
    /// Convert to the semantic program. `declared` holds the names visible before the
    /// first statement, usually the builtin functions and options.
    pub fn to_ir(self, declared: &BTreeSet<String>) -> Result<ir::Program, ParseError> {
        let mut scope = Scope {
            frames: vec![declared.clone()],
        };
        let mut body = Vec::with_capacity(self.body.len());
        for stmt in self.body {
            body.push(match stmt {
                Statement::Option { name, init } => {
                    let init = init.to_ir(&mut scope)?;
                    scope.declare(&name);
                    ir::Statement::Option { name, init }
                }
                Statement::Variable { name, init } => {
                    let init = init.to_ir(&mut scope)?;
                    scope.declare(&name);
                    ir::Statement::Variable { name, init }
                }
                Statement::Expr(expr) => ir::Statement::Expression {
                    expression: expr.to_ir(&mut scope)?,
                },
            });
        }
        Ok(ir::Program { body })
    }
}

struct Scope {
    frames: Vec<BTreeSet<String>>,
}

impl Scope {
    fn declare(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string());
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        self.frames.iter().rev().any(|f| f.contains(name))
    }
}

impl Expr {
    fn to_ir(self, scope: &mut Scope) -> Result<ir::Expression, ParseError> {
        Ok(match self {
            Expr::Identifier(name) => {
                if !scope.is_declared(&name) {
                    return Err(ParseError::Undeclared(name));
                }
                ir::Expression::Identifier { name }
            }
            Expr::Literal(lit) => lit.to_ir(),
            Expr::Array(elements) => ir::Expression::Array {
                elements: elements
                    .into_iter()
                    .map(|e| e.to_ir(scope))
                    .collect::<Result<_, _>>()?,
            },
            Expr::Object(properties) => ir::Expression::Object {
                properties: lower_properties(properties, scope)?,
            },
            Expr::Member { object, property } => ir::Expression::Member {
                object: Box::new(object.to_ir(scope)?),
                property,
            },
            Expr::Call { callee, args } => ir::Expression::Call {
                callee: Box::new(callee.to_ir(scope)?),
                arguments: lower_properties(args, scope)?,
            },
            Expr::Pipe { argument, call } => {
                if !matches!(*call, Expr::Call { .. }) {
                    return Err(ParseError::InvalidPipe);
                }
                ir::Expression::Pipe {
                    argument: Box::new(argument.to_ir(scope)?),
                    call: Box::new(call.to_ir(scope)?),
                }
            }
            Expr::BinaryOp { op, left, right } => ir::Expression::Binary {
                operator: op.to_ir(),
                left: Box::new(left.to_ir(scope)?),
                right: Box::new(right.to_ir(scope)?),
            },
            Expr::Logical { op, left, right } => ir::Expression::Logical {
                operator: match op {
                    LogicalOp::And => ir::LogicalOperator::And,
                    LogicalOp::Or => ir::LogicalOperator::Or,
                },
                left: Box::new(left.to_ir(scope)?),
                right: Box::new(right.to_ir(scope)?),
            },
            Expr::UnaryOp { op: UnOp::Neg, expr } => match *expr {
                Expr::Literal(Literal::Int(v)) => ir::Expression::IntegerLiteral { value: -v },
                Expr::Literal(Literal::Float(v)) => ir::Expression::FloatLiteral { value: -v },
                Expr::Literal(Literal::Duration(d)) => {
                    ir::Expression::DurationLiteral { value: -d }
                }
                other => ir::Expression::Unary {
                    operator: ir::UnaryOperator::Negate,
                    argument: Box::new(other.to_ir(scope)?),
                },
            },
            Expr::UnaryOp { op: UnOp::Not, expr } => ir::Expression::Unary {
                operator: ir::UnaryOperator::Not,
                argument: Box::new(expr.to_ir(scope)?),
            },
            Expr::Arrow { params, body } => {
                scope.frames.push(BTreeSet::new());
                let lowered = lower_function(params, *body, scope);
                scope.frames.pop();
                ir::Expression::Function(lowered?)
            }
        })
    }
}

fn lower_function(
    params: Vec<Param>,
    body: Expr,
    scope: &mut Scope,
) -> Result<ir::FunctionExpression, ParseError> {
    let mut out = Vec::with_capacity(params.len());
    for param in params {
        // Defaults see only the enclosing scope and earlier parameters.
        let (default, pipe) = match param.default {
            None => (None, false),
            Some(ParamDefault::Pipe) => (None, true),
            Some(ParamDefault::Expr(e)) => (Some(e.to_ir(scope)?), false),
        };
        scope.declare(&param.name);
        out.push(ir::FunctionParam {
            key: param.name,
            default,
            pipe,
        });
    }
    if out.iter().filter(|p| p.pipe).count() > 1 {
        return Err(ParseError::Syntax(
            "function has more than one pipe parameter".to_string(),
        ));
    }
    Ok(ir::FunctionExpression {
        params: out,
        body: Box::new(body.to_ir(scope)?),
    })
}

fn lower_properties(
    properties: Vec<Property>,
    scope: &mut Scope,
) -> Result<Vec<ir::Property>, ParseError> {
    properties
        .into_iter()
        .map(|p| {
            Ok(ir::Property {
                key: p.key,
                value: p.value.to_ir(scope)?,
            })
        })
        .collect()
}

impl Literal {
    fn to_ir(self) -> ir::Expression {
        match self {
            Literal::String(value) => ir::Expression::StringLiteral { value },
            Literal::Int(value) => ir::Expression::IntegerLiteral { value },
            Literal::Float(value) => ir::Expression::FloatLiteral { value },
            Literal::Bool(value) => ir::Expression::BooleanLiteral { value },
            Literal::Duration(value) => ir::Expression::DurationLiteral { value },
            Literal::DateTime(value) => ir::Expression::DateTimeLiteral { value },
            Literal::Regex(value) => ir::Expression::RegexpLiteral { value },
        }
    }
}

impl BinOp {
    fn to_ir(self) -> ir::Operator {
        match self {
            BinOp::Add => ir::Operator::Add,
            BinOp::Sub => ir::Operator::Subtract,
            BinOp::Mul => ir::Operator::Multiply,
            BinOp::Div => ir::Operator::Divide,
            BinOp::Eq => ir::Operator::Equal,
            BinOp::Ne => ir::Operator::NotEqual,
            BinOp::Lt => ir::Operator::LessThan,
            BinOp::Le => ir::Operator::LessThanEqual,
            BinOp::Gt => ir::Operator::GreaterThan,
            BinOp::Ge => ir::Operator::GreaterThanEqual,
            BinOp::RegexMatch => ir::Operator::RegexpMatch,
            BinOp::RegexNotMatch => ir::Operator::NotRegexpMatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use tsq_ir::Duration;

    fn builtins() -> BTreeSet<String> {
        ["from", "range", "filter", "yield", "now"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_negative_duration_is_folded() {
        let program = parse(r#"from(bucket:"b") |> range(start:-1h)"#)
            .unwrap()
            .to_ir(&builtins())
            .unwrap();
        let ir::Statement::Expression {
            expression: ir::Expression::Pipe { call, .. },
        } = &program.body[0]
        else {
            panic!("expected pipe");
        };
        let ir::Expression::Call { arguments, .. } = call.as_ref() else {
            panic!("expected call");
        };
        assert_eq!(
            arguments[0].value,
            ir::Expression::DurationLiteral {
                value: -Duration::from_hours(1)
            }
        );
    }

    #[test]
    fn test_undeclared_identifier() {
        let err = parse("x = y").unwrap().to_ir(&builtins()).unwrap_err();
        assert!(matches!(err, ParseError::Undeclared(name) if name == "y"));
    }

    #[test]
    fn test_variables_and_params_are_scoped() {
        let ok = parse(
            r#"
            data = from(bucket: "b")
            data |> filter(fn: (r) => r._value > 1)
            "#,
        )
        .unwrap()
        .to_ir(&builtins());
        assert!(ok.is_ok(), "{:?}", ok);

        // Lambda parameters do not leak out of the function body.
        let err = parse("f = (r) => r\nx = r").unwrap().to_ir(&builtins());
        assert!(matches!(err, Err(ParseError::Undeclared(name)) if name == "r"));
    }

    #[test]
    fn test_pipe_to_non_call() {
        let err = parse("from(bucket: \"b\") |> range")
            .unwrap()
            .to_ir(&builtins());
        assert!(matches!(err, Err(ParseError::InvalidPipe)));
    }

    #[test]
    fn test_pipe_parameter() {
        let program = parse("f = (table=<-) => table")
            .unwrap()
            .to_ir(&builtins())
            .unwrap();
        let ir::Statement::Variable {
            init: ir::Expression::Function(f),
            ..
        } = &program.body[0]
        else {
            panic!("expected function");
        };
        assert_eq!(f.pipe_param().map(|p| p.key.as_str()), Some("table"));
    }
}
