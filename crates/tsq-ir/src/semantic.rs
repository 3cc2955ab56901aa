//! Semantic graph: the checked program the interpreter evaluates
//!
//! Function expressions embedded in operation specs (filter predicates, rename
//! functions) are serialized with the rest of the Spec, so every node is serde-friendly.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::time::{Duration, Time};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Statement {
    Option { name: String, init: Expression },
    Variable { name: String, init: Expression },
    Expression { expression: Expression },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParam {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Expression>,

    /// Marks the parameter that receives the left-hand side of `|>`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pipe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionExpression {
    pub params: Vec<FunctionParam>,
    pub body: Box<Expression>,
}

impl FunctionExpression {
    pub fn pipe_param(&self) -> Option<&FunctionParam> {
        self.params.iter().find(|p| p.pipe)
    }

    /// Identifiers the function reads but does not bind as a parameter, in name order.
    pub fn free_identifiers(&self) -> BTreeSet<String> {
        let mut free = BTreeSet::new();
        let mut bound = Vec::new();
        collect_free_in_function(self, &mut bound, &mut free);
        free
    }
}

fn collect_free_in_function(f: &FunctionExpression, bound: &mut Vec<String>, free: &mut BTreeSet<String>) {
    for p in &f.params {
        if let Some(default) = &p.default {
            collect_free(default, bound, free);
        }
    }
    let depth = bound.len();
    bound.extend(f.params.iter().map(|p| p.key.clone()));
    collect_free(&f.body, bound, free);
    bound.truncate(depth);
}

fn collect_free(expr: &Expression, bound: &mut Vec<String>, free: &mut BTreeSet<String>) {
    match expr {
        Expression::Identifier { name } => {
            if !bound.contains(name) {
                free.insert(name.clone());
            }
        }
        Expression::StringLiteral { .. }
        | Expression::IntegerLiteral { .. }
        | Expression::FloatLiteral { .. }
        | Expression::BooleanLiteral { .. }
        | Expression::DurationLiteral { .. }
        | Expression::DateTimeLiteral { .. }
        | Expression::RegexpLiteral { .. } => {}
        Expression::Array { elements } => {
            for e in elements {
                collect_free(e, bound, free);
            }
        }
        Expression::Object { properties } => {
            for p in properties {
                collect_free(&p.value, bound, free);
            }
        }
        Expression::Member { object, .. } => collect_free(object, bound, free),
        Expression::Call { callee, arguments } => {
            collect_free(callee, bound, free);
            for p in arguments {
                collect_free(&p.value, bound, free);
            }
        }
        Expression::Pipe { argument, call } => {
            collect_free(argument, bound, free);
            collect_free(call, bound, free);
        }
        Expression::Binary { left, right, .. } | Expression::Logical { left, right, .. } => {
            collect_free(left, bound, free);
            collect_free(right, bound, free);
        }
        Expression::Unary { argument, .. } => collect_free(argument, bound, free),
        Expression::Function(f) => collect_free_in_function(f, bound, free),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Multiply,
    Divide,
    Add,
    Subtract,
    LessThanEqual,
    LessThan,
    GreaterThanEqual,
    GreaterThan,
    Equal,
    NotEqual,
    RegexpMatch,
    NotRegexpMatch,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::LessThanEqual => "<=",
            Operator::LessThan => "<",
            Operator::GreaterThanEqual => ">=",
            Operator::GreaterThan => ">",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::RegexpMatch => "=~",
            Operator::NotRegexpMatch => "!~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Not,
    Negate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expression {
    Identifier {
        name: String,
    },
    StringLiteral {
        value: String,
    },
    IntegerLiteral {
        value: i64,
    },
    FloatLiteral {
        value: f64,
    },
    BooleanLiteral {
        value: bool,
    },
    DurationLiteral {
        value: Duration,
    },
    DateTimeLiteral {
        value: Time,
    },
    RegexpLiteral {
        value: String,
    },
    Array {
        elements: Vec<Expression>,
    },
    Object {
        properties: Vec<Property>,
    },
    Member {
        object: Box<Expression>,
        property: String,
    },
    Call {
        callee: Box<Expression>,
        arguments: Vec<Property>,
    },
    /// `argument |> call`
    Pipe {
        argument: Box<Expression>,
        call: Box<Expression>,
    },
    Binary {
        operator: Operator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Logical {
        operator: LogicalOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        operator: UnaryOperator,
        argument: Box<Expression>,
    },
    Function(FunctionExpression),
}

impl Expression {
    pub fn identifier(name: impl Into<String>) -> Self {
        Expression::Identifier { name: name.into() }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expression::StringLiteral {
            value: value.into(),
        }
    }
}
