//! Pest-based parser for TSQ

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;
use tsq_ir::{Duration, Time};

use crate::ast::*;

#[derive(Parser)]
#[grammar = "tsq.pest"]
pub struct TsqParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Pest error: {0}")]
    Pest(#[from] Box<pest::error::Error<Rule>>),

    #[error("undeclared identifier {0:?}")]
    Undeclared(String),

    #[error("pipe destination must be a function call")]
    InvalidPipe,
}

/// Parse TSQ source text into AST
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let mut pairs = TsqParser::parse(Rule::program, source).map_err(Box::new)?;
    let program_pair = pairs
        .next()
        .ok_or_else(|| ParseError::Syntax("Empty input".to_string()))?;

    let mut body = Vec::new();
    for pair in program_pair.into_inner() {
        match pair.as_rule() {
            Rule::option_stmt => {
                let mut inner = pair.into_inner().filter(|p| p.as_rule() != Rule::option_kw);
                let name = take(&mut inner, "option name")?.as_str().to_string();
                let init = parse_expr(take(&mut inner, "option value")?)?;
                body.push(Statement::Option { name, init });
            }
            Rule::var_stmt => {
                let mut inner = pair.into_inner();
                let name = take(&mut inner, "variable name")?.as_str().to_string();
                let init = parse_expr(take(&mut inner, "variable value")?)?;
                body.push(Statement::Variable { name, init });
            }
            Rule::expr_stmt => {
                let mut inner = pair.into_inner();
                body.push(Statement::Expr(parse_expr(take(&mut inner, "expression")?)?));
            }
            Rule::EOI => {}
            _ => {}
        }
    }

    Ok(Program { body })
}

fn take<'a, I>(inner: &mut I, what: &str) -> Result<Pair<'a, Rule>, ParseError>
where
    I: Iterator<Item = Pair<'a, Rule>>,
{
    inner
        .next()
        .ok_or_else(|| ParseError::Syntax(format!("missing {}", what)))
}

fn parse_expr(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        // Single-child levels unwrap to the next level
        Rule::expr => parse_expr(take(&mut pair.into_inner(), "expression")?),
        Rule::logical_or | Rule::logical_and => parse_logical(pair),
        Rule::unary_logical => {
            let mut inner = pair.into_inner();
            let first = take(&mut inner, "operand")?;
            if first.as_rule() == Rule::not_op {
                let operand = parse_expr(take(&mut inner, "operand")?)?;
                Ok(Expr::UnaryOp {
                    op: UnOp::Not,
                    expr: Box::new(operand),
                })
            } else {
                parse_expr(first)
            }
        }
        Rule::comparison | Rule::additive | Rule::multiplicative => parse_binary(pair),
        Rule::pipe => {
            let mut inner = pair.into_inner();
            let mut left = parse_expr(take(&mut inner, "operand")?)?;
            for call in inner {
                left = Expr::Pipe {
                    argument: Box::new(left),
                    call: Box::new(parse_expr(call)?),
                };
            }
            Ok(left)
        }
        Rule::unary => {
            let mut inner = pair.into_inner();
            let first = take(&mut inner, "operand")?;
            if first.as_rule() == Rule::neg_op {
                let operand = parse_expr(take(&mut inner, "operand")?)?;
                Ok(Expr::UnaryOp {
                    op: UnOp::Neg,
                    expr: Box::new(operand),
                })
            } else {
                parse_expr(first)
            }
        }
        Rule::postfix => {
            let mut inner = pair.into_inner();
            let mut expr = parse_expr(take(&mut inner, "primary")?)?;
            for suffix in inner {
                expr = match suffix.as_rule() {
                    Rule::call_suffix => Expr::Call {
                        callee: Box::new(expr),
                        args: suffix
                            .into_inner()
                            .map(parse_property)
                            .collect::<Result<_, _>>()?,
                    },
                    Rule::member_suffix => Expr::Member {
                        object: Box::new(expr),
                        property: take(&mut suffix.into_inner(), "property")?
                            .as_str()
                            .to_string(),
                    },
                    other => {
                        return Err(ParseError::Syntax(format!("Unknown suffix: {:?}", other)))
                    }
                };
            }
            Ok(expr)
        }
        Rule::primary => parse_expr(take(&mut pair.into_inner(), "primary")?),
        Rule::ident => Ok(Expr::Identifier(pair.as_str().to_string())),
        Rule::arrow => parse_arrow(pair),
        Rule::array_lit => Ok(Expr::Array(
            pair.into_inner().map(parse_expr).collect::<Result<_, _>>()?,
        )),
        Rule::object_lit => Ok(Expr::Object(
            pair.into_inner()
                .map(parse_property)
                .collect::<Result<_, _>>()?,
        )),
        Rule::datetime_lit
        | Rule::duration_lit
        | Rule::float_lit
        | Rule::int_lit
        | Rule::string_lit
        | Rule::regex_lit
        | Rule::bool_lit => Ok(Expr::Literal(parse_literal(pair)?)),
        other => Err(ParseError::Syntax(format!("Cannot parse expr: {:?}", other))),
    }
}

fn parse_logical(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut left = parse_expr(take(&mut inner, "operand")?)?;
    while let Some(op_pair) = inner.next() {
        let op = match op_pair.as_rule() {
            Rule::and_op => LogicalOp::And,
            Rule::or_op => LogicalOp::Or,
            other => return Err(ParseError::Syntax(format!("Unknown operator: {:?}", other))),
        };
        let right = parse_expr(take(&mut inner, "right operand")?)?;
        left = Expr::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

/// Pest yields a flat sequence `term (op term)*`; fold it left-associatively.
fn parse_binary(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut left = parse_expr(take(&mut inner, "operand")?)?;
    while let Some(op_pair) = inner.next() {
        let op = match op_pair.as_str() {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "==" => BinOp::Eq,
            "!=" => BinOp::Ne,
            "<" => BinOp::Lt,
            "<=" => BinOp::Le,
            ">" => BinOp::Gt,
            ">=" => BinOp::Ge,
            "=~" => BinOp::RegexMatch,
            "!~" => BinOp::RegexNotMatch,
            other => return Err(ParseError::Syntax(format!("Unknown operator: {}", other))),
        };
        let right = parse_expr(take(&mut inner, "right operand")?)?;
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_arrow(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut params = Vec::new();
    let mut body = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::param => {
                let mut inner = p.into_inner();
                let name = take(&mut inner, "parameter name")?.as_str().to_string();
                let default = match inner.next() {
                    None => None,
                    Some(d) if d.as_rule() == Rule::pipe_lit => Some(ParamDefault::Pipe),
                    Some(d) => Some(ParamDefault::Expr(parse_expr(d)?)),
                };
                params.push(Param { name, default });
            }
            _ => body = Some(parse_expr(p)?),
        }
    }
    let body = body.ok_or_else(|| ParseError::Syntax("function without body".to_string()))?;
    Ok(Expr::Arrow {
        params,
        body: Box::new(body),
    })
}

fn parse_property(pair: Pair<Rule>) -> Result<Property, ParseError> {
    let mut inner: Pairs<Rule> = pair.into_inner();
    let key_pair = take(&mut inner, "property key")?;
    let key = match key_pair.as_rule() {
        Rule::string_lit => match parse_literal(key_pair)? {
            Literal::String(s) => s,
            _ => return Err(ParseError::Syntax("invalid property key".to_string())),
        },
        _ => key_pair.as_str().to_string(),
    };
    let value = parse_expr(take(&mut inner, "property value")?)?;
    Ok(Property { key, value })
}

fn parse_literal(pair: Pair<Rule>) -> Result<Literal, ParseError> {
    let text = pair.as_str();
    let invalid = |what: &str| ParseError::Syntax(format!("invalid {} literal {:?}", what, text));
    match pair.as_rule() {
        Rule::int_lit => text.parse().map(Literal::Int).map_err(|_| invalid("integer")),
        Rule::float_lit => text.parse().map(Literal::Float).map_err(|_| invalid("float")),
        Rule::bool_lit => Ok(Literal::Bool(text == "true")),
        Rule::duration_lit => text
            .parse::<Duration>()
            .map(Literal::Duration)
            .map_err(|_| invalid("duration")),
        Rule::datetime_lit => Time::parse_rfc3339(text)
            .map(Literal::DateTime)
            .map_err(|_| invalid("time")),
        Rule::string_lit => {
            let body = take(&mut pair.into_inner(), "string body")?;
            Ok(Literal::String(unescape(body.as_str())))
        }
        Rule::regex_lit => {
            let body = take(&mut pair.into_inner(), "regex body")?;
            Ok(Literal::Regex(body.as_str().replace("\\/", "/")))
        }
        _ => Err(invalid("unknown")),
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_query() {
        let result = parse(r#"from(bucket:"b") |> range(start:-1h) |> mean()"#);
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(result.unwrap().body.len(), 1);
    }

    #[test]
    fn test_pipe_is_left_associative() {
        let program = parse(r#"a |> b() |> c()"#).unwrap();
        let Statement::Expr(Expr::Pipe { argument, call }) = &program.body[0] else {
            panic!("expected pipe, got {:?}", program.body[0]);
        };
        assert!(matches!(**argument, Expr::Pipe { .. }));
        assert!(matches!(**call, Expr::Call { .. }));
    }

    #[test]
    fn test_statements() {
        let program = parse(
            r#"
            // leading comment
            option now = () => 2018-05-22T19:53:26Z
            data = from(db: "telegraf")
            data |> yield(name: "raw")
            "#,
        )
        .unwrap();
        assert!(matches!(&program.body[0], Statement::Option { name, .. } if name == "now"));
        assert!(matches!(&program.body[1], Statement::Variable { name, .. } if name == "data"));
        assert!(matches!(&program.body[2], Statement::Expr(_)));
    }

    #[test]
    fn test_arrow_with_pipe_param() {
        let program = parse(r#"f = (table=<-, n=1) => table |> limit(n: n)"#).unwrap();
        let Statement::Variable { init: Expr::Arrow { params, .. }, .. } = &program.body[0] else {
            panic!("expected arrow");
        };
        assert_eq!(params[0].default, Some(ParamDefault::Pipe));
        assert_eq!(
            params[1].default,
            Some(ParamDefault::Expr(Expr::Literal(Literal::Int(1))))
        );
    }

    #[test]
    fn test_literals() {
        let program = parse(r#"x = [1, 2.5, "a\"b", true, 1h30m, /cpu\/0/]"#).unwrap();
        let Statement::Variable { init: Expr::Array(items), .. } = &program.body[0] else {
            panic!("expected array");
        };
        assert_eq!(
            items,
            &vec![
                Expr::Literal(Literal::Int(1)),
                Expr::Literal(Literal::Float(2.5)),
                Expr::Literal(Literal::String("a\"b".into())),
                Expr::Literal(Literal::Bool(true)),
                Expr::Literal(Literal::Duration(Duration::from_mins(90))),
                Expr::Literal(Literal::Regex("cpu/0".into())),
            ]
        );
    }

    #[test]
    fn test_precedence() {
        let program = parse(r#"r._value > 1 + 2 * 3 and not r.host == "a""#).unwrap();
        let Statement::Expr(Expr::Logical { op, right, .. }) = &program.body[0] else {
            panic!("expected logical");
        };
        assert_eq!(*op, LogicalOp::And);
        assert!(matches!(**right, Expr::UnaryOp { op: UnOp::Not, .. }));
    }

    #[test]
    fn test_syntax_error() {
        assert!(parse("from(bucket: )").is_err());
        assert!(parse("x = ").is_err());
    }
}
