//! Binary and unary operators over runtime values

use std::cmp::Ordering;

use tsq_ir::semantic::{Operator, UnaryOperator};
use tsq_ir::Value;

use crate::error::CompileError;

fn mismatch(op: Operator, l: &Value, r: &Value) -> CompileError {
    CompileError::Eval(format!(
        "unsupported operand kinds for {}: {} and {}",
        op.symbol(),
        l.kind(),
        r.kind()
    ))
}

fn overflow(op: Operator) -> CompileError {
    CompileError::Eval(format!("integer overflow in {}", op.symbol()))
}

pub fn binary(op: Operator, l: &Value, r: &Value) -> Result<Value, CompileError> {
    use Operator::*;
    match op {
        Add | Subtract | Multiply | Divide => arithmetic(op, l, r),
        Equal => Ok(Value::Bool(equals(l, r))),
        NotEqual => Ok(Value::Bool(!equals(l, r))),
        LessThan | LessThanEqual | GreaterThan | GreaterThanEqual => {
            let ord = compare(l, r).ok_or_else(|| mismatch(op, l, r))?;
            Ok(Value::Bool(match op {
                LessThan => ord == Ordering::Less,
                LessThanEqual => ord != Ordering::Greater,
                GreaterThan => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        RegexpMatch | NotRegexpMatch => match (l, r) {
            (Value::String(s), Value::Regexp(re)) => {
                Ok(Value::Bool(re.is_match(s) == (op == RegexpMatch)))
            }
            _ => Err(mismatch(op, l, r)),
        },
    }
}

fn arithmetic(op: Operator, l: &Value, r: &Value) -> Result<Value, CompileError> {
    use Operator::*;
    Ok(match (op, l, r) {
        (Add, Value::Int(a), Value::Int(b)) => Value::Int(a.checked_add(*b).ok_or_else(|| overflow(op))?),
        (Subtract, Value::Int(a), Value::Int(b)) => Value::Int(a.checked_sub(*b).ok_or_else(|| overflow(op))?),
        (Multiply, Value::Int(a), Value::Int(b)) => Value::Int(a.checked_mul(*b).ok_or_else(|| overflow(op))?),
        (Divide, Value::Int(_), Value::Int(0)) | (Divide, Value::UInt(_), Value::UInt(0)) => {
            return Err(CompileError::Eval("division by zero".to_string()))
        }
        (Divide, Value::Int(a), Value::Int(b)) => Value::Int(a / b),
        (Add, Value::UInt(a), Value::UInt(b)) => Value::UInt(a.checked_add(*b).ok_or_else(|| overflow(op))?),
        (Subtract, Value::UInt(a), Value::UInt(b)) => Value::UInt(a.checked_sub(*b).ok_or_else(|| overflow(op))?),
        (Multiply, Value::UInt(a), Value::UInt(b)) => Value::UInt(a.checked_mul(*b).ok_or_else(|| overflow(op))?),
        (Divide, Value::UInt(a), Value::UInt(b)) => Value::UInt(a / b),
        (Add, Value::Float(a), Value::Float(b)) => Value::Float(a + b),
        (Subtract, Value::Float(a), Value::Float(b)) => Value::Float(a - b),
        (Multiply, Value::Float(a), Value::Float(b)) => Value::Float(a * b),
        (Divide, Value::Float(a), Value::Float(b)) => Value::Float(a / b),
        (Add, Value::String(a), Value::String(b)) => Value::String(format!("{}{}", a, b)),
        (Add, Value::Duration(a), Value::Duration(b)) => Value::Duration(*a + *b),
        (Subtract, Value::Duration(a), Value::Duration(b)) => Value::Duration(*a + -*b),
        (Add, Value::Time(t), Value::Duration(d)) => Value::Time(*t + *d),
        (Subtract, Value::Time(t), Value::Duration(d)) => Value::Time(*t + -*d),
        (Subtract, Value::Time(a), Value::Time(b)) => Value::Duration(*a - *b),
        _ => return Err(mismatch(op, l, r)),
    })
}

/// Numbers compare across int, uint and float; everything else needs equal kinds.
fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::UInt(a), Value::UInt(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
        (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => as_f64(l)?.partial_cmp(&as_f64(r)?),
    }
}

fn equals(l: &Value, r: &Value) -> bool {
    match (as_f64(l), as_f64(r)) {
        (Some(a), Some(b)) if l.kind() != r.kind() => a == b,
        _ => l.equal(r),
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::UInt(u) => Some(*u as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

pub fn unary(op: UnaryOperator, v: &Value) -> Result<Value, CompileError> {
    match (op, v) {
        (UnaryOperator::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOperator::Negate, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnaryOperator::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOperator::Negate, Value::Duration(d)) => Ok(Value::Duration(-*d)),
        _ => Err(CompileError::Eval(format!(
            "unsupported operand kind for {:?}: {}",
            op,
            v.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsq_ir::{Duration, Time};

    #[test]
    fn test_arithmetic() {
        assert_eq!(binary(Operator::Add, &Value::Int(2), &Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(
            binary(Operator::Add, &Value::from("a"), &Value::from("b")).unwrap(),
            Value::from("ab")
        );
        assert_eq!(
            binary(
                Operator::Subtract,
                &Value::Time(Time::from_unix(3600)),
                &Value::Duration(Duration::from_hours(1))
            )
            .unwrap(),
            Value::Time(Time::from_unix(0))
        );
        assert!(binary(Operator::Divide, &Value::Int(1), &Value::Int(0)).is_err());
        assert!(binary(Operator::Add, &Value::Int(1), &Value::Float(1.0)).is_err());
    }

    #[test]
    fn test_comparison_mixes_numbers() {
        assert_eq!(
            binary(Operator::GreaterThan, &Value::Float(1.5), &Value::Int(1)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            binary(Operator::Equal, &Value::Int(1), &Value::Float(1.0)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            binary(Operator::NotEqual, &Value::from("a"), &Value::Int(1)).unwrap(),
            Value::Bool(true)
        );
        assert!(binary(Operator::LessThan, &Value::from("a"), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_regexp_match() {
        let re = Value::regexp_from_str("^cpu").unwrap();
        assert_eq!(
            binary(Operator::RegexpMatch, &Value::from("cpu0"), &re).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            binary(Operator::NotRegexpMatch, &Value::from("mem"), &re).unwrap(),
            Value::Bool(true)
        );
    }
}
