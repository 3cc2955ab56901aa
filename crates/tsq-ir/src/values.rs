//! Runtime values produced by the interpreter
//!
//! Accessors such as [`Value::str`] are only valid for their own variant. Calling one on
//! a different variant is a programming error and panics with [`UnexpectedKind`];
//! recoverable argument checking goes through [`crate::Arguments`] instead.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::semantic::FunctionExpression;
use crate::table::{TableArena, TableObject};
use crate::time::{Duration, Time};
use crate::types::{FunctionSignature, Kind, Type};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    #[error("missing required keyword argument {0:?}")]
    MissingArgument(String),

    #[error("keyword argument {name:?} should be of kind {expected}, but got {actual}")]
    ArgumentKind {
        name: String,
        expected: Kind,
        actual: Kind,
    },

    #[error("unused keyword argument(s) {0:?}")]
    UnusedArguments(Vec<String>),

    #[error("invalid regular expression {0:?}")]
    Regexp(String),

    #[error("{0}")]
    Invalid(String),
}

/// Panic payload for calling an accessor on the wrong variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnexpectedKind {
    pub got: Kind,
    pub expected: Kind,
}

impl fmt::Display for UnexpectedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected kind: got {:?} expected {:?}", self.got, self.expected)
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Time(Time),
    Duration(Duration),
    Regexp(Regex),
    Array(Array),
    Object(Object),
    Function(Function),
}

macro_rules! accessor {
    ($name:ident, $variant:ident, $kind:ident, $ret:ty) => {
        /// # Panics
        #[doc = concat!("Panics unless the value is `", stringify!($variant), "`.")]
        pub fn $name(&self) -> $ret {
            match self {
                Value::$variant(v) => v.clone(),
                other => other.unexpected(Kind::$kind),
            }
        }
    };
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::String(_) => Kind::String,
            Value::Int(_) => Kind::Int,
            Value::UInt(_) => Kind::UInt,
            Value::Float(_) => Kind::Float,
            Value::Bool(_) => Kind::Bool,
            Value::Time(_) => Kind::Time,
            Value::Duration(_) => Kind::Duration,
            Value::Regexp(_) => Kind::Regexp,
            Value::Array(_) => Kind::Array,
            Value::Object(_) => Kind::Object,
            Value::Function(_) => Kind::Function,
        }
    }

    pub fn type_of(&self) -> Type {
        match self {
            Value::String(_) => Type::String,
            Value::Int(_) => Type::Int,
            Value::UInt(_) => Type::UInt,
            Value::Float(_) => Type::Float,
            Value::Bool(_) => Type::Bool,
            Value::Time(_) => Type::Time,
            Value::Duration(_) => Type::Duration,
            Value::Regexp(_) => Type::Regexp,
            Value::Array(a) => Type::array(a.element_type().clone()),
            Value::Object(o) => o.type_of(),
            Value::Function(f) => Type::Function(Box::new(f.signature())),
        }
    }

    fn unexpected(&self, expected: Kind) -> ! {
        panic!(
            "{}",
            UnexpectedKind {
                got: self.kind(),
                expected,
            }
        )
    }

    /// # Panics
    /// Panics unless the value is a string.
    pub fn str(&self) -> &str {
        match self {
            Value::String(s) => s,
            other => other.unexpected(Kind::String),
        }
    }

    accessor!(int, Int, Int, i64);
    accessor!(uint, UInt, UInt, u64);
    accessor!(float, Float, Float, f64);
    accessor!(bool, Bool, Bool, bool);
    accessor!(time, Time, Time, Time);
    accessor!(duration, Duration, Duration, Duration);

    /// # Panics
    /// Panics unless the value is a regular expression.
    pub fn regexp(&self) -> &Regex {
        match self {
            Value::Regexp(r) => r,
            other => other.unexpected(Kind::Regexp),
        }
    }

    /// # Panics
    /// Panics unless the value is an array.
    pub fn array(&self) -> &Array {
        match self {
            Value::Array(a) => a,
            other => other.unexpected(Kind::Array),
        }
    }

    /// # Panics
    /// Panics unless the value is an object.
    pub fn object(&self) -> &Object {
        match self {
            Value::Object(o) => o,
            other => other.unexpected(Kind::Object),
        }
    }

    /// # Panics
    /// Panics unless the value is a function.
    pub fn function(&self) -> &Function {
        match self {
            Value::Function(f) => f,
            other => other.unexpected(Kind::Function),
        }
    }

    /// Structural equality; values of different types are never equal.
    pub fn equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::Regexp(a), Value::Regexp(b)) => a.as_str() == b.as_str(),
            (Value::Array(a), Value::Array(b)) => a.equal(b),
            (Value::Object(a), Value::Object(b)) => a.equal(b),
            (Value::Function(a), Value::Function(b)) => a.equal(b),
            _ => false,
        }
    }

    pub fn regexp_from_str(pattern: &str) -> Result<Value, ValueError> {
        Regex::new(pattern)
            .map(Value::Regexp)
            .map_err(|_| ValueError::Regexp(pattern.to_string()))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Time(t) => write!(f, "{}", t),
            Value::Duration(d) => write!(f, "{}", d),
            Value::Regexp(r) => write!(f, "/{}/", r.as_str()),
            Value::Array(a) => {
                f.write_str("[")?;
                for (i, v) in a.values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("]")
            }
            Value::Object(Object::Record(r)) => write!(f, "{}", r),
            Value::Object(Object::Table(t)) => write!(f, "<table {}>", t.kind()),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Time> for Value {
    fn from(t: Time) -> Self {
        Value::Time(t)
    }
}

impl From<Duration> for Value {
    fn from(d: Duration) -> Self {
        Value::Duration(d)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Object(Object::Record(r))
    }
}

impl From<Arc<TableObject>> for Value {
    fn from(t: Arc<TableObject>) -> Self {
        Value::Object(Object::Table(t))
    }
}

/// Immutable, homogeneous list of values.
#[derive(Debug, Clone)]
pub struct Array {
    element: Type,
    values: Vec<Value>,
}

impl Array {
    pub fn new(element: Type, values: Vec<Value>) -> Self {
        Self { element, values }
    }

    /// Builds an array whose element type is taken from the first value.
    pub fn from_values(values: Vec<Value>) -> Self {
        let element = values
            .first()
            .map(Value::type_of)
            .unwrap_or_else(Type::empty_object);
        Self { element, values }
    }

    pub fn element_type(&self) -> &Type {
        &self.element
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Value> {
        self.values.get(i)
    }

    pub fn range(&self, mut f: impl FnMut(usize, &Value)) {
        for (i, v) in self.values.iter().enumerate() {
            f(i, v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    pub fn equal(&self, other: &Array) -> bool {
        self.values.len() == other.values.len()
            && self.values.iter().zip(&other.values).all(|(a, b)| a.equal(b))
    }

    /// Converts an array of strings.
    pub fn to_strings(&self) -> Result<Vec<String>, ValueError> {
        self.values
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                other => Err(ValueError::Invalid(format!(
                    "expected array of strings, found element of kind {}",
                    other.kind()
                ))),
            })
            .collect()
    }
}

/// Object with named properties, ordered by key.
#[derive(Debug, Clone, Default)]
pub struct Record {
    values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn range(&self, mut f: impl FnMut(&str, &Value)) {
        for (k, v) in &self.values {
            f(k, v);
        }
    }

    pub fn type_of(&self) -> Type {
        Type::Object {
            properties: self
                .values
                .iter()
                .map(|(k, v)| (k.clone(), v.type_of()))
                .collect(),
        }
    }

    pub fn equal(&self, other: &Record) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .all(|(k, v)| other.values.get(k).map_or(false, |o| v.equal(o)))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        f.write_str("}")
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Object values: plain records or pipeline nodes.
#[derive(Debug, Clone)]
pub enum Object {
    Record(Record),
    Table(Arc<TableObject>),
}

impl Object {
    pub fn type_of(&self) -> Type {
        match self {
            Object::Record(r) => r.type_of(),
            Object::Table(_) => Type::Table,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Object::Record(r) => r.get(key).cloned(),
            Object::Table(t) => t.get(key),
        }
    }

    /// Table objects are immutable and ignore writes.
    pub fn set(&mut self, key: &str, value: Value) {
        if let Object::Record(r) = self {
            r.set(key, value);
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Object::Record(r) => r.len(),
            Object::Table(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self, mut f: impl FnMut(&str, &Value)) {
        match self {
            Object::Record(r) => r.range(f),
            Object::Table(t) => t.range(&mut f),
        }
    }

    pub fn as_table(&self) -> Option<&Arc<TableObject>> {
        match self {
            Object::Table(t) => Some(t),
            Object::Record(_) => None,
        }
    }

    pub fn equal(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Record(a), Object::Record(b)) => a.equal(b),
            (Object::Table(a), Object::Table(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

/// A builtin implemented in Rust.
pub trait BuiltinFunction: Send + Sync {
    fn name(&self) -> &str;

    fn signature(&self) -> &FunctionSignature;

    fn has_side_effect(&self) -> bool;

    /// Invokes the builtin. Pipeline constructors allocate their nodes in `arena`.
    fn call(&self, arena: &mut TableArena, args: Record) -> Result<Value, ValueError>;
}

/// A user function together with the scope it closed over.
#[derive(Debug, Clone)]
pub struct Lambda {
    pub expr: FunctionExpression,
    pub scope: Record,
}

#[derive(Clone)]
pub enum Function {
    Builtin(Arc<dyn BuiltinFunction>),
    Lambda(Arc<Lambda>),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::Builtin(b) => b.name(),
            Function::Lambda(_) => "lambda",
        }
    }

    pub fn has_side_effect(&self) -> bool {
        match self {
            Function::Builtin(b) => b.has_side_effect(),
            Function::Lambda(_) => false,
        }
    }

    /// Parameter types of user functions are not inferred and accept any object.
    pub fn signature(&self) -> FunctionSignature {
        match self {
            Function::Builtin(b) => b.signature().clone(),
            Function::Lambda(l) => {
                let mut sig = FunctionSignature::new(Type::empty_object());
                for p in &l.expr.params {
                    sig.params.insert(p.key.clone(), Type::empty_object());
                    if p.pipe {
                        sig.pipe_argument = Some(p.key.clone());
                    }
                }
                sig
            }
        }
    }

    pub fn equal(&self, other: &Function) -> bool {
        match (self, other) {
            (Function::Builtin(a), Function::Builtin(b)) => Arc::ptr_eq(a, b),
            (Function::Lambda(a), Function::Lambda(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Builtin(b) => write!(f, "Builtin({})", b.name()),
            Function::Lambda(l) => write!(f, "Lambda({:?})", l.expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_mismatched_types() {
        assert!(!Value::Int(1).equal(&Value::UInt(1)));
        assert!(!Value::from("1").equal(&Value::Int(1)));
        assert!(Value::Float(1.5).equal(&Value::Float(1.5)));
    }

    #[test]
    fn test_regexp_equality_uses_pattern() {
        let a = Value::regexp_from_str("^cpu").unwrap();
        let b = Value::regexp_from_str("^cpu").unwrap();
        assert_eq!(a, b);
        assert!(Value::regexp_from_str("(").is_err());
    }

    #[test]
    #[should_panic(expected = "unexpected kind: got Int expected String")]
    fn test_wrong_accessor_panics() {
        Value::Int(3).str();
    }

    #[test]
    fn test_record_range_is_ordered() {
        let r = Record::new().with("b", 2i64).with("a", 1i64);
        let mut keys = Vec::new();
        r.range(|k, _| keys.push(k.to_string()));
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_array_to_strings() {
        let arr = Array::from_values(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(arr.to_strings().unwrap(), vec!["a", "b"]);
        let mixed = Array::from_values(vec![Value::from("a"), Value::Int(1)]);
        assert!(mixed.to_strings().is_err());
    }
}
