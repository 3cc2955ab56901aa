//! Structural type system for runtime values

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind is the variant tag shared by a [`Type`] and every value of that type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    String,
    Int,
    UInt,
    Float,
    Bool,
    Time,
    Duration,
    Regexp,
    Array,
    Object,
    Function,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::String => "string",
            Kind::Int => "int",
            Kind::UInt => "uint",
            Kind::Float => "float",
            Kind::Bool => "bool",
            Kind::Time => "time",
            Kind::Duration => "duration",
            Kind::Regexp => "regexp",
            Kind::Array => "array",
            Kind::Object => "object",
            Kind::Function => "function",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Type {
    String,
    Int,
    UInt,
    Float,
    Bool,
    Time,
    Duration,
    Regexp,
    Array { element: Box<Type> },
    /// An empty property map stands for "any object".
    Object { properties: BTreeMap<String, Type> },
    Function(Box<FunctionSignature>),
    /// The object type of pipeline nodes.
    Table,
    /// Any one of the listed types, e.g. times given as an instant or an offset.
    OneOf { alternatives: Vec<Type> },
}

impl Type {
    pub fn kind(&self) -> Kind {
        match self {
            Type::String => Kind::String,
            Type::Int => Kind::Int,
            Type::UInt => Kind::UInt,
            Type::Float => Kind::Float,
            Type::Bool => Kind::Bool,
            Type::Time => Kind::Time,
            Type::Duration => Kind::Duration,
            Type::Regexp => Kind::Regexp,
            Type::Array { .. } => Kind::Array,
            Type::Object { .. } | Type::Table => Kind::Object,
            Type::Function(_) => Kind::Function,
            // Reported as the first alternative.
            Type::OneOf { alternatives: alts } => alts.first().map(Type::kind).unwrap_or(Kind::Object),
        }
    }

    /// Accepted wherever a query time is expected.
    pub fn time_like() -> Self {
        Type::OneOf {
            alternatives: vec![Type::Time, Type::Duration, Type::Int],
        }
    }

    pub fn array(element: Type) -> Self {
        Type::Array {
            element: Box::new(element),
        }
    }

    pub fn empty_object() -> Self {
        Type::Object {
            properties: BTreeMap::new(),
        }
    }

    /// Reports whether a value of type `actual` may be passed where `self` is declared.
    ///
    /// Objects with no declared properties accept any object, arrays compare by element
    /// unless either side is an array of empty objects, and functions accept any function.
    pub fn accepts(&self, actual: &Type) -> bool {
        match (self, actual) {
            (Type::Object { properties }, other) if properties.is_empty() => {
                other.kind() == Kind::Object
            }
            (Type::Table, Type::Table) => true,
            (Type::Array { element: e }, Type::Array { element: a }) => {
                e.accepts(a) || **a == Type::empty_object()
            }
            (Type::Function(_), Type::Function(_)) => true,
            (Type::OneOf { alternatives: alts }, actual) => alts.iter().any(|t| t.accepts(actual)),
            (expected, actual) => expected == actual,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Array { element } => write!(f, "[{}]", element),
            Type::Object { properties } => {
                f.write_str("{")?;
                for (i, (k, t)) in properties.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, t)?;
                }
                f.write_str("}")
            }
            Type::Function(sig) => write!(f, "{}", sig),
            Type::Table => f.write_str("table"),
            Type::OneOf { alternatives: alts } => {
                for (i, t) in alts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{}", t)?;
                }
                Ok(())
            }
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Declared parameters of a callable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub params: BTreeMap<String, Type>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipe_argument: Option<String>,

    pub return_type: Type,
}

impl FunctionSignature {
    pub fn new(return_type: Type) -> Self {
        Self {
            params: BTreeMap::new(),
            required: Vec::new(),
            pipe_argument: None,
            return_type,
        }
    }

    /// Adds an optional parameter.
    pub fn param(mut self, name: impl Into<String>, t: Type) -> Self {
        self.params.insert(name.into(), t);
        self
    }

    /// Adds a parameter that must be present at every call.
    pub fn required(mut self, name: impl Into<String>, t: Type) -> Self {
        let name = name.into();
        self.params.insert(name.clone(), t);
        self.required.push(name);
        self
    }

    pub fn pipe(mut self, name: impl Into<String>, t: Type) -> Self {
        let name = name.into();
        self.params.insert(name.clone(), t);
        self.pipe_argument = Some(name);
        self
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, (name, t)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if self.pipe_argument.as_deref() == Some(name.as_str()) {
                write!(f, "{}=<-: {}", name, t)?;
            } else {
                write!(f, "{}: {}", name, t)?;
            }
        }
        write!(f, ") -> {}", self.return_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_accepts_any_object() {
        let any = Type::empty_object();
        assert!(any.accepts(&Type::Table));
        let rec = Type::Object {
            properties: [("a".to_string(), Type::Int)].into_iter().collect(),
        };
        assert!(any.accepts(&rec));
        assert!(!any.accepts(&Type::Int));
    }

    #[test]
    fn test_one_of() {
        let t = Type::time_like();
        assert!(t.accepts(&Type::Duration));
        assert!(t.accepts(&Type::Int));
        assert!(!t.accepts(&Type::String));
        assert_eq!(t.to_string(), "time | duration | int");
    }

    #[test]
    fn test_signature_display() {
        let sig = FunctionSignature::new(Type::Table)
            .pipe("table", Type::Table)
            .required("n", Type::Int);
        assert_eq!(sig.to_string(), "(n: int, table=<-: table) -> table");
    }
}
