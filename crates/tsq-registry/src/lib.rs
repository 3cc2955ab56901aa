//! Freezable registries for functions, procedures and transformations
//!
//! A registry is filled once at startup and then frozen. Registering a name twice, or
//! registering anything after [`Registry::freeze`], is a [`FatalError`]: the process is
//! misconfigured and should not start.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

pub use tsq_ir::FunctionSignature;

/// Misconfiguration detected while building registries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("duplicate registration for {registry} {name:?}")]
    Duplicate { registry: &'static str, name: String },

    #[error("{registry} registry is frozen, cannot register {name:?}")]
    Frozen { registry: &'static str, name: String },

    #[error("builtin script {name:?} failed: {message}")]
    Script { name: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no {registry} registered for {name:?}")]
    NotFound { registry: &'static str, name: String },

    #[error("{0} registry is not frozen")]
    NotFrozen(&'static str),
}

/// Name-to-value map with register-once semantics.
#[derive(Debug, Clone)]
pub struct Registry<V> {
    kind: &'static str,
    entries: BTreeMap<String, V>,
    frozen: bool,
}

impl<V> Registry<V> {
    /// `kind` names the registry in error messages, e.g. `"function"`.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
            frozen: false,
        }
    }

    pub fn register(&mut self, name: impl Into<String>, value: V) -> Result<(), FatalError> {
        let name = name.into();
        if self.frozen {
            return Err(FatalError::Frozen {
                registry: self.kind,
                name,
            });
        }
        if self.entries.contains_key(&name) {
            return Err(FatalError::Duplicate {
                registry: self.kind,
                name,
            });
        }
        debug!(registry = self.kind, name = %name, "registered");
        self.entries.insert(name, value);
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn lookup(&self, name: &str) -> Result<&V, RegistryError> {
        self.entries.get(name).ok_or_else(|| RegistryError::NotFound {
            registry: self.kind,
            name: name.to_string(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

/// One-to-many index, e.g. operation kind to candidate procedure kinds. Appending is
/// allowed until the index is frozen.
#[derive(Debug, Clone)]
pub struct Index<V> {
    kind: &'static str,
    entries: BTreeMap<String, Vec<V>>,
    frozen: bool,
}

impl<V> Index<V> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
            frozen: false,
        }
    }

    pub fn add(&mut self, name: impl Into<String>, value: V) -> Result<(), FatalError> {
        let name = name.into();
        if self.frozen {
            return Err(FatalError::Frozen {
                registry: self.kind,
                name,
            });
        }
        self.entries.entry(name).or_default().push(value);
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Candidates in registration order; empty when nothing was registered.
    pub fn get(&self, name: &str) -> &[V] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = Registry::new("function");
        registry.register("mean", 1).unwrap();
        registry.register("sum", 2).unwrap();

        assert_eq!(registry.lookup("mean"), Ok(&1));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["mean", "sum"]);
        assert_eq!(
            registry.lookup("median"),
            Err(RegistryError::NotFound {
                registry: "function",
                name: "median".to_string(),
            })
        );
    }

    #[test]
    fn test_duplicate_registration_is_fatal() {
        let mut registry = Registry::new("procedure");
        registry.register("from", ()).unwrap();
        let err = registry.register("from", ()).unwrap_err();
        assert_eq!(
            err,
            FatalError::Duplicate {
                registry: "procedure",
                name: "from".to_string(),
            }
        );
        assert_eq!(err.to_string(), "duplicate registration for procedure \"from\"");
    }

    #[test]
    fn test_register_after_freeze_is_fatal() {
        let mut registry = Registry::new("transformation");
        registry.register("range", ()).unwrap();
        registry.freeze();
        assert!(registry.is_frozen());
        assert!(matches!(
            registry.register("filter", ()),
            Err(FatalError::Frozen { .. })
        ));
        // Lookups still work after freezing.
        assert!(registry.lookup("range").is_ok());
    }

    #[test]
    fn test_index_keeps_order() {
        let mut index = Index::new("operation");
        index.add("range", "range").unwrap();
        index.add("range", "range_alt").unwrap();
        assert_eq!(index.get("range"), &["range", "range_alt"]);
        assert!(index.get("from").is_empty());
        index.freeze();
        assert!(index.add("from", "from").is_err());
    }
}
