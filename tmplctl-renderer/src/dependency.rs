//! External values a template depends on, and the snapshot of those fetched.

use std::collections::HashMap;
use std::fmt;

/// Secret payload: the `data` object returned by the secrets service.
pub type SecretData = serde_json::Map<String, serde_json::Value>;

/// One external value a template reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dependency {
    /// A key in the key-value store.
    Key(String),
    /// A secret path in the secrets service.
    Secret(String),
}

impl Dependency {
    pub fn key(path: impl Into<String>) -> Self {
        Dependency::Key(path.into())
    }

    pub fn secret(path: impl Into<String>) -> Self {
        Dependency::Secret(path.into())
    }

    pub fn path(&self) -> &str {
        match self {
            Dependency::Key(path) | Dependency::Secret(path) => path,
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, Dependency::Secret(_))
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Key(path) => write!(f, "key({path:?})"),
            Dependency::Secret(path) => write!(f, "secret({path:?})"),
        }
    }
}

/// Result of the latest successful read of a dependency. `None` means the
/// store answered and the value does not exist.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedValue {
    Key(Option<String>),
    Secret(Option<SecretData>),
}

/// Latest known value of every dependency read at least once.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    values: HashMap<Dependency, FetchedValue>,
}

impl Snapshot {
    /// Record a fetched value. Returns `true` when it differs from the
    /// previous one.
    pub fn insert(&mut self, dependency: Dependency, value: FetchedValue) -> bool {
        match self.values.get(&dependency) {
            Some(existing) if *existing == value => false,
            _ => {
                self.values.insert(dependency, value);
                true
            }
        }
    }

    pub fn get(&self, dependency: &Dependency) -> Option<&FetchedValue> {
        self.values.get(dependency)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
