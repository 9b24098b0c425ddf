//! Read-only fact store
//!
//! Facts are externally supplied observations about the target host
//! (hostname, OS family, ...). The store is populated once per run and
//! passed explicitly into compilation; the engine never mutates it.

use crate::resource::Scalar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable map of node attributes for one compile+apply cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactStore {
    facts: BTreeMap<String, Scalar>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fact. Only meaningful while populating the store; once the
    /// store is handed to `compile` it is only read.
    pub fn insert(&mut self, key: &str, value: impl Into<Scalar>) {
        self.facts.insert(key.to_string(), value.into());
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, key: &str, value: impl Into<Scalar>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.facts.get(key)
    }

    /// Get a fact as a string, if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.facts.get(key).and_then(Scalar::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.facts.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.facts.iter()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

impl From<BTreeMap<String, Scalar>> for FactStore {
    fn from(facts: BTreeMap<String, Scalar>) -> Self {
        Self { facts }
    }
}

impl FromIterator<(String, Scalar)> for FactStore {
    fn from_iter<T: IntoIterator<Item = (String, Scalar)>>(iter: T) -> Self {
        Self {
            facts: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_str() {
        let facts = FactStore::new().with("hostname", "storm.example.org");
        assert_eq!(facts.get_str("hostname"), Some("storm.example.org"));
        assert_eq!(facts.get_str("missing"), None);
    }

    #[test]
    fn test_non_string_fact_is_not_a_str() {
        let facts = FactStore::new().with("is_virtual", true);
        assert_eq!(facts.get_str("is_virtual"), None);
        assert_eq!(facts.get("is_virtual"), Some(&Scalar::Bool(true)));
    }
}
