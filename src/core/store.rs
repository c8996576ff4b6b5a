//! # Key/Value Store
//!
//! The variables resolved so far. Every expansion, script, task and service sees the
//! store as it is at the moment it runs.

use crate::system::executor::ChildEnv;
use std::collections::BTreeMap;

/// Variable name to value, sorted by name so that the environment handed to children
/// and the data-only preview are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvStore {
    values: BTreeMap<String, String>,
}

impl KvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, overwriting any previous value.
    ///
    /// Returns `false` (and stores nothing) for an empty key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if key.is_empty() {
            log::warn!("Ignoring a variable with an empty name.");
            return false;
        }
        let value = value.into();
        log::trace!("set {}={}", key, value);
        self.values.insert(key, value);
        true
    }

    /// The current value of `key`, if set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// The current value of `key`, or `""` when it is not set.
    pub fn lookup(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// Whether `key` has been set.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no variable has been set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `KEY=value` lines, one per variable.
    pub fn to_env_lines(&self) -> Vec<String> {
        self.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    /// Snapshot of the store for a child process.
    ///
    /// With `clear` the child gets nothing but the store's variables; otherwise they
    /// are layered over the environment `xe` itself inherited.
    pub fn to_child_env(&self, clear: bool) -> ChildEnv {
        ChildEnv {
            vars: self
                .values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            clear,
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KvStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut store = Self::new();
        for (k, v) in iter {
            store.set(k, v);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_overwrites() {
        let mut store = KvStore::new();
        store.set("A", "1");
        store.set("A", "2");
        assert_eq!(store.get("A"), Some("2"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let mut store = KvStore::new();
        assert!(!store.set("", "value"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_lookup_unknown_is_empty() {
        let store = KvStore::new();
        assert_eq!(store.lookup("MISSING"), "");
        assert!(!store.contains("MISSING"));
    }

    #[test]
    fn test_keys_are_case_sensitive() {
        let store: KvStore = [("path", "a"), ("PATH", "b")].into_iter().collect();
        assert_eq!(store.get("path"), Some("a"));
        assert_eq!(store.get("PATH"), Some("b"));
    }

    #[test]
    fn test_child_env_snapshot() {
        let mut store: KvStore = [("B", "2"), ("A", "1")].into_iter().collect();
        let snapshot = store.to_child_env(true);
        store.set("C", "3");

        assert!(snapshot.clear);
        assert_eq!(
            snapshot.vars,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string())
            ]
        );
        assert_eq!(store.to_env_lines(), vec!["A=1", "B=2", "C=3"]);
    }
}
