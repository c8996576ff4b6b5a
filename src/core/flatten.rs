//! # Tree Flattener
//!
//! Turns a nested YAML/JSON document into flat `KEY=value` pairs suitable for process
//! environments. Object keys along the path are joined with `_`; list elements share
//! the key of the list itself, so colliding leaves are merged by space-concatenation:
//!
//! ```yaml
//! db:
//!   host: localhost      # db_host=localhost
//!   ports: [5432, 5433]  # db_ports=5432 5433
//! ```

use crate::constants::KEY_SEPARATOR;
use serde_yaml::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Represents errors that can occur while flattening a document.
#[derive(Error, Debug)]
pub enum FlattenError {
    /// The document contains a value that has no string form (null, tagged values).
    #[error("Unsupported value type in document: {0}")]
    UnsupportedType(String),
    /// A leaf has no key to be assigned to, or a mapping key is not a scalar.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// The flattened form of a document: insertion-ordered `(key, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatEnv {
    entries: Vec<(String, String)>,
    positions: HashMap<String, usize>,
}

impl FlatEnv {
    /// Creates an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flattens `value` found at `prefix` into this result.
    pub fn load(&mut self, value: &Value, prefix: &mut Vec<String>) -> Result<(), FlattenError> {
        match value {
            Value::String(s) => self.add(prefix, s.clone()),
            Value::Bool(_) | Value::Number(_) => {
                let rendered = scalar_to_string(value).unwrap_or_default();
                self.add(prefix, rendered)
            }
            Value::Mapping(map) => {
                for (k, v) in map {
                    let segment = key_to_string(k)?;
                    prefix.push(segment);
                    let result = self.load(v, prefix);
                    prefix.pop();
                    result?;
                }
                Ok(())
            }
            Value::Sequence(items) => {
                for item in items {
                    self.load(item, prefix)?;
                }
                Ok(())
            }
            Value::Null => Err(FlattenError::UnsupportedType(format!(
                "null at '{}'",
                prefix.join(KEY_SEPARATOR)
            ))),
            Value::Tagged(tagged) => Err(FlattenError::UnsupportedType(format!(
                "tagged value ({}) at '{}'",
                tagged.tag,
                prefix.join(KEY_SEPARATOR)
            ))),
        }
    }

    fn add(&mut self, prefix: &[String], value: String) -> Result<(), FlattenError> {
        if prefix.is_empty() {
            return Err(FlattenError::InvalidKey(format!(
                "no prefix for value '{}'",
                value
            )));
        }
        let key = prefix.join(KEY_SEPARATOR);
        if key.is_empty() {
            log::debug!("Skipping value '{}' with an empty key.", value);
            return Ok(());
        }

        match self.positions.get(&key) {
            Some(&pos) => {
                if let Some((_, existing)) = self.entries.get_mut(pos) {
                    existing.push(' ');
                    existing.push_str(&value);
                }
            }
            None => {
                self.positions.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    /// The value flattened to `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.positions
            .get(key)
            .and_then(|&pos| self.entries.get(pos))
            .map(|(_, v)| v.as_str())
    }

    /// Iterates `(key, value)` pairs in the order the keys were first reached.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was flattened.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consumes the result, returning its pairs in order.
    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.entries
    }
}

/// Flattens `value` with the given path prefix.
pub fn flatten(value: &Value, prefix: &[String]) -> Result<FlatEnv, FlattenError> {
    let mut env = FlatEnv::new();
    let mut path = prefix.to_vec();
    env.load(value, &mut path)?;
    Ok(env)
}

/// The string form of a scalar: strings verbatim, booleans as `true`/`false`, numbers
/// in their shortest decimal form without exponent (`3.0` becomes `3`).
/// Returns `None` for anything else.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| f.to_string())
            }
        }
        _ => None,
    }
}

fn key_to_string(key: &Value) -> Result<String, FlattenError> {
    scalar_to_string(key).ok_or_else(|| {
        FlattenError::InvalidKey(format!("mapping key {:?} is not a scalar", key))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(doc: &str) -> Value {
        serde_yaml::from_str(doc).unwrap()
    }

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_nested_objects_join_keys() {
        let env = flatten(&parse("a:\n  b: x\n  c: y\n"), &[]).unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(env.get("a_b"), Some("x"));
        assert_eq!(env.get("a_c"), Some("y"));
    }

    #[test]
    fn test_list_elements_share_key() {
        let env = flatten(&parse("a: [1, 2]"), &[]).unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("a"), Some("1 2"));
    }

    #[test]
    fn test_list_of_objects_merges_per_field() {
        let env = flatten(&parse("hosts:\n  - name: a\n  - name: b\n"), &[]).unwrap();
        assert_eq!(env.get("hosts_name"), Some("a b"));
    }

    #[test]
    fn test_bool_renders_lowercase() {
        let env = flatten(&Value::Bool(true), &path(&["ok"])).unwrap();
        assert_eq!(env.get("ok"), Some("true"));
        let env = flatten(&Value::Bool(false), &path(&["ok"])).unwrap();
        assert_eq!(env.get("ok"), Some("false"));
    }

    #[test]
    fn test_numbers_render_shortest() {
        let env = flatten(&parse("3.0"), &path(&["n"])).unwrap();
        assert_eq!(env.get("n"), Some("3"));

        let env = flatten(&parse("{a: 1.5, b: 42, c: 0.0001, d: -7}"), &[]).unwrap();
        assert_eq!(env.get("a"), Some("1.5"));
        assert_eq!(env.get("b"), Some("42"));
        assert_eq!(env.get("c"), Some("0.0001"));
        assert_eq!(env.get("d"), Some("-7"));
    }

    #[test]
    fn test_json_parses_through_yaml() {
        let env = flatten(&parse(r#"{"db": {"host": "localhost", "port": 5432}}"#), &[]).unwrap();
        assert_eq!(env.get("db_host"), Some("localhost"));
        assert_eq!(env.get("db_port"), Some("5432"));
    }

    #[test]
    fn test_prefix_is_prepended() {
        let env = flatten(&parse("host: example.org"), &path(&["APP", "DB"])).unwrap();
        assert_eq!(env.get("APP_DB_host"), Some("example.org"));
    }

    #[test]
    fn test_keys_keep_document_order() {
        let env = flatten(&parse("z: 1\na: 2\nm: 3\n"), &[]).unwrap();
        let keys: Vec<&str> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_null_is_unsupported() {
        let err = flatten(&parse("a: ~"), &[]).unwrap_err();
        assert!(matches!(err, FlattenError::UnsupportedType(_)));
    }

    #[test]
    fn test_nested_error_propagates() {
        let err = flatten(&parse("a:\n  b:\n    - x\n    - ~\n"), &[]).unwrap_err();
        assert!(matches!(err, FlattenError::UnsupportedType(_)));
    }

    #[test]
    fn test_scalar_root_without_prefix_is_invalid() {
        let err = flatten(&parse("just a string"), &[]).unwrap_err();
        assert!(matches!(err, FlattenError::InvalidKey(_)));
    }

    #[test]
    fn test_non_string_keys_are_rendered() {
        let env = flatten(&parse("ports:\n  80: http\n  true: yes-please\n"), &[]).unwrap();
        assert_eq!(env.get("ports_80"), Some("http"));
        assert_eq!(env.get("ports_true"), Some("yes-please"));
    }
}
