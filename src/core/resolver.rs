// src/core/resolver.rs

//! # Variable Resolver
//!
//! Resolves a raw value in two explicit phases:
//!
//! 1. **Expansion**: `${NAME}` and `$NAME` are replaced with the current value of `NAME`
//!    in the store. Unknown names expand to an empty string.
//! 2. **Substitution**: if the expanded value is wrapped in backticks (`` `cmd` ``), the
//!    inner command is run through the platform shell and its trimmed stdout becomes the
//!    value.

use crate::{
    core::store::KvStore,
    system::executor::{self, ExecutionError},
};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

lazy_static! {
    // The whole value, surrounding whitespace aside, wrapped in a pair of backticks.
    static ref SUBSTITUTION_RE: Result<Regex, regex::Error> =
        Regex::new(r"(?s)\A\s*`(.*)`\s*\z");
}

/// Expands `${NAME}` / `$NAME` references against `store`.
pub fn expand(raw: &str, store: &KvStore) -> String {
    shellexpand::env_with_context_no_errors(raw, |name: &str| Some(store.lookup(name)))
        .into_owned()
}

/// Returns the command inside a `` `...` `` substitution marker, if `value` is one.
pub fn substitution_command(value: &str) -> Option<&str> {
    let pattern = match SUBSTITUTION_RE.as_ref() {
        Ok(pattern) => pattern,
        Err(e) => {
            log::error!("Substitution pattern failed to compile: {}", e);
            return None;
        }
    };
    pattern
        .captures(value)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
        .filter(|cmd| !cmd.trim().is_empty())
}

/// Resolves raw values against a store, running substitutions in `working_dir`.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    store: &'a KvStore,
    working_dir: &'a Path,
    clean_env: bool,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver over the store as it is right now.
    ///
    /// `clean_env` controls whether substitution commands inherit `xe`'s own
    /// environment underneath the store's variables.
    pub fn new(store: &'a KvStore, working_dir: &'a Path, clean_env: bool) -> Self {
        Self {
            store,
            working_dir,
            clean_env,
        }
    }

    /// Phase 1 only.
    pub fn expand(&self, raw: &str) -> String {
        expand(raw, self.store)
    }

    /// Both phases: expand, then run the value as a command if it is a substitution.
    pub fn resolve(&self, raw: &str) -> Result<String, ExecutionError> {
        let expanded = self.expand(raw);
        let Some(command) = substitution_command(&expanded) else {
            return Ok(expanded);
        };

        log::debug!("Executing for substitution: '{}'", command);
        let output = executor::capture_output(
            command,
            self.working_dir,
            &self.store.to_child_env(self.clean_env),
        )?;

        // Clean up the output by trimming trailing whitespace and newlines.
        Ok(output.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(pairs: &[(&str, &str)]) -> KvStore {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_expand_braced_and_bare() {
        let s = store(&[("A", "1"), ("HOST", "db")]);
        assert_eq!(expand("${A}2", &s), "12");
        assert_eq!(expand("postgres://$HOST/app", &s), "postgres://db/app");
    }

    #[test]
    fn test_expand_unknown_is_empty() {
        let s = KvStore::new();
        assert_eq!(expand("${A}2", &s), "2");
        assert_eq!(expand("x-${NOPE}-y", &s), "x--y");
    }

    #[test]
    fn test_expand_plain_text_is_untouched() {
        let s = KvStore::new();
        assert_eq!(expand("no references here", &s), "no references here");
    }

    #[test]
    fn test_substitution_pattern_compiles() {
        assert!(SUBSTITUTION_RE.is_ok());
    }

    #[test]
    fn test_substitution_marker() {
        assert_eq!(substitution_command("`date`"), Some("date"));
        assert_eq!(substitution_command("  `git rev-parse HEAD`\n"), Some("git rev-parse HEAD"));
        assert_eq!(substitution_command("date"), None);
        assert_eq!(substitution_command("a `b` c"), None);
        assert_eq!(substitution_command("``"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_runs_substitution_with_store_env() {
        let s = store(&[("BAR", "hello")]);
        let resolver = Resolver::new(&s, Path::new("."), false);
        assert_eq!(resolver.resolve("`echo $BAR`").unwrap(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_expands_before_substituting() {
        let s = store(&[("WORD", "expanded")]);
        let resolver = Resolver::new(&s, Path::new("."), false);
        // Expansion happens in xe, before the shell ever sees the command.
        assert_eq!(resolver.resolve("`echo '${WORD}'`").unwrap(), "expanded");
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_trims_trailing_newlines() {
        let s = KvStore::new();
        let resolver = Resolver::new(&s, Path::new("."), false);
        assert_eq!(resolver.resolve("`printf 'v\\n\\n'`").unwrap(), "v");
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_failing_substitution() {
        let s = KvStore::new();
        let resolver = Resolver::new(&s, Path::new("."), false);
        let err = resolver.resolve("`exit 1`").unwrap_err();
        assert!(matches!(err, ExecutionError::NonZeroExitStatus { .. }));
    }

    #[test]
    fn test_resolve_without_marker_does_not_execute() {
        let s = store(&[("A", "1")]);
        let resolver = Resolver::new(&s, Path::new("/definitely/not/a/real/dir"), false);
        assert_eq!(resolver.resolve("value-$A").unwrap(), "value-1");
    }
}
