//! # Config Loader
//!
//! Reads `xe.yml` (YAML or JSON) into the ordered list of [`Directive`]s the
//! environment applies. The document is a sequence of single-key mappings:
//!
//! ```yaml
//! - env:
//!     DB_HOST: localhost
//! - service:
//!     name: db
//!     cmd: postgres -D data
//! - task:
//!     name: migrate
//!     cmd: ./manage.py migrate
//! - post:
//!     - task: { name: dump, cmd: ./dump.sh }
//! ```
use crate::{
    core::flatten,
    models::{Directive, EnvMap, RawDirective},
};
use serde_yaml::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Represents errors that can occur while loading the config document.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    /// The file is missing or unreadable.
    #[error("Could not read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The YAML/JSON content is invalid or does not have the expected shape.
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    /// A list entry has none of `service`, `env`, `envscript`, `task` or `post`.
    #[error("Entry #{index} of '{path}' does not define a directive.")]
    EmptyDirective { path: PathBuf, index: usize },
    /// An `env` value is a list or a mapping instead of a scalar.
    #[error("Entry #{index} of '{path}': value of env '{key}' must be a scalar.")]
    InvalidEnvValue {
        path: PathBuf,
        index: usize,
        key: String,
    },
}

/// Loads the directives from the document at `path`.
pub fn load_directives(path: &Path) -> Result<Vec<Directive>, ConfigLoadError> {
    log::debug!("Loading config from {}", path.display());
    let content = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_directives(&content, path)
}

/// Parses a document already in memory. `origin` is only used in error messages.
pub fn parse_directives(content: &str, origin: &Path) -> Result<Vec<Directive>, ConfigLoadError> {
    if content.trim().is_empty() {
        log::warn!("Config file '{}' is empty.", origin.display());
        return Ok(Vec::new());
    }
    let raw: Option<Vec<RawDirective>> =
        serde_yaml::from_str(content).map_err(|source| ConfigLoadError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

    raw.unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(index, raw)| convert(raw, origin, index))
        .collect()
}

/// Picks the directive out of a raw entry. When several fields are populated the
/// first in the order service, env, envscript, task, post wins.
fn convert(raw: RawDirective, origin: &Path, index: usize) -> Result<Directive, ConfigLoadError> {
    let fields = raw.populated_fields();
    if fields.len() > 1 {
        log::warn!(
            "Entry #{} of '{}' defines several directives ({}); only '{}' is used.",
            index,
            origin.display(),
            fields.join(", "),
            fields.first().copied().unwrap_or_default()
        );
    }

    let RawDirective {
        service,
        env,
        envscript,
        task,
        post,
    } = raw;

    if let Some(service) = service {
        return Ok(Directive::Service(service));
    }
    if let Some(env) = env {
        return convert_env(env, origin, index).map(Directive::Env);
    }
    if let Some(cmd) = envscript.filter(|cmd| !cmd.is_empty()) {
        return Ok(Directive::EnvScript(cmd));
    }
    if let Some(task) = task {
        return Ok(Directive::Task(task));
    }
    if let Some(post) = post {
        let directives = post
            .into_iter()
            .map(|raw| convert(raw, origin, index))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Directive::Post(directives));
    }

    Err(ConfigLoadError::EmptyDirective {
        path: origin.to_path_buf(),
        index,
    })
}

/// Keeps document order. Scalars are rendered the way the flattener renders them;
/// an empty value (`KEY:`) becomes an empty string.
fn convert_env(
    mapping: serde_yaml::Mapping,
    origin: &Path,
    index: usize,
) -> Result<EnvMap, ConfigLoadError> {
    let mut pairs = EnvMap::with_capacity(mapping.len());
    for (key, value) in mapping {
        let invalid = |key: String| ConfigLoadError::InvalidEnvValue {
            path: origin.to_path_buf(),
            index,
            key,
        };
        let key = flatten::scalar_to_string(&key).ok_or_else(|| invalid(format!("{:?}", key)))?;
        let value = match value {
            Value::Null => String::new(),
            other => flatten::scalar_to_string(&other).ok_or_else(|| invalid(key.clone()))?,
        };
        pairs.push((key, value));
    }
    Ok(pairs)
}
