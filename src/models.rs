// src/models.rs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// --- ENGINE MODELS ---
// These are what the environment engine consumes. They are built from the raw
// document models below by `core::config_loader`.

/// A long-running process supervised for the lifetime of the invocation.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ServiceDef {
    /// The name the supervisor registers the process under.
    pub name: String,
    /// The command line, run through the platform shell.
    #[serde(alias = "command")]
    pub cmd: String,
    /// Working directory. Relative paths are taken from the config directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// A one-shot command run to completion before the next directive.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TaskDef {
    /// Used to prefix every line of output.
    pub name: String,
    #[serde(alias = "command")]
    /// The command line, run through the platform shell.
    pub cmd: String,
    /// Working directory. Relative paths are taken from the config directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Ordered `name -> raw value` assignments. Document order is kept so later
/// entries can reference earlier ones.
pub type EnvMap = Vec<(String, String)>;

/// One declarative instruction of the config document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Start a supervised background process.
    Service(ServiceDef),
    /// Set (and expand) variables.
    Env(EnvMap),
    /// Run a command and load its YAML/JSON output as variables.
    EnvScript(String),
    /// Run a command to completion.
    Task(TaskDef),
    /// Directives deferred until teardown.
    Post(Vec<Directive>),
}

impl Directive {
    /// Convenience constructor for an `Env` directive.
    pub fn env<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Env(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Short, lowercase name of the variant, as written in the config document.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Service(_) => "service",
            Self::Env(_) => "env",
            Self::EnvScript(_) => "envscript",
            Self::Task(_) => "task",
            Self::Post(_) => "post",
        }
    }

    /// The name used to prefix process output, for services and tasks.
    pub fn output_name(&self) -> Option<&str> {
        match self {
            Self::Service(s) => Some(&s.name),
            Self::Task(t) => Some(&t.name),
            _ => None,
        }
    }
}

// --- `xe.yml` MODELS (What is read from the configuration file) ---

/// The deserialized shape of one list entry of `xe.yml`.
///
/// Each entry is expected to populate exactly one field. When several are set, the
/// first one in the order `service`, `env`, `envscript`, `task`, `post` wins.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct RawDirective {
    #[serde(default)]
    pub service: Option<ServiceDef>,
    /// Kept as a raw mapping so document order and scalar values survive.
    #[serde(default)]
    pub env: Option<serde_yaml::Mapping>,
    #[serde(default, alias = "env_script")]
    pub envscript: Option<String>,
    #[serde(default)]
    pub task: Option<TaskDef>,
    #[serde(default)]
    pub post: Option<Vec<RawDirective>>,
}

impl RawDirective {
    /// Names of every populated field, in priority order.
    pub fn populated_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.service.is_some() {
            fields.push("service");
        }
        if self.env.is_some() {
            fields.push("env");
        }
        if self.envscript.as_deref().is_some_and(|s| !s.is_empty()) {
            fields.push("envscript");
        }
        if self.task.is_some() {
            fields.push("task");
        }
        if self.post.is_some() {
            fields.push("post");
        }
        fields
    }
}
