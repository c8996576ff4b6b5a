//! # Script Loader
//!
//! Runs a command that prints YAML or JSON and flattens what it printed.

use crate::{
    core::flatten::{self, FlatEnv, FlattenError},
    system::executor::{self, ChildEnv, ExecutionError},
};
use serde_yaml::Value;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading variables from a script.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// The script could not be launched, exited non-zero or printed non-UTF-8 output.
    #[error("Env script '{command}' failed: {source}")]
    Execution {
        command: String,
        #[source]
        source: ExecutionError,
    },
    /// The output is neither YAML nor JSON.
    #[error("Output of env script '{command}' is not valid YAML or JSON: {source}")]
    Parse {
        command: String,
        #[source]
        source: serde_yaml::Error,
    },
    /// The output parsed but could not be flattened into variables.
    #[error("Output of env script '{command}' could not be flattened: {source}")]
    Flatten {
        command: String,
        #[source]
        source: FlattenError,
    },
}

/// A command whose standard output describes variables.
#[derive(Debug, Clone)]
pub struct Script {
    /// Command line, run through the platform shell.
    pub cmd: String,
    /// Working directory of the script.
    pub dir: PathBuf,
    /// Environment snapshot handed to the script.
    pub env: ChildEnv,
}

impl Script {
    /// Runs the script and flattens its output. Blocks until the script exits.
    ///
    /// Empty output yields no variables.
    pub fn load(&self) -> Result<FlatEnv, ScriptError> {
        log::debug!("Loading env script '{}' in {}", self.cmd, self.dir.display());
        let output = executor::capture_output(&self.cmd, &self.dir, &self.env).map_err(|source| {
            ScriptError::Execution {
                command: self.cmd.clone(),
                source,
            }
        })?;
        if output.trim().is_empty() {
            log::debug!("Env script '{}' printed no data.", self.cmd);
            return Ok(FlatEnv::new());
        }

        let document: Value =
            serde_yaml::from_str(&output).map_err(|source| ScriptError::Parse {
                command: self.cmd.clone(),
                source,
            })?;
        if document.is_null() {
            return Ok(FlatEnv::new());
        }

        let env = flatten::flatten(&document, &[]).map_err(|source| ScriptError::Flatten {
            command: self.cmd.clone(),
            source,
        })?;
        log::trace!("Env script '{}' produced {} variable(s).", self.cmd, env.len());
        Ok(env)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn script(cmd: &str) -> Script {
        Script {
            cmd: cmd.to_string(),
            dir: PathBuf::from("."),
            env: ChildEnv::default(),
        }
    }

    #[test]
    fn test_load_yaml_output() {
        let env = script("echo 'FOO: bar'").load().unwrap();
        assert_eq!(env.get("FOO"), Some("bar"));
    }

    #[test]
    fn test_load_json_output() {
        let env = script(r#"echo '{"db": {"port": 5432}, "debug": true}'"#)
            .load()
            .unwrap();
        assert_eq!(env.get("db_port"), Some("5432"));
        assert_eq!(env.get("debug"), Some("true"));
    }

    #[test]
    fn test_script_sees_env() {
        let mut s = script("echo \"GREETING: $NAME\"");
        s.env = ChildEnv {
            vars: vec![("NAME".to_string(), "world".to_string())],
            clear: false,
        };
        assert_eq!(s.load().unwrap().get("GREETING"), Some("world"));
    }

    #[test]
    fn test_empty_output_is_empty() {
        assert!(script("true").load().unwrap().is_empty());
    }

    #[test]
    fn test_non_zero_exit() {
        let err = script("echo 'A: b'; exit 2").load().unwrap_err();
        assert!(matches!(err, ScriptError::Execution { .. }));
    }

    #[test]
    fn test_unparseable_output() {
        let err = script("echo 'a: [unclosed'").load().unwrap_err();
        assert!(matches!(err, ScriptError::Parse { .. }));
    }

    #[test]
    fn test_unflattenable_output() {
        let err = script("echo 'plain scalar'").load().unwrap_err();
        assert!(matches!(err, ScriptError::Flatten { .. }));
    }
}
