// src/cli.rs

use crate::{
    constants::{DEFAULT_CONFIG_FILENAME, SERVICE_STOP_GRACE},
    core::environment::{EnvironmentOptions, HandlerMode},
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// xe: Start and monitor processes creating an executable environment.
///
/// `xe` reads an ordered list of directives from its config file, builds the
/// environment they describe (variables, background services, setup tasks), runs
/// COMMAND inside it and tears everything down once COMMAND exits, whatever its
/// exit status.
///
/// Example:
///   xe -c dev/xe.yml -- cargo test
#[derive(Parser, Debug)]
#[command(name = "xe", author, version, about, long_about)]
pub struct Cli {
    /// Path to the xe config file. Services and tasks run relative to its directory.
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILENAME)]
    pub config: PathBuf,

    /// Only compute the data and print it out. Services, tasks and post steps are
    /// skipped; COMMAND, if given, still runs with the computed variables.
    #[arg(short, long)]
    pub data: bool,

    /// With `--data`, print the variables as a JSON object instead of KEY=value lines.
    #[arg(long, requires = "data")]
    pub json: bool,

    /// Hand children only the variables xe resolved, not xe's own environment.
    #[arg(long)]
    pub clean_env: bool,

    /// Seconds a stopped service may take to exit after SIGTERM before it is killed.
    #[arg(long, value_name = "SECONDS", default_value_t = SERVICE_STOP_GRACE.as_secs())]
    pub stop_grace: u64,

    /// The command to run inside the environment, with its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// The directory holding the config file, used as the default working directory
    /// of services and tasks.
    pub fn root_dir(&self) -> PathBuf {
        config_root(&self.config)
    }

    /// Grace period handed to the service supervisor.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace)
    }

    /// Engine options selected on the command line.
    pub fn options(&self) -> EnvironmentOptions {
        EnvironmentOptions {
            mode: if self.data {
                HandlerMode::DataOnly
            } else {
                HandlerMode::Full
            },
            clean_env: self.clean_env,
        }
    }
}

/// The canonical parent directory of `config`, or `.` when it has none.
pub fn config_root(config: &Path) -> PathBuf {
    let parent = match config.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    dunce::canonicalize(parent).unwrap_or_else(|e| {
        log::debug!("Could not canonicalize '{}': {}", parent.display(), e);
        parent.to_path_buf()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["xe", "echo", "hi"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("xe.yml"));
        assert!(!cli.data);
        assert_eq!(cli.command, vec!["echo".to_string(), "hi".to_string()]);
        assert_eq!(cli.options().mode, HandlerMode::Full);
        assert_eq!(cli.stop_grace(), SERVICE_STOP_GRACE);
    }

    #[test]
    fn test_stop_grace_flag() {
        let cli = Cli::try_parse_from(["xe", "--stop-grace", "1", "make", "test"]).unwrap();
        assert_eq!(cli.stop_grace(), Duration::from_secs(1));
        assert_eq!(cli.command, vec!["make".to_string(), "test".to_string()]);
    }

    #[test]
    fn test_command_flags_are_not_ours() {
        let cli = Cli::try_parse_from(["xe", "-c", "dev/xe.yml", "ls", "-la", "--color"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("dev/xe.yml"));
        assert_eq!(
            cli.command,
            vec!["ls".to_string(), "-la".to_string(), "--color".to_string()]
        );
    }

    #[test]
    fn test_data_mode() {
        let cli = Cli::try_parse_from(["xe", "--data", "--json"]).unwrap();
        assert_eq!(cli.options().mode, HandlerMode::DataOnly);
        assert!(cli.json);
        assert!(cli.command.is_empty());
    }

    #[test]
    fn test_json_requires_data() {
        assert!(Cli::try_parse_from(["xe", "--json", "true"]).is_err());
    }

    #[test]
    fn test_config_root() {
        let dir = tempdir().unwrap();
        let config = dir.path().join("xe.yml");
        assert_eq!(
            config_root(&config),
            dunce::canonicalize(dir.path()).unwrap()
        );
        assert_eq!(
            config_root(Path::new("xe.yml")),
            dunce::canonicalize(".").unwrap()
        );
    }
}
