// src/system/supervisor.rs

use crate::{
    constants::SERVICE_STOP_GRACE,
    system::executor::{self, ChildEnv, ExecutionError, OutputPrefix},
};
use colored::Colorize;
use std::fmt;
use std::io;
use std::path::Path;
use std::process::Child;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a [`ServiceSupervisor`].
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The service process could not be spawned.
    #[error("Service '{name}' could not be started: {source}")]
    Spawn {
        name: String,
        #[source]
        source: ExecutionError,
    },
    /// Killing or reaping the service process failed.
    #[error("Service '{name}' could not be stopped: {source}")]
    Stop {
        name: String,
        #[source]
        source: io::Error,
    },
    /// No process is registered under this name.
    #[error("No service named '{0}' is running.")]
    Unknown(String),
}

/// Starts and stops named background processes.
///
/// Starting under a name that is already registered does not replace the running
/// process: both are tracked, and `stop` stops every process with that name.
pub trait ServiceSupervisor: fmt::Debug {
    /// Starts `command` in `dir` with the given environment snapshot.
    fn start(
        &mut self,
        name: &str,
        command: &str,
        dir: &Path,
        env: &ChildEnv,
    ) -> Result<(), SupervisorError>;

    /// Stops every process registered under `name`.
    fn stop(&mut self, name: &str) -> Result<(), SupervisorError>;

    /// Names of the registered services, unique, in start order.
    fn names(&self) -> Vec<String>;

    /// Width used to align the output prefix of every service.
    fn set_output_width(&mut self, _width: usize) {}
}

#[derive(Debug)]
struct ManagedProcess {
    name: String,
    command: String,
    child: Child,
}

/// The default supervisor: each service is a child of the platform shell whose
/// output is relayed, prefixed with the service name, to our stdout.
///
/// On unix every service leads its own process group, and stopping it stops the
/// whole group, so processes forked by the service command go down with it.
#[derive(Debug)]
pub struct ProcessManager {
    processes: Vec<ManagedProcess>,
    output_width: usize,
    started: usize,
    stop_grace: Duration,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self {
            processes: Vec::new(),
            output_width: 0,
            started: 0,
            stop_grace: SERVICE_STOP_GRACE,
        }
    }
}

impl ProcessManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a service may take to exit after `SIGTERM` before it is killed.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    fn terminate(process: &mut ManagedProcess, grace: Duration) -> Result<(), SupervisorError> {
        let pid = process.child.id();
        log::debug!("Stopping service '{}' (PID: {}): {}", process.name, pid, process.command);
        match executor::terminate_tree(&mut process.child, grace) {
            Ok(status) => {
                log::debug!("Service '{}' (PID: {}) exited with {}.", process.name, pid, status);
                Ok(())
            }
            Err(source) => Err(SupervisorError::Stop {
                name: process.name.clone(),
                source,
            }),
        }
    }
}

impl ServiceSupervisor for ProcessManager {
    fn start(
        &mut self,
        name: &str,
        command: &str,
        dir: &Path,
        env: &ChildEnv,
    ) -> Result<(), SupervisorError> {
        let width = self.output_width.max(name.len());
        let prefix = OutputPrefix::new(name, width, self.started);
        let (child, _relays) = executor::spawn_group_leader(command, dir, env, &prefix).map_err(
            |source| SupervisorError::Spawn {
                name: name.to_string(),
                source,
            },
        )?;

        println!(
            "{} {} {}",
            "▲".green(),
            "Started service".green(),
            name.yellow().bold()
        );
        log::debug!(
            "Service '{}' running as PID {} in {}: {}",
            name,
            child.id(),
            dir.display(),
            command
        );

        self.started += 1;
        self.processes.push(ManagedProcess {
            name: name.to_string(),
            command: command.to_string(),
            child,
        });
        Ok(())
    }

    fn stop(&mut self, name: &str) -> Result<(), SupervisorError> {
        let (mut matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.processes)
            .into_iter()
            .partition(|p| p.name == name);
        self.processes = rest;

        if matching.is_empty() {
            return Err(SupervisorError::Unknown(name.to_string()));
        }

        println!("{} {} {}", "▼".red(), "Stopping service".red(), name.yellow().bold());
        let mut first_error = None;
        for process in &mut matching {
            if let Err(e) = Self::terminate(process, self.stop_grace) {
                log::warn!("{}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for process in &self.processes {
            if !names.contains(&process.name) {
                names.push(process.name.clone());
            }
        }
        names
    }

    fn set_output_width(&mut self, width: usize) {
        self.output_width = width;
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        for process in &mut self.processes {
            log::warn!(
                "Service '{}' was still running at shutdown; killing it.",
                process.name
            );
            if let Err(e) = Self::terminate(process, self.stop_grace) {
                log::warn!("{}", e);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::tempdir;

    fn pids(manager: &ProcessManager, name: &str) -> Vec<u32> {
        manager
            .processes
            .iter()
            .filter(|p| p.name == name)
            .map(|p| p.child.id())
            .collect()
    }

    /// Waits for a service to write the PID of a process it forked.
    #[cfg(target_os = "linux")]
    fn read_pid_file(path: &Path) -> u32 {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(content) = std::fs::read_to_string(path) {
                if let Ok(pid) = content.trim().parse() {
                    return pid;
                }
            }
            assert!(Instant::now() < deadline, "no pid written to {}", path.display());
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    /// A zombie waiting to be reaped by init counts as gone.
    #[cfg(target_os = "linux")]
    fn process_running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z" && state != "X"),
            Err(_) => false,
        }
    }

    #[test]
    fn test_start_and_stop_service() {
        let mut manager = ProcessManager::new();
        manager
            .start("sleeper", "sleep 30", Path::new("."), &ChildEnv::default())
            .unwrap();
        assert_eq!(manager.names(), vec!["sleeper".to_string()]);
        assert_eq!(pids(&manager, "sleeper").len(), 1);

        manager.stop("sleeper").unwrap();
        assert!(manager.names().is_empty());
    }

    #[test]
    fn test_restart_under_same_name_is_not_deduplicated() {
        let mut manager = ProcessManager::new();
        let env = ChildEnv::default();
        manager.start("db", "sleep 30", Path::new("."), &env).unwrap();
        manager.start("db", "sleep 30", Path::new("."), &env).unwrap();

        assert_eq!(manager.names(), vec!["db".to_string()]);
        assert_eq!(pids(&manager, "db").len(), 2);

        manager.stop("db").unwrap();
        assert!(pids(&manager, "db").is_empty());
    }

    #[test]
    fn test_stop_unknown_service() {
        let mut manager = ProcessManager::new();
        assert!(matches!(
            manager.stop("ghost"),
            Err(SupervisorError::Unknown(name)) if name == "ghost"
        ));
    }

    #[test]
    fn test_stop_already_exited_service() {
        let mut manager = ProcessManager::new();
        manager
            .start("quick", "true", Path::new("."), &ChildEnv::default())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));
        assert!(manager.stop("quick").is_ok());
    }

    #[test]
    fn test_start_in_missing_directory_fails() {
        let mut manager = ProcessManager::new();
        let result = manager.start(
            "nowhere",
            "true",
            Path::new("/definitely/not/a/real/dir"),
            &ChildEnv::default(),
        );
        assert!(matches!(result, Err(SupervisorError::Spawn { .. })));
        assert!(manager.names().is_empty());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_stop_takes_down_forked_processes() {
        let dir = tempdir().unwrap();
        let mut manager = ProcessManager::new().with_stop_grace(Duration::from_secs(2));
        manager
            .start(
                "db",
                "sleep 300 & echo $! > forked.pid; wait",
                dir.path(),
                &ChildEnv::default(),
            )
            .unwrap();
        let forked = read_pid_file(&dir.path().join("forked.pid"));
        assert!(process_running(forked));

        manager.stop("db").unwrap();
        assert!(!process_running(forked), "forked process {} outlived its service", forked);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_stop_kills_service_ignoring_sigterm() {
        let dir = tempdir().unwrap();
        let mut manager = ProcessManager::new().with_stop_grace(Duration::from_millis(300));
        manager
            .start(
                "stubborn",
                "trap '' TERM; sleep 300 & echo $! > forked.pid; wait",
                dir.path(),
                &ChildEnv::default(),
            )
            .unwrap();
        let forked = read_pid_file(&dir.path().join("forked.pid"));

        let started = Instant::now();
        manager.stop("stubborn").unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!process_running(forked));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_drop_stops_leftover_service_tree() {
        let dir = tempdir().unwrap();
        let mut manager = ProcessManager::new().with_stop_grace(Duration::from_secs(2));
        manager
            .start(
                "leftover",
                "sleep 300 & echo $! > forked.pid; wait",
                dir.path(),
                &ChildEnv::default(),
            )
            .unwrap();
        let forked = read_pid_file(&dir.path().join("forked.pid"));

        drop(manager);
        assert!(!process_running(forked));
    }
}
