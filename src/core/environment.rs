//! # Environment
//!
//! The orchestrating object of `xe`. An [`Environment`] owns the resolved variables,
//! the handle to the service supervisor and the queue of deferred post directives.
//!
//! Its lifecycle mirrors one invocation:
//!
//! 1. [`Environment::pre`] applies every directive in declaration order. The first
//!    failure stops the sequence; nothing already applied is rolled back.
//! 2. [`Environment::launch`] runs the primary command with the resolved variables.
//! 3. [`Environment::post`] stops every service and applies the queued post directives.
//!    It must run no matter how steps 1 and 2 ended, and it keeps going past individual
//!    failures so that one stubborn service cannot keep the others alive.

use crate::{
    CancellationToken,
    core::{
        resolver::{self, Resolver},
        script::{Script, ScriptError},
        store::KvStore,
        task_runner::Task,
    },
    is_cancelled,
    models::Directive,
    new_cancellation_token,
    system::{
        executor::{self, ChildEnv, ExecutionError},
        supervisor::{ServiceSupervisor, SupervisorError},
    },
};
use colored::*;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::Ordering;
use thiserror::Error;

/// Errors surfaced by the environment lifecycle.
#[derive(Error, Debug)]
pub enum EnvironmentError {
    /// A command substitution in a variable's value failed.
    #[error("Could not resolve the value of '{key}': {source}")]
    Execution {
        key: String,
        #[source]
        source: ExecutionError,
    },
    /// An env script failed.
    #[error(transparent)]
    Script(#[from] ScriptError),
    /// The supervisor refused or failed to spawn a service.
    #[error("Failed to start service '{name}': {source}")]
    ServiceStart {
        name: String,
        #[source]
        source: SupervisorError,
    },
    /// A service could not be stopped during teardown.
    #[error("Failed to stop service '{name}': {source}")]
    ServiceStop {
        name: String,
        #[source]
        source: SupervisorError,
    },
    /// A task could not be spawned or exited with a non-zero status.
    #[error("Task '{name}' failed: {source}")]
    Task {
        name: String,
        #[source]
        source: ExecutionError,
    },
    /// The primary command could not be started or waited on.
    #[error("Could not run '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: ExecutionError,
    },
    /// Every error collected while tearing the environment down.
    #[error("Teardown finished with {} error(s):\n{}", .0.len(), describe_all(.0))]
    Teardown(Vec<EnvironmentError>),
    /// `Ctrl+C` was pressed before the step completed.
    #[error("Interrupted by the user.")]
    Cancelled,
}

fn describe_all(errors: &[EnvironmentError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Which directives a handler acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerMode {
    /// Every directive takes effect.
    #[default]
    Full,
    /// Only `env` and `envscript` take effect; processes are never started.
    DataOnly,
}

/// Runtime configuration of an [`Environment`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentOptions {
    /// Handler used by [`Environment::pre`].
    pub mode: HandlerMode,
    /// Children receive only the resolved variables, nothing inherited from `xe`.
    pub clean_env: bool,
}

/// The executable environment state.
#[derive(Debug)]
pub struct Environment {
    store: KvStore,
    services: Box<dyn ServiceSupervisor>,
    post: Vec<Directive>,
    root_dir: PathBuf,
    options: EnvironmentOptions,
    prefix_width: usize,
    cancellation_token: CancellationToken,
}

impl Environment {
    /// Creates an environment rooted at `root_dir` (the directory of the config file)
    /// whose services are run by `services`, usually a
    /// [`ProcessManager`](crate::system::supervisor::ProcessManager).
    pub fn with_supervisor(
        root_dir: impl Into<PathBuf>,
        services: Box<dyn ServiceSupervisor>,
    ) -> Self {
        Self {
            store: KvStore::new(),
            services,
            post: Vec::new(),
            root_dir: root_dir.into(),
            options: EnvironmentOptions::default(),
            prefix_width: 0,
            cancellation_token: new_cancellation_token(),
        }
    }

    /// Replaces the default options (full mode, inherited environment).
    pub fn with_options(mut self, options: EnvironmentOptions) -> Self {
        self.options = options;
        self
    }

    /// Shares the token set by the `Ctrl+C` listener.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// The variables resolved so far.
    pub fn store(&self) -> &KvStore {
        &self.store
    }

    /// Default working directory of services, tasks and env scripts.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// The options this environment was built with.
    pub fn options(&self) -> EnvironmentOptions {
        self.options
    }

    /// Directives waiting for [`Environment::post`].
    pub fn pending_post(&self) -> &[Directive] {
        &self.post
    }

    /// Names of the services currently known to the supervisor.
    pub fn service_names(&self) -> Vec<String> {
        self.services.names()
    }

    /// Snapshot of the resolved variables for a child process.
    pub fn child_env(&self) -> ChildEnv {
        self.store.to_child_env(self.options.clean_env)
    }

    // --- Lifecycle ---

    /// Runs the defined steps before the primary command.
    pub fn pre(&mut self, directives: &[Directive]) -> Result<(), EnvironmentError> {
        self.prefix_width = self.prefix_width.max(longest_output_name(directives));
        self.services.set_output_width(self.prefix_width);

        for (position, directive) in directives.iter().enumerate() {
            if is_cancelled(&self.cancellation_token) {
                return Err(EnvironmentError::Cancelled);
            }
            log::debug!("Applying directive #{} ({})", position, directive.kind());
            self.apply(directive)?;
        }
        Ok(())
    }

    /// Runs the primary command with the resolved variables and waits for it.
    ///
    /// A non-zero exit is reported through the returned status, not as an error.
    pub fn launch(&self, argv: &[String]) -> Result<ExitStatus, EnvironmentError> {
        let command = executor::display_argv(argv);
        log::debug!("Launching primary command: {}", command);
        executor::run_inherited(argv, None, &self.child_env())
            .map_err(|source| EnvironmentError::Launch { command, source })
    }

    /// Runs the defined steps after the primary command, no matter how it exited.
    ///
    /// Every service is stopped, then every queued post directive is applied with the
    /// full handler. Failures are collected, not fatal: the whole teardown is attempted
    /// and the collected errors are returned together.
    pub fn post(&mut self) -> Result<(), EnvironmentError> {
        // An interrupt during setup or the primary command must not skip teardown.
        self.cancellation_token.store(false, Ordering::SeqCst);
        log::debug!("Post queue: {:?}", self.post);

        let mut errors = self.stop_all();
        while !self.post.is_empty() {
            let queued = std::mem::take(&mut self.post);
            for directive in &queued {
                if let Err(e) = self.handle_full(directive) {
                    log::warn!("Post directive ({}) failed: {}", directive.kind(), e);
                    errors.push(e);
                }
            }
        }
        // Post directives may have started services of their own.
        errors.extend(self.stop_all());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EnvironmentError::Teardown(errors))
        }
    }

    /// Applies `directives`, runs `body` if that worked, then tears the environment
    /// down whatever happened, a panic in `pre` or `body` included.
    ///
    /// When both the run and the teardown fail, the run's error is returned and the
    /// teardown error is printed.
    pub fn session<T, E>(
        &mut self,
        directives: &[Directive],
        body: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<EnvironmentError>,
    {
        // Normal exits tear down explicitly below; the guard only covers unwinding.
        let mut env = scopeguard::guard_on_unwind(self, |env| {
            if let Err(e) = env.post() {
                eprintln!("{}: {}", "Teardown error".red().bold(), e);
            }
        });

        let outcome = match env.pre(directives) {
            Ok(()) => body(&mut **env),
            Err(e) => Err(e.into()),
        };
        let teardown = env.post();

        match (outcome, teardown) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(teardown_err)) => Err(teardown_err.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_err)) => {
                eprintln!("{}: {}", "Teardown error".red().bold(), teardown_err);
                Err(e)
            }
        }
    }

    // --- Directive handlers ---

    /// Applies one directive with the configured handler mode.
    pub fn apply(&mut self, directive: &Directive) -> Result<(), EnvironmentError> {
        match self.options.mode {
            HandlerMode::Full => self.handle_full(directive),
            HandlerMode::DataOnly => self.handle_data(directive),
        }
    }

    /// Applies one directive with all its side effects.
    pub fn handle_full(&mut self, directive: &Directive) -> Result<(), EnvironmentError> {
        match directive {
            Directive::Service(service) => {
                let dir = self.resolve_dir(service.dir.as_deref());
                self.start_service(&service.name, &service.cmd, &dir)
            }
            Directive::Env(_) | Directive::EnvScript(_) => self.handle_data(directive),
            Directive::Task(task) => self.run_task(&task.name, &task.cmd, task.dir.as_deref()),
            Directive::Post(directives) => {
                log::debug!("Queueing {} post directive(s).", directives.len());
                self.post.extend(directives.iter().cloned());
                Ok(())
            }
        }
    }

    /// Only responds to directives that update the data. This is used to preview a
    /// configuration without starting anything.
    pub fn handle_data(&mut self, directive: &Directive) -> Result<(), EnvironmentError> {
        match directive {
            Directive::Env(pairs) => {
                for (key, raw) in pairs {
                    self.set_env(key, raw)?;
                }
                Ok(())
            }
            Directive::EnvScript(cmd) => self.set_env_from_script(cmd),
            other => {
                log::debug!("Data-only mode: skipping {} directive.", other.kind());
                Ok(())
            }
        }
    }

    // --- Operations ---

    /// Resolves `raw` against the current variables and stores it under `key`.
    pub fn set_env(&mut self, key: &str, raw: &str) -> Result<(), EnvironmentError> {
        let value = Resolver::new(&self.store, &self.root_dir, self.options.clean_env)
            .resolve(raw)
            .map_err(|source| EnvironmentError::Execution {
                key: key.to_string(),
                source,
            })?;
        self.store.set(key, value);
        Ok(())
    }

    /// Runs a script that outputs YAML or JSON, flattens the output and adds it to
    /// the environment. Values may reference variables set before them.
    pub fn set_env_from_script(&mut self, cmd: &str) -> Result<(), EnvironmentError> {
        let script = Script {
            cmd: cmd.to_string(),
            dir: self.root_dir.clone(),
            env: self.child_env(),
        };
        let env = script.load()?;

        for (key, value) in env.into_pairs() {
            let expanded = resolver::expand(&value, &self.store);
            self.set_env(&key, &expanded)?;
        }
        Ok(())
    }

    /// Starts a service with the supervisor, handing it the current variables.
    pub fn start_service(
        &mut self,
        name: &str,
        command: &str,
        dir: &Path,
    ) -> Result<(), EnvironmentError> {
        let env = self.child_env();
        self.services
            .start(name, command, dir, &env)
            .map_err(|source| EnvironmentError::ServiceStart {
                name: name.to_string(),
                source,
            })
    }

    /// Runs a task to completion. The output is sent to stdout and is prefixed by the
    /// name of the task.
    pub fn run_task(
        &mut self,
        name: &str,
        command: &str,
        dir: Option<&Path>,
    ) -> Result<(), EnvironmentError> {
        let task = Task {
            name: name.to_string(),
            cmd: command.to_string(),
            dir: self.resolve_dir(dir),
            env: self.child_env(),
            prefix_width: self.prefix_width,
        };
        task.run(&self.cancellation_token).map_err(|source| match source {
            ExecutionError::Cancelled => EnvironmentError::Cancelled,
            source => EnvironmentError::Task {
                name: name.to_string(),
                source,
            },
        })
    }

    /// Stops every service known to the supervisor, attempting all of them.
    pub fn stop_services(&mut self) -> Result<(), EnvironmentError> {
        let errors = self.stop_all();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(EnvironmentError::Teardown(errors))
        }
    }

    fn stop_all(&mut self) -> Vec<EnvironmentError> {
        let mut errors = Vec::new();
        for name in self.services.names() {
            if let Err(source) = self.services.stop(&name) {
                log::warn!("Could not stop service '{}': {}", name, source);
                errors.push(EnvironmentError::ServiceStop { name, source });
            }
        }
        errors
    }

    /// Missing dirs default to the root dir; relative dirs are taken from it.
    fn resolve_dir(&self, dir: Option<&Path>) -> PathBuf {
        match dir {
            Some(d) if d.as_os_str().is_empty() => self.root_dir.clone(),
            Some(d) if d.is_absolute() => d.to_path_buf(),
            Some(d) => self.root_dir.join(d),
            None => self.root_dir.clone(),
        }
    }
}

/// Length of the longest service or task name, post directives included.
fn longest_output_name(directives: &[Directive]) -> usize {
    directives
        .iter()
        .map(|d| match d {
            Directive::Post(inner) => longest_output_name(inner),
            other => other.output_name().map_or(0, str::len),
        })
        .max()
        .unwrap_or(0)
}
