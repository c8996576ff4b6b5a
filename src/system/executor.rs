// src/system/executor.rs

use crate::{CancellationToken, constants::OUTPUT_PREFIX_SEPARATOR, is_cancelled};
use colored::{Color, Colorize};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while spawning, waiting on, or reading from a child process.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No command specified to run.")]
    EmptyCommand,
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, #[source] io::Error),
    #[error("Command '{command}' exited with {}.", describe_exit(.code))]
    NonZeroExitStatus { command: String, code: Option<i32> },
    #[error("Command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
    #[error("Failed while waiting for command '{0}': {1}")]
    Wait(String, #[source] io::Error),
    #[error("Operation was cancelled by the user.")]
    Cancelled,
}

/// A point-in-time snapshot of the variables handed to a child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildEnv {
    /// `KEY=value` pairs set on the child.
    pub vars: Vec<(String, String)>,
    /// When `true` the child sees only `vars`, nothing inherited from `xe` itself.
    pub clear: bool,
}

impl ChildEnv {
    fn apply(&self, command: &mut Command) {
        if self.clear {
            command.env_clear();
        }
        command.envs(self.vars.iter().map(|(k, v)| (k, v)));
    }
}

/// The colored `name |` label written in front of every relayed output line.
#[derive(Debug, Clone)]
pub struct OutputPrefix {
    label: String,
}

const PREFIX_PALETTE: [Color; 6] = [
    Color::Cyan,
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::Blue,
    Color::BrightRed,
];

impl OutputPrefix {
    /// Pads `name` to `width` and colors it with the palette entry for `slot`.
    pub fn new(name: &str, width: usize, slot: usize) -> Self {
        let color = PREFIX_PALETTE
            .get(slot % PREFIX_PALETTE.len())
            .copied()
            .unwrap_or(Color::Cyan);
        let padded = format!("{:<width$} {}", name, OUTPUT_PREFIX_SEPARATOR);
        Self {
            label: padded.color(color).to_string(),
        }
    }

    fn line(&self, text: &str) -> String {
        format!("{} {}", self.label, text)
    }
}

/// Builds an invocation of the platform shell for `command_line`.
pub fn shell_command(command_line: &str) -> Result<Command, ExecutionError> {
    let trimmed = command_line.trim();
    if trimmed.is_empty() {
        return Err(ExecutionError::EmptyCommand);
    }
    let command = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(trimmed);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(trimmed);
        c
    };
    Ok(command)
}

/// Runs a command and captures its standard output.
/// Stderr is passed through to the user's terminal.
/// NOTE: This operation is blocking and is intended for short-running commands
/// (command substitution, env scripts).
pub fn capture_output(
    command_line: &str,
    cwd: &Path,
    env: &ChildEnv,
) -> Result<String, ExecutionError> {
    let trimmed_command = command_line.trim();
    let mut command = shell_command(trimmed_command)?;
    command
        .current_dir(dunce::simplified(cwd))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    env.apply(&mut command);

    log::trace!("Capturing output of '{}' in {}", trimmed_command, cwd.display());
    let command_output = command
        .output()
        .map_err(|e| ExecutionError::CommandFailed(trimmed_command.to_string(), e))?;

    if !command_output.status.success() {
        return Err(ExecutionError::NonZeroExitStatus {
            command: trimmed_command.to_string(),
            code: command_output.status.code(),
        });
    }

    String::from_utf8(command_output.stdout).map_err(|e| ExecutionError::InvalidUtf8Output {
        command: trimmed_command.to_string(),
        source: e,
    })
}

/// Spawns a command whose stdout and stderr are relayed line by line, prefixed, to
/// our stdout. Returns the child together with the relay threads, which finish once
/// the child's pipes close.
pub fn spawn_streamed(
    command_line: &str,
    cwd: &Path,
    env: &ChildEnv,
    prefix: &OutputPrefix,
) -> Result<(Child, Vec<JoinHandle<()>>), ExecutionError> {
    let trimmed_command = command_line.trim();
    let command = streamed_command(trimmed_command, cwd, env)?;
    spawn_relayed(command, trimmed_command, prefix)
}

/// Like [`spawn_streamed`], but on unix the child leads a new process group, so the
/// whole tree it forks can be stopped with [`terminate_tree`]. The group also keeps
/// terminal `Ctrl+C` away from the child; `xe` decides when it stops.
pub fn spawn_group_leader(
    command_line: &str,
    cwd: &Path,
    env: &ChildEnv,
    prefix: &OutputPrefix,
) -> Result<(Child, Vec<JoinHandle<()>>), ExecutionError> {
    let trimmed_command = command_line.trim();
    #[allow(unused_mut)]
    let mut command = streamed_command(trimmed_command, cwd, env)?;
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    spawn_relayed(command, trimmed_command, prefix)
}

fn streamed_command(
    trimmed_command: &str,
    cwd: &Path,
    env: &ChildEnv,
) -> Result<Command, ExecutionError> {
    let mut command = shell_command(trimmed_command)?;
    command
        .current_dir(dunce::simplified(cwd))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    env.apply(&mut command);
    Ok(command)
}

fn spawn_relayed(
    mut command: Command,
    trimmed_command: &str,
    prefix: &OutputPrefix,
) -> Result<(Child, Vec<JoinHandle<()>>), ExecutionError> {
    let mut child = command
        .spawn()
        .map_err(|e| ExecutionError::CommandFailed(trimmed_command.to_string(), e))?;

    let mut relays = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        relays.push(relay_lines(stdout, prefix.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        relays.push(relay_lines(stderr, prefix.clone()));
    }
    Ok((child, relays))
}

/// Stops a child spawned with [`spawn_group_leader`] together with everything it
/// forked, then reaps it.
///
/// On unix the group gets `SIGTERM` first and up to `grace` to exit; whatever is left
/// afterwards gets `SIGKILL`. Elsewhere the child is killed outright.
pub fn terminate_tree(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        let group = libc::pid_t::try_from(child.id())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        signal_group(group, libc::SIGTERM)?;

        let deadline = std::time::Instant::now() + grace;
        loop {
            // The leader is reaped first: an unreaped zombie still counts as a member.
            let leader_done = child.try_wait()?.is_some();
            if leader_done && !group_alive(group) {
                break;
            }
            if std::time::Instant::now() >= deadline {
                log::debug!("Process group {} outlived its grace period; killing it.", group);
                signal_group(group, libc::SIGKILL)?;
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        child.wait()
    }
    #[cfg(not(unix))]
    {
        let _ = grace;
        if let Err(e) = child.kill() {
            // The process may have exited on its own already.
            if e.kind() != io::ErrorKind::InvalidInput {
                return Err(e);
            }
        }
        child.wait()
    }
}

/// Sends `signal` to every process in `group`. A group that no longer exists is
/// not an error.
#[cfg(unix)]
#[allow(unsafe_code)]
fn signal_group(group: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: killpg takes no pointers; a stale group id only yields ESRCH.
    if unsafe { libc::killpg(group, signal) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn group_alive(group: libc::pid_t) -> bool {
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::killpg(group, 0) == 0 }
}

/// Runs a command to completion with prefixed output, with support for cancellation.
/// This function will not return until the command has finished, but it can be
/// interrupted by the `CancellationToken`.
pub fn run_streamed(
    command_line: &str,
    cwd: &Path,
    env: &ChildEnv,
    prefix: &OutputPrefix,
    cancellation_token: &CancellationToken,
) -> Result<(), ExecutionError> {
    if is_cancelled(cancellation_token) {
        return Err(ExecutionError::Cancelled);
    }
    let trimmed_command = command_line.trim();
    let (mut child, relays) = spawn_streamed(trimmed_command, cwd, env, prefix)?;

    // Non-blocking wait loop to allow for cancellation.
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                for relay in relays {
                    if relay.join().is_err() {
                        log::warn!("Output relay for '{}' panicked.", trimmed_command);
                    }
                }
                return check_status(trimmed_command, status);
            }
            Ok(None) => {
                if is_cancelled(cancellation_token) {
                    log::debug!(
                        "Cancellation requested, killing child process (PID: {})...",
                        child.id()
                    );
                    if let Err(e) = child.kill() {
                        log::warn!("Failed to kill child process {}: {}", child.id(), e);
                    }
                    child.wait().ok();
                    return Err(ExecutionError::Cancelled);
                }
                // Wait briefly to avoid a tight loop consuming CPU.
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(ExecutionError::Wait(trimmed_command.to_string(), e)),
        }
    }
}

/// Runs the primary command with inherited standard streams and waits for it.
///
/// The exit status is returned as-is; a non-zero exit is not an error here.
pub fn run_inherited(
    argv: &[String],
    cwd: Option<&Path>,
    env: &ChildEnv,
) -> Result<ExitStatus, ExecutionError> {
    let (program, args) = argv.split_first().ok_or(ExecutionError::EmptyCommand)?;
    let display = display_argv(argv);

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if let Some(dir) = cwd {
        command.current_dir(dunce::simplified(dir));
    }
    env.apply(&mut command);

    let mut child = command
        .spawn()
        .map_err(|e| ExecutionError::CommandFailed(display.clone(), e))?;
    child
        .wait()
        .map_err(|e| ExecutionError::Wait(display, e))
}

/// Renders an argument vector the way a user would type it in a shell.
pub fn display_argv(argv: &[String]) -> String {
    shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" "))
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by a signal)".to_string(),
    }
}

fn check_status(command: &str, status: ExitStatus) -> Result<(), ExecutionError> {
    if status.success() {
        Ok(())
    } else {
        Err(ExecutionError::NonZeroExitStatus {
            command: command.to_string(),
            code: status.code(),
        })
    }
}

fn relay_lines<R: Read + Send + 'static>(source: R, prefix: OutputPrefix) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let line = prefix.line(text.trim_end_matches(['\r', '\n']));
                    let mut stdout = io::stdout().lock();
                    if writeln!(stdout, "{}", line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::debug!("Stopped relaying output: {}", e);
                    break;
                }
            }
        }
    })
}
