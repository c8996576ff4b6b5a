//! # Task Runner
//!
//! Runs one-shot setup commands to completion, relaying their output with the task's
//! name in front of every line.

use crate::{
    CancellationToken,
    system::executor::{self, ChildEnv, ExecutionError, OutputPrefix},
};
use colored::*;
use std::path::PathBuf;

/// A task ready to run: everything already resolved against the environment.
#[derive(Debug, Clone)]
pub struct Task {
    /// Prefixes every line of output.
    pub name: String,
    /// Command line, run through the platform shell.
    pub cmd: String,
    /// Working directory.
    pub dir: PathBuf,
    /// Environment snapshot handed to the task.
    pub env: ChildEnv,
    /// Width the name is padded to, so output lines up with services.
    pub prefix_width: usize,
}

impl Task {
    /// Runs the task and waits for it. A non-zero exit is an error.
    pub fn run(&self, cancellation_token: &CancellationToken) -> Result<(), ExecutionError> {
        println!("{} {} {}", "→".blue(), self.name.bold(), self.cmd.green());
        log::debug!("Running task '{}' in {}", self.name, self.dir.display());

        let prefix = OutputPrefix::new(&self.name, self.prefix_width.max(self.name.len()), 0);
        executor::run_streamed(&self.cmd, &self.dir, &self.env, &prefix, cancellation_token)?;

        log::debug!("Task '{}' finished.", self.name);
        Ok(())
    }
}
