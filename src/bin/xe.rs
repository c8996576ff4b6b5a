// src/bin/xe.rs

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use colored::*;
use std::collections::BTreeMap;
use std::process::ExitStatus;
use std::sync::atomic::Ordering;
use xe::{
    CancellationToken,
    cli::Cli,
    constants::INTERRUPTED_EXIT_CODE,
    core::{
        config_loader,
        environment::{Environment, EnvironmentError},
        store::KvStore,
    },
    is_cancelled, new_cancellation_token,
    system::{executor, supervisor::ProcessManager},
};

/// The main entry point of the `xe` application.
/// It sets up logging and the interrupt listener, runs the environment lifecycle,
/// and performs centralized error handling.
fn main() {
    env_logger::init();
    let cli = Cli::parse();
    log::debug!("CLI args parsed: {:?}", cli);

    // Keeps the listener alive for the whole run. Without it, Ctrl+C would kill xe
    // before services are stopped.
    let cancellation_token = new_cancellation_token();
    let _signal_runtime = match listen_for_interrupts(cancellation_token.clone()) {
        Ok(runtime) => Some(runtime),
        Err(e) => {
            log::warn!("Could not install the Ctrl+C handler: {}", e);
            None
        }
    };

    match run(&cli, &cancellation_token) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if let Some(EnvironmentError::Cancelled) = e.downcast_ref::<EnvironmentError>() {
                eprintln!("\n{}", "Interrupted.".yellow());
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
            eprintln!("\n{}: {:#}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Flags the token on every Ctrl+C instead of letting the signal terminate xe.
fn listen_for_interrupts(token: CancellationToken) -> std::io::Result<tokio::runtime::Runtime> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("xe-signals")
        .enable_all()
        .build()?;
    runtime.spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            log::debug!("Interrupt received; tearing down once the current step ends.");
            token.store(true, Ordering::SeqCst);
        }
    });
    Ok(runtime)
}

/// Loads the config, builds the environment, runs the command and always tears the
/// environment down. Returns the exit code xe should exit with.
fn run(cli: &Cli, cancellation_token: &CancellationToken) -> Result<i32> {
    println!("{} {}", "loading".dimmed(), cli.config.display());
    let directives = config_loader::load_directives(&cli.config)
        .with_context(|| format!("error loading config '{}'", cli.config.display()))?;

    let services = ProcessManager::new().with_stop_grace(cli.stop_grace());
    let mut env = Environment::with_supervisor(cli.root_dir(), Box::new(services))
        .with_options(cli.options())
        .with_cancellation_token(cancellation_token.clone());

    let status = env.session(&directives, |env| execute(env, cli, cancellation_token))?;
    Ok(exit_code(status))
}

/// Runs the primary command in the prepared environment. `None` means no command ran.
fn execute(
    env: &mut Environment,
    cli: &Cli,
    cancellation_token: &CancellationToken,
) -> Result<Option<ExitStatus>> {
    if cli.data {
        print_data(env.store(), cli.json)?;
        if cli.command.is_empty() {
            return Ok(None);
        }
    }

    if cli.command.is_empty() {
        return Err(anyhow!("no command specified"));
    }
    if is_cancelled(cancellation_token) {
        return Err(EnvironmentError::Cancelled.into());
    }

    println!(
        "{} {}",
        "Going to start:".dimmed(),
        executor::display_argv(&cli.command).green()
    );
    let status = env.launch(&cli.command)?;
    log::debug!("Primary command exited with {}", status);
    Ok(Some(status))
}

fn print_data(store: &KvStore, as_json: bool) -> Result<()> {
    if as_json {
        let map: BTreeMap<&str, &str> = store.iter().collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for line in store.to_env_lines() {
            println!("{}", line);
        }
    }
    Ok(())
}

fn exit_code(status: Option<ExitStatus>) -> i32 {
    match status {
        None => 0,
        Some(status) => status.code().unwrap_or(INTERRUPTED_EXIT_CODE),
    }
}
