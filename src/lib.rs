//! # xe
//!
//! Builds an executable environment (resolved variables, background services and
//! one-off setup tasks) around a primary command, then tears it down again no matter
//! how that command exited.
//!
//! The engine lives in [`core::environment::Environment`]; the process plumbing it
//! drives lives in [`system`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set by the `Ctrl+C` listener. Long-running setup steps poll it and stop early.
pub type CancellationToken = Arc<AtomicBool>;

/// Creates a token that has not been cancelled.
pub fn new_cancellation_token() -> CancellationToken {
    Arc::new(AtomicBool::new(false))
}

/// Returns `true` once cancellation has been requested.
pub fn is_cancelled(token: &CancellationToken) -> bool {
    token.load(Ordering::SeqCst)
}

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;
