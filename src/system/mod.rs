//! # System Interaction Layer
//!
//! This module provides abstractions for interacting with the underlying operating system.
//! It serves as a boundary between the environment engine and the specifics of process
//! management.
//!
//! ## Modules
//!
//! - **`executor`**: Spawns external processes through the platform shell, captures their
//!   output or relays it line by line with a name prefix, and launches the primary command
//!   with inherited standard streams.
//! - **`supervisor`**: The `ServiceSupervisor` contract and the `ProcessManager` that keeps
//!   named background services alive until they are explicitly stopped.

pub mod executor;
pub mod supervisor;
