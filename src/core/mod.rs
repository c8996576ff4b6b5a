// src/core/mod.rs

pub mod config_loader;
pub mod environment;
pub mod flatten;
pub mod resolver;
pub mod script;
pub mod store;
pub mod task_runner;
