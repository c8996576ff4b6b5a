// src/constants.rs

use std::time::Duration;

/// The config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILENAME: &str = "xe.yml";

/// Joins the path segments of a flattened document into a single variable name.
pub const KEY_SEPARATOR: &str = "_";

/// Separates a task or service name from the output line it prefixes.
pub const OUTPUT_PREFIX_SEPARATOR: &str = "|";

/// Exit code used when the primary command was killed by a signal (e.g. `Ctrl+C`).
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// How long a stopped service may take to exit after `SIGTERM` before it is killed.
pub const SERVICE_STOP_GRACE: Duration = Duration::from_secs(5);
