//! Log setup for the command-line tool.
//!
//! Messages go to stderr and, when the log directory is writable, are also
//! appended to `<data dir>/logs/supplement-check.log`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

pub const LOG_FILE_NAME: &str = "supplement-check.log";

/// Installs the global subscriber. Call once from `main`.
///
/// `RUST_LOG` wins over `verbose` when set.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let file_layer = log_dir.and_then(|dir| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE_NAME))
            .ok()
            .map(|file| fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
}
