//! Logging initialization.
//!
//! Configures the `tracing` subscriber with level filtering via the
//! `VARROA_LOG` environment variable, falling back to `daemon.log_level`
//! from the configuration.
//!
//! # Usage
//!
//! ```bash
//! # Debug level
//! VARROA_LOG=debug varroa start --foreground
//!
//! # Module-specific filtering
//! VARROA_LOG=varroa::daemon=debug,warn varroa status
//! ```
//!
//! One-shot commands log to stderr. A detached daemon has no terminal, so it
//! writes to its log file instead.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, EnvFilter};

use super::LifecycleError;

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "VARROA_LOG";

/// Filter from `VARROA_LOG`, or `fallback` when the variable is unset or invalid.
pub fn filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Initialize stderr logging.
///
/// A subscriber that is already installed is kept.
pub fn init_stderr(level: &str) {
    let _ = fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Initialize logging appended to `path`, without ANSI colours.
pub fn init_file(level: &str, path: &Path) -> Result<(), LifecycleError> {
    let file = open_log(path).map_err(|source| LifecycleError::LogFile {
        path: path.to_path_buf(),
        source,
    })?;

    let _ = fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
    Ok(())
}

fn open_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
