//! TOML configuration schema types for varroa.
//!
//! All structs derive `Deserialize` and `Serialize` with defaults via
//! `#[serde(default)]`, so an empty file is a valid configuration.
//!
//! Duration fields use human-readable strings (e.g. `"1h"`, `"24h"`,
//! `"90s"`) parsed by the `humantime` crate through the accessor methods.
//! Path fields are strings where an empty value selects the XDG default and
//! a leading `~` is expanded.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;
use crate::config::xdg;

/// Log file name under the state dir when `daemon.log_file` is empty.
pub const DAEMON_LOG_FILE: &str = "varroa.log";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration encompassing all sections.
///
/// ```toml
/// [general]
/// [daemon]
/// [trackers.<label>]
/// [collaborators]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directories varroa reads and writes.
    pub general: GeneralConfig,
    /// Daemon process settings.
    pub daemon: DaemonSection,
    /// Known trackers, keyed by the label used on the command line.
    pub trackers: BTreeMap<String, TrackerConfig>,
    /// Shell commands implementing each collaborator operation.
    pub collaborators: CollaboratorsConfig,
}

impl Config {
    /// Socket path, falling back to `$XDG_RUNTIME_DIR/varroa.sock`.
    pub fn socket_path(&self) -> PathBuf {
        resolve_path(&self.daemon.socket_path).unwrap_or_else(xdg::socket_path)
    }

    /// Pid file path, falling back to `$XDG_RUNTIME_DIR/varroa.pid`.
    pub fn pid_path(&self) -> PathBuf {
        resolve_path(&self.daemon.pid_file).unwrap_or_else(xdg::pid_path)
    }

    /// State directory (stats, archives, databases).
    pub fn state_dir(&self) -> PathBuf {
        resolve_path(&self.general.state_dir).unwrap_or_else(xdg::data_dir)
    }

    /// Explicitly configured daemon log file.
    pub fn log_file(&self) -> Option<PathBuf> {
        resolve_path(&self.daemon.log_file)
    }

    /// Where a detached daemon logs: `log_file`, else `<state_dir>/varroa.log`.
    pub fn daemon_log_file(&self) -> PathBuf {
        self.log_file()
            .unwrap_or_else(|| self.state_dir().join(DAEMON_LOG_FILE))
    }

    /// Period of the scheduled stats worker. Zero disables it.
    pub fn stats_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("daemon.stats_interval", &self.daemon.stats_interval)
    }

    /// Period of the scheduled backup worker. Zero disables it.
    pub fn backup_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("daemon.backup_interval", &self.daemon.backup_interval)
    }
}

fn resolve_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(xdg::expand_tilde(trimmed))
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidDuration {
        key: key.to_string(),
        value: value.to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

/// Directories shared by the daemon and one-shot commands.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Where stats, history, archives and databases live.
    /// Empty means `$XDG_DATA_HOME/varroa`.
    pub state_dir: String,
    /// Folder the torrent client downloads into.
    pub download_dir: String,
    /// Music library that accepted downloads are exported to.
    pub library_dir: String,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Daemon process settings (`[daemon]`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DaemonSection {
    /// Unix socket the daemon listens on. Empty means the runtime dir default.
    pub socket_path: String,
    /// Pid file of the running daemon. Empty means the runtime dir default.
    pub pid_file: String,
    /// Log file used once the daemon has detached. Empty means
    /// `<state_dir>/varroa.log`.
    pub log_file: String,
    /// Logging verbosity, overridden by `VARROA_LOG`.
    pub log_level: LogLevel,
    /// How often the daemon regenerates stats (default `"1h"`).
    pub stats_interval: String,
    /// How often the daemon archives user files (default `"24h"`).
    pub backup_interval: String,
    /// Run the autosnatch collaborator when the daemon starts.
    pub autosnatch: bool,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            socket_path: String::new(),
            pid_file: String::new(),
            log_file: String::new(),
            log_level: LogLevel::Info,
            stats_interval: "1h".to_string(),
            backup_interval: "24h".to_string(),
            autosnatch: false,
        }
    }
}

/// Log verbosity levels (kebab-case in TOML).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    /// Only errors.
    Error,
    /// Errors and warnings.
    Warn,
    /// Informational messages (default).
    Info,
    /// Debug-level detail.
    Debug,
    /// Full trace output.
    Trace,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// ---------------------------------------------------------------------------
// Trackers
// ---------------------------------------------------------------------------

/// One tracker entry (`[trackers.<label>]`).
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Base URL of the tracker site.
    pub url: String,
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Shell commands backing each collaborator operation (`[collaborators]`).
///
/// Each command is spawned as `sh -c '<command> "$@"'` with the operation's
/// arguments appended, so `snatch = "varroa-snatch"` receives the torrent
/// ids as positional parameters. The environment carries `VARROA_TRACKER`,
/// `VARROA_FL_TOKEN`, `VARROA_STATE_DIR`, `VARROA_DOWNLOAD_DIR` and
/// `VARROA_LIBRARY_DIR`. An empty command means the operation is not
/// available.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CollaboratorsConfig {
    pub snatch: String,
    pub refresh_metadata: String,
    pub info: String,
    pub check_log: String,
    pub reseed: String,
    pub stats: String,
    pub backup: String,
    pub encrypt: String,
    pub decrypt: String,
    pub downloads_scan: String,
    pub downloads_search: String,
    pub downloads_metadata: String,
    pub downloads_sort: String,
    pub downloads_list: String,
    pub downloads_clean: String,
    /// Mounts a read-only view; receives `<source dir> <mount point>` and
    /// must block until unmounted.
    pub fuse: String,
    /// Long-running autosnatch loop started by the daemon.
    pub autosnatch: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
