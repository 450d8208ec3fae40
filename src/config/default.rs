//! Default configuration template and file creation utilities.
//!
//! Provides a commented TOML template that matches `Config::default()`
//! and functions to write it to the XDG config path.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::error::ConfigError;
use crate::config::xdg;

// ---------------------------------------------------------------------------
// Default TOML template
// ---------------------------------------------------------------------------

/// A commented TOML template with all default values.
///
/// Every active value here must match `Config::default()` from `schema.rs`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# varroa musica configuration
#
# All values shown below are the built-in defaults.
# Location: $XDG_CONFIG_HOME/varroa/config.toml

# ==============================================================================
# Directories
# ==============================================================================

[general]

# Stats, history, archives and databases. Empty means $XDG_DATA_HOME/varroa.
state_dir = ""

# Folder your torrent client downloads into (used by `varroa downloads`).
download_dir = ""

# Music library accepted downloads are exported to (used by `varroa library`).
library_dir = ""

# ==============================================================================
# Daemon
# ==============================================================================

[daemon]

# Unix socket and pid file. Empty means $XDG_RUNTIME_DIR (or /tmp).
socket_path = ""
pid_file = ""

# Log file once the daemon is detached. Empty means <state_dir>/varroa.log.
# VARROA_LOG overrides log_level, e.g. VARROA_LOG=varroa=debug.
log_file = ""
log_level = "info"

# Scheduled work. "0s" disables a worker.
stats_interval = "1h"
backup_interval = "24h"

# Start the autosnatch collaborator with the daemon.
autosnatch = false

# ==============================================================================
# Trackers
# ==============================================================================

# One table per tracker label used on the command line.
# [trackers.blue]
# url = "https://blue.example"

# ==============================================================================
# Collaborators
# ==============================================================================

# Each command runs as: sh -c '<command> "$@"' with the arguments appended.
# Environment: VARROA_TRACKER, VARROA_FL_TOKEN, VARROA_STATE_DIR,
# VARROA_DOWNLOAD_DIR, VARROA_LIBRARY_DIR.
[collaborators]
# snatch = "varroa-snatch"
# refresh_metadata = "varroa-metadata"
# info = "varroa-info"
# check_log = "varroa-logcheck"
# reseed = "varroa-reseed"
# stats = "varroa-stats"
# backup = "varroa-backup"
# encrypt = "varroa-crypt encrypt"
# decrypt = "varroa-crypt decrypt"
# downloads_scan = "varroa-downloads scan"
# downloads_search = "varroa-downloads search"
# downloads_metadata = "varroa-downloads metadata"
# downloads_sort = "varroa-downloads sort"
# downloads_list = "varroa-downloads list"
# downloads_clean = "varroa-downloads clean"
# fuse = "varroa-fuse"
# autosnatch = "varroa-autosnatch"
"#;

// ---------------------------------------------------------------------------
// File creation functions
// ---------------------------------------------------------------------------

/// Creates (or force-overwrites) the default config file at `target`, or at
/// the XDG path when `target` is `None`.
///
/// - If the file exists and `force` is `false`, returns `ConfigError::AlreadyExists`.
/// - If the file exists and `force` is `true`, backs it up to `.toml.backup` first.
/// - Returns the path where the config was written.
pub fn create_default_config(target: Option<&Path>, force: bool) -> Result<PathBuf, ConfigError> {
    let path = target.map(Path::to_path_buf).unwrap_or_else(xdg::config_path);

    if path.exists() {
        if !force {
            return Err(ConfigError::AlreadyExists { path });
        }
        let backup_path = path.with_extension("toml.backup");
        fs::rename(&path, &backup_path).map_err(|e| ConfigError::WriteError {
            path: backup_path.clone(),
            source: e,
        })?;
        tracing::info!("Backed up existing config to {}", backup_path.display());
    }

    write_default_config(&path)?;
    Ok(path)
}

/// Writes the default template to `path`, creating parent dirs and setting 0600 permissions.
fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    let write_error = |source| ConfigError::WriteError {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        xdg::ensure_dir(parent).map_err(write_error)?;
    }
    fs::write(path, DEFAULT_CONFIG_TEMPLATE).map_err(write_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(write_error)?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
