//! Default locations of varroa's files.
//!
//! The `XDG_*` variables win when set; otherwise `dirs` picks the platform's
//! config and data directories. Socket and pid file default to the runtime
//! dir, falling back to the system temp dir.

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "varroa";

/// File name of the daemon's Unix socket inside [`runtime_dir`].
pub const SOCKET_FILE: &str = "varroa.sock";

/// File name of the daemon's pid record inside [`runtime_dir`].
pub const PID_FILE: &str = "varroa.pid";

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

fn from_env(var: &str) -> Option<PathBuf> {
    env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub fn config_dir() -> PathBuf {
    from_env("XDG_CONFIG_HOME")
        .or_else(dirs::config_dir)
        .unwrap_or_else(|| home_dir().join(".config"))
        .join(APP_NAME)
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default state dir: stats, archives, databases.
pub fn data_dir() -> PathBuf {
    from_env("XDG_DATA_HOME")
        .or_else(dirs::data_dir)
        .unwrap_or_else(|| home_dir().join(".local/share"))
        .join(APP_NAME)
}

pub fn runtime_dir() -> PathBuf {
    from_env("XDG_RUNTIME_DIR").unwrap_or_else(env::temp_dir)
}

pub fn socket_path() -> PathBuf {
    runtime_dir().join(SOCKET_FILE)
}

pub fn pid_path() -> PathBuf {
    runtime_dir().join(PID_FILE)
}

/// Expands a leading `~` to the home directory; other paths are unchanged.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        home_dir().join(rest)
    } else if path == "~" {
        home_dir()
    } else {
        PathBuf::from(path)
    }
}

/// `mkdir -p` leaving the last component at mode 0700.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
}
