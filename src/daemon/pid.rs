//! Pid file management and daemon discovery.
//!
//! The daemon records its pid at a well-known path while it runs. A client
//! finds it by reading that file and probing the pid with signal 0. A record
//! whose process is gone is stale: it is logged, removed, and treated as
//! "not running".

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::LifecycleError;

/// A located, live daemon process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonHandle {
    pub pid: u32,
}

impl DaemonHandle {
    /// Whether the process still exists and can be signalled.
    pub fn is_alive(&self) -> bool {
        process_alive(self.pid)
    }
}

/// Finds the running daemon, if any.
pub trait DaemonLocator {
    /// `None` means "not running"; locating never fails.
    fn locate(&self) -> Option<DaemonHandle>;
}

/// Locates the daemon through its pid file.
#[derive(Debug, Clone)]
pub struct PidFileLocator {
    path: PathBuf,
}

impl PidFileLocator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DaemonLocator for PidFileLocator {
    fn locate(&self) -> Option<DaemonHandle> {
        let pid = read_pid(&self.path)?;
        if process_alive(pid) {
            debug!(pid, path = %self.path.display(), "daemon located");
            return Some(DaemonHandle { pid });
        }
        warn!(pid, path = %self.path.display(), "removing stale pid file");
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(error = %e, "could not remove stale pid file");
            }
        }
        None
    }
}

/// Reads the pid recorded at `path`. Missing or unparsable files give `None`.
pub fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    match content.trim().parse::<u32>() {
        Ok(pid) if pid > 0 => Some(pid),
        _ => {
            warn!(path = %path.display(), "ignoring unparsable pid file");
            None
        }
    }
}

/// Pid file owned by the running daemon. Removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Records the current process at `path`.
    ///
    /// Fails with `AlreadyRunning` when the file names another live process;
    /// a stale file is replaced.
    pub fn create(path: &Path) -> Result<Self, LifecycleError> {
        let pid = std::process::id();
        let io_error = |source| LifecycleError::PidFile {
            path: path.to_path_buf(),
            source,
        };

        if let Some(existing) = read_pid(path) {
            if existing != pid && process_alive(existing) {
                return Err(LifecycleError::AlreadyRunning { pid: existing });
            }
            debug!(stale = existing, "replacing stale pid file");
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(path, format!("{pid}\n")).map_err(io_error)?;

        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // only remove the file if it still names this process
        if read_pid(&self.path) == Some(self.pid) {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(error = %e, "failed to remove pid file on drop");
            }
        }
    }
}

/// Converts to `pid_t`, refusing values `kill` would read as a process group.
fn as_pid_t(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

/// True when `pid` exists and this process may signal it.
pub fn process_alive(pid: u32) -> bool {
    let Some(pid) = as_pid_t(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the existence and permission checks only.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Sends SIGTERM to `pid`.
pub fn terminate(pid: u32) -> io::Result<()> {
    send_sigterm(signalable(pid)?)
}

/// Sends SIGTERM to every process in the group led by `pgid`.
pub fn terminate_group(pgid: u32) -> io::Result<()> {
    // a negated id addresses the group
    send_sigterm(-signalable(pgid)?)
}

fn signalable(pid: u32) -> io::Result<libc::pid_t> {
    as_pid_t(pid).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {pid}"),
        )
    })
}

fn send_sigterm(target: libc::pid_t) -> io::Result<()> {
    // SAFETY: kill(2) touches no memory of ours.
    if unsafe { libc::kill(target, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
