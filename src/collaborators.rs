//! External collaborators: the subsystems varroa routes work to.
//!
//! Snatching, stats generation, FUSE views, downloads management and config
//! encryption all live outside this crate. The dispatcher (one-shot runs) and
//! the daemon (forwarded commands, scheduled work) reach them through the
//! [`Collaborators`] trait. [`ShellCollaborators`] backs each operation with a
//! command from the `[collaborators]` config section.

use std::collections::BTreeSet;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command::{DownloadState, FuseSource, UNMOUNT_HELPER};
use crate::config::schema::CollaboratorsConfig;
use crate::config::{xdg, Config};
use crate::daemon::pid;

/// Failure of a collaborator operation.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// No command is configured for the operation.
    #[error("no command configured for '{operation}', set collaborators.{operation} in the configuration")]
    NotConfigured { operation: &'static str },

    /// The tracker label is not declared under `[trackers]`.
    #[error("unknown tracker '{0}', declare it under [trackers.{0}]")]
    UnknownTracker(String),

    /// A directory the operation needs is not configured.
    #[error("general.{0} is not set in the configuration")]
    MissingDirectory(&'static str),

    /// The command could not be started.
    #[error("failed to run the '{operation}' command")]
    Spawn {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The command ran and reported failure.
    #[error("'{operation}' failed with {}", code.map(|c| format!("exit code {c}")).unwrap_or_else(|| "a signal".to_string()))]
    Failed {
        operation: &'static str,
        code: Option<i32>,
    },

    /// Local set-up before running a command failed.
    #[error("failed to prepare {path}")]
    SetUp {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be rendered.
    #[error("failed to render the configuration: {0}")]
    Render(String),
}

/// Operations varroa delegates.
///
/// Implementations must be shareable with the daemon's worker tasks.
pub trait Collaborators: Send + Sync {
    /// Prepares the runtime context. `daemon` is false for one-shot local runs.
    fn set_up(&self, _daemon: bool) -> Result<(), CollaboratorError> {
        Ok(())
    }

    /// Ends collaborator work still in flight, and any started afterwards.
    /// Called once by a stopping daemon.
    fn terminate_running(&self) {}

    fn snatch(&self, tracker: &str, ids: &[u64], use_fl_token: bool)
        -> Result<(), CollaboratorError>;
    fn refresh_metadata(&self, tracker: &str, ids: &[u64]) -> Result<(), CollaboratorError>;
    fn show_info(&self, tracker: &str, ids: &[u64]) -> Result<(), CollaboratorError>;
    fn check_log(&self, tracker: &str, log_file: &Path) -> Result<(), CollaboratorError>;
    fn reseed(&self, tracker: &str, release: &Path) -> Result<(), CollaboratorError>;

    fn generate_stats(&self) -> Result<(), CollaboratorError>;
    fn archive_user_files(&self) -> Result<(), CollaboratorError>;
    /// Long-running autosnatch loop, started by the daemon.
    fn autosnatch(&self) -> Result<(), CollaboratorError>;

    fn show_config(&self) -> Result<(), CollaboratorError>;
    fn encrypt_config(&self) -> Result<(), CollaboratorError>;
    fn decrypt_config(&self) -> Result<(), CollaboratorError>;

    fn scan_downloads(&self) -> Result<(), CollaboratorError>;
    fn search_downloads(&self, artist: &str) -> Result<(), CollaboratorError>;
    fn download_metadata(&self, id: u64) -> Result<(), CollaboratorError>;
    /// Sorts one download, or every unsorted one when `id` is `None`.
    fn sort_downloads(&self, id: Option<u64>) -> Result<(), CollaboratorError>;
    fn list_downloads(&self, state: DownloadState) -> Result<(), CollaboratorError>;
    fn clean_downloads(&self) -> Result<(), CollaboratorError>;

    /// Mounts a read-only view and blocks until it is unmounted.
    fn mount_fuse(&self, source: FuseSource, mount_point: &Path)
        -> Result<(), CollaboratorError>;
}

/// Per-invocation context handed to a shell collaborator.
#[derive(Debug, Default)]
struct Invocation<'a> {
    tracker: Option<&'a str>,
    use_fl_token: bool,
    extra_env: Vec<(&'static str, String)>,
}

/// Collaborator commands currently running.
#[derive(Debug, Default)]
struct Children {
    /// Each pid leads its own process group when spawned by the daemon.
    pids: BTreeSet<u32>,
    in_daemon: bool,
    stopping: bool,
}

/// [`Collaborators`] backed by shell commands from the configuration.
#[derive(Debug, Clone)]
pub struct ShellCollaborators {
    config: Config,
    children: Arc<Mutex<Children>>,
}

impl ShellCollaborators {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            children: Arc::default(),
        }
    }

    fn with_children<T>(&self, f: impl FnOnce(&mut Children) -> T) -> T {
        let mut children = self
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut children)
    }

    fn commands(&self) -> &CollaboratorsConfig {
        &self.config.collaborators
    }

    fn download_dir(&self) -> Option<PathBuf> {
        non_empty_path(&self.config.general.download_dir)
    }

    fn library_dir(&self) -> Option<PathBuf> {
        non_empty_path(&self.config.general.library_dir)
    }

    fn check_tracker(&self, tracker: &str) -> Result<(), CollaboratorError> {
        if self.config.trackers.contains_key(tracker) {
            Ok(())
        } else {
            Err(CollaboratorError::UnknownTracker(tracker.to_string()))
        }
    }

    /// Runs `command "$@"` through `sh -c` with `args` as positional
    /// parameters, inheriting stdio.
    fn run(
        &self,
        operation: &'static str,
        command: &str,
        args: &[String],
        invocation: Invocation<'_>,
    ) -> Result<(), CollaboratorError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(CollaboratorError::NotConfigured { operation });
        }

        let mut child = Command::new("sh");
        child
            .arg("-c")
            .arg(format!("{command} \"$@\""))
            .arg(format!("varroa-{operation}"))
            .args(args)
            .env("VARROA_STATE_DIR", self.config.state_dir())
            .env("VARROA_TRACKER", invocation.tracker.unwrap_or_default())
            .env(
                "VARROA_FL_TOKEN",
                if invocation.use_fl_token { "1" } else { "0" },
            );
        if let Some(dir) = self.download_dir() {
            child.env("VARROA_DOWNLOAD_DIR", dir);
        }
        if let Some(dir) = self.library_dir() {
            child.env("VARROA_LIBRARY_DIR", dir);
        }
        for (key, value) in &invocation.extra_env {
            child.env(key, value);
        }

        let in_daemon = self.with_children(|children| children.in_daemon);
        if in_daemon {
            child.process_group(0);
        }

        debug!(operation, command, ?args, "running collaborator");
        let mut process = child
            .spawn()
            .map_err(|source| CollaboratorError::Spawn { operation, source })?;
        let pid = process.id();
        let late = self.with_children(|children| {
            children.pids.insert(pid);
            children.stopping
        });
        if late {
            signal_child(pid, in_daemon);
        }
        let status = process.wait();
        self.with_children(|children| children.pids.remove(&pid));

        let status = status.map_err(|source| CollaboratorError::Spawn { operation, source })?;
        if status.success() {
            debug!(operation, "collaborator finished");
            Ok(())
        } else {
            Err(CollaboratorError::Failed {
                operation,
                code: status.code(),
            })
        }
    }

    fn run_for_tracker(
        &self,
        operation: &'static str,
        command: &str,
        tracker: &str,
        args: Vec<String>,
        use_fl_token: bool,
    ) -> Result<(), CollaboratorError> {
        self.check_tracker(tracker)?;
        self.run(
            operation,
            command,
            &args,
            Invocation {
                tracker: Some(tracker),
                use_fl_token,
                ..Invocation::default()
            },
        )
    }

    fn run_plain(
        &self,
        operation: &'static str,
        command: &str,
        args: Vec<String>,
    ) -> Result<(), CollaboratorError> {
        self.run(operation, command, &args, Invocation::default())
    }
}

fn non_empty_path(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| xdg::expand_tilde(raw))
}

fn signal_child(pid: u32, group: bool) {
    let sent = if group {
        pid::terminate_group(pid)
    } else {
        pid::terminate(pid)
    };
    match sent {
        Ok(()) => debug!(pid, "terminated collaborator"),
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "could not terminate collaborator"),
    }
}

fn id_args(ids: &[u64]) -> Vec<String> {
    ids.iter().map(u64::to_string).collect()
}

fn path_args(path: &Path) -> Vec<String> {
    vec![path.to_string_lossy().into_owned()]
}

impl Collaborators for ShellCollaborators {
    fn set_up(&self, daemon: bool) -> Result<(), CollaboratorError> {
        let state_dir = self.config.state_dir();
        xdg::ensure_dir(&state_dir).map_err(|source| CollaboratorError::SetUp {
            path: state_dir.clone(),
            source,
        })?;
        if daemon {
            self.with_children(|children| children.in_daemon = true);
        }
        debug!(daemon, state_dir = %state_dir.display(), "runtime context ready");
        Ok(())
    }

    fn terminate_running(&self) {
        let (pids, group) = self.with_children(|children| {
            children.stopping = true;
            (children.pids.clone(), children.in_daemon)
        });
        if !pids.is_empty() {
            info!(count = pids.len(), "terminating running collaborators");
        }
        for pid in pids {
            signal_child(pid, group);
        }
    }

    fn snatch(&self, tracker: &str, ids: &[u64], use_fl_token: bool) -> Result<(), CollaboratorError> {
        let command = &self.commands().snatch;
        self.run_for_tracker("snatch", command, tracker, id_args(ids), use_fl_token)
    }

    fn refresh_metadata(&self, tracker: &str, ids: &[u64]) -> Result<(), CollaboratorError> {
        let command = &self.commands().refresh_metadata;
        self.run_for_tracker("refresh_metadata", command, tracker, id_args(ids), false)
    }

    fn show_info(&self, tracker: &str, ids: &[u64]) -> Result<(), CollaboratorError> {
        self.run_for_tracker("info", &self.commands().info, tracker, id_args(ids), false)
    }

    fn check_log(&self, tracker: &str, log_file: &Path) -> Result<(), CollaboratorError> {
        let command = &self.commands().check_log;
        self.run_for_tracker("check_log", command, tracker, path_args(log_file), false)
    }

    fn reseed(&self, tracker: &str, release: &Path) -> Result<(), CollaboratorError> {
        let command = &self.commands().reseed;
        self.run_for_tracker("reseed", command, tracker, path_args(release), false)
    }

    fn generate_stats(&self) -> Result<(), CollaboratorError> {
        self.run_plain("stats", &self.commands().stats, Vec::new())
    }

    fn archive_user_files(&self) -> Result<(), CollaboratorError> {
        self.run_plain("backup", &self.commands().backup, Vec::new())
    }

    fn autosnatch(&self) -> Result<(), CollaboratorError> {
        self.run_plain("autosnatch", &self.commands().autosnatch, Vec::new())
    }

    fn show_config(&self) -> Result<(), CollaboratorError> {
        let rendered = toml::to_string_pretty(&self.config)
            .map_err(|e| CollaboratorError::Render(e.to_string()))?;
        println!("{rendered}");
        Ok(())
    }

    fn encrypt_config(&self) -> Result<(), CollaboratorError> {
        self.run_plain("encrypt", &self.commands().encrypt, Vec::new())
    }

    fn decrypt_config(&self) -> Result<(), CollaboratorError> {
        self.run_plain("decrypt", &self.commands().decrypt, Vec::new())
    }

    fn scan_downloads(&self) -> Result<(), CollaboratorError> {
        self.run_plain("downloads_scan", &self.commands().downloads_scan, Vec::new())
    }

    fn search_downloads(&self, artist: &str) -> Result<(), CollaboratorError> {
        let command = &self.commands().downloads_search;
        self.run_plain("downloads_search", command, vec![artist.to_string()])
    }

    fn download_metadata(&self, id: u64) -> Result<(), CollaboratorError> {
        let command = &self.commands().downloads_metadata;
        self.run_plain("downloads_metadata", command, vec![id.to_string()])
    }

    fn sort_downloads(&self, id: Option<u64>) -> Result<(), CollaboratorError> {
        let args = id.map(|id| vec![id.to_string()]).unwrap_or_default();
        self.run_plain("downloads_sort", &self.commands().downloads_sort, args)
    }

    fn list_downloads(&self, state: DownloadState) -> Result<(), CollaboratorError> {
        let command = &self.commands().downloads_list;
        self.run_plain("downloads_list", command, vec![state.to_string()])
    }

    fn clean_downloads(&self) -> Result<(), CollaboratorError> {
        self.run_plain("downloads_clean", &self.commands().downloads_clean, Vec::new())
    }

    fn mount_fuse(&self, source: FuseSource, mount_point: &Path) -> Result<(), CollaboratorError> {
        let (root, key) = match source {
            FuseSource::Downloads => (self.download_dir(), "download_dir"),
            FuseSource::Library => (self.library_dir(), "library_dir"),
        };
        let root = root.ok_or(CollaboratorError::MissingDirectory(key))?;

        info!(
            source = source.as_str(),
            mount_point = %mount_point.display(),
            "mounting read-only view, to quit cleanly run '{} -u {}'",
            UNMOUNT_HELPER,
            mount_point.display()
        );
        let args = vec![
            root.to_string_lossy().into_owned(),
            mount_point.to_string_lossy().into_owned(),
        ];
        self.run(
            "fuse",
            &self.commands().fuse,
            &args,
            Invocation {
                extra_env: vec![("VARROA_FUSE_SOURCE", source.as_str().to_string())],
                ..Invocation::default()
            },
        )
    }
}
