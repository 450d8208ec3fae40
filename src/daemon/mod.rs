//! Daemon process lifecycle.
//!
//! `start` forks before any async runtime exists. The original process waits
//! for the daemon's pid file and reports [`StartOutcome::Launched`]; the
//! detached grandchild gets [`StartOutcome::InDaemon`] and calls
//! [`Lifecycle::serve`], which binds the socket, records the pid, launches
//! the workers and blocks until a `stop` message or SIGTERM/SIGINT arrives.

pub mod logging;
pub mod pid;
pub mod server;
pub mod workers;

// Re-export commonly used types for convenience
pub use pid::{DaemonHandle, DaemonLocator, PidFile, PidFileLocator};
pub use server::{DaemonState, SocketServer};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fork::{chdir, fork, redirect_stdio, setsid, waitpid, Fork};
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::collaborators::{CollaboratorError, Collaborators};
use crate::config::{Config, ConfigError};
use crate::health;
use workers::WorkerSet;

/// Initial delay between pid file polls while waiting for the daemon.
const INITIAL_BACKOFF_MS: u64 = 10;
/// Cap on the poll delay.
const MAX_BACKOFF_MS: u64 = 500;
/// Polls before `start` gives up (a little over five seconds in total).
const MAX_RETRIES: u32 = 16;
/// How long `stop` waits for the signalled process to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(50);
/// How long a stopping daemon waits for its workers and blocking tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Failures while starting, running or stopping the daemon.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A live process already owns the pid file.
    #[error("varroa is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    /// Detaching from the terminal failed.
    #[error("failed to daemonize: {0}")]
    Fork(String),

    #[error("cannot write pid file {path}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot open log file {path}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot listen on {path}")]
    Socket {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create the async runtime")]
    Runtime(#[source] io::Error),

    /// The forked daemon never recorded its pid.
    #[error("the daemon did not come up, see {log_file} for details")]
    StartTimeout { log_file: PathBuf },

    #[error("failed to signal pid {pid}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("the daemon (pid {pid}) did not exit after SIGTERM")]
    StopTimeout { pid: u32 },

    /// The located process vanished before it could be inspected.
    #[error("no process with pid {pid}")]
    ProcessGone { pid: u32 },

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// Result of [`Lifecycle::start`] in the process that observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A daemon was launched; the caller is done.
    Launched { pid: u32 },
    /// The caller is the daemon and must call [`Lifecycle::serve`].
    InDaemon,
}

/// Starting, serving, stopping and inspecting the daemon process.
pub trait Lifecycle {
    fn start(&self) -> Result<StartOutcome, LifecycleError>;

    /// Runs the daemon in this process until it is told to stop.
    fn serve(&self) -> Result<(), LifecycleError>;

    /// Signals a daemon that has already received the `stop` message.
    fn stop(&self, handle: &DaemonHandle) -> Result<(), LifecycleError>;

    fn uptime(&self, handle: &DaemonHandle) -> Result<Duration, LifecycleError>;
}

/// Daemon settings resolved from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonSettings {
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
    /// Used once the process has detached.
    pub log_file: PathBuf,
    pub log_level: String,
    /// Zero disables the stats worker.
    pub stats_interval: Duration,
    /// Zero disables the backup worker.
    pub backup_interval: Duration,
    pub autosnatch: bool,
}

impl DaemonSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            socket_path: config.socket_path(),
            pid_path: config.pid_path(),
            log_file: config.daemon_log_file(),
            log_level: config.daemon.log_level.as_str().to_string(),
            stats_interval: config.stats_interval()?,
            backup_interval: config.backup_interval()?,
            autosnatch: config.daemon.autosnatch,
        })
    }
}

/// [`Lifecycle`] backed by `fork`, a pid file and Unix signals.
pub struct ForkLifecycle {
    settings: DaemonSettings,
    collaborators: Arc<dyn Collaborators>,
    /// False for `start --foreground`: no fork, logs stay on stderr.
    detach: bool,
}

impl ForkLifecycle {
    pub fn new(settings: DaemonSettings, collaborators: Arc<dyn Collaborators>) -> Self {
        Self {
            settings,
            collaborators,
            detach: true,
        }
    }

    pub fn foreground(mut self, foreground: bool) -> Self {
        self.detach = !foreground;
        self
    }

    pub fn settings(&self) -> &DaemonSettings {
        &self.settings
    }

    /// Polls the pid file until a process other than `launcher` owns it.
    fn await_daemon(&self, launcher: u32) -> Result<u32, LifecycleError> {
        for attempt in 0..MAX_RETRIES {
            if let Some(pid) = pid::read_pid(&self.settings.pid_path) {
                if pid != launcher && pid::process_alive(pid) {
                    debug!(pid, attempts = attempt + 1, "daemon recorded its pid");
                    return Ok(pid);
                }
            }
            thread::sleep(calculate_backoff(attempt));
        }
        Err(LifecycleError::StartTimeout {
            log_file: self.settings.log_file.clone(),
        })
    }
}

impl Lifecycle for ForkLifecycle {
    fn start(&self) -> Result<StartOutcome, LifecycleError> {
        if !self.detach {
            return Ok(StartOutcome::InDaemon);
        }

        let launcher = std::process::id();
        match fork().map_err(fork_error)? {
            Fork::Parent(child) => {
                reap(child);
                let pid = self.await_daemon(launcher)?;
                Ok(StartOutcome::Launched { pid })
            }
            Fork::Child => {
                daemonize_process()?;
                Ok(StartOutcome::InDaemon)
            }
        }
    }

    fn serve(&self) -> Result<(), LifecycleError> {
        // Initialize logging after daemonize (stderr is redirected)
        if self.detach {
            logging::init_file(&self.settings.log_level, &self.settings.log_file)?;
        } else {
            logging::init_stderr(&self.settings.log_level);
        }

        info!(
            pid = std::process::id(),
            socket = %self.settings.socket_path.display(),
            detached = self.detach,
            "varroa daemon starting"
        );

        self.collaborators.set_up(true)?;

        // Create Tokio runtime AFTER daemonization
        let runtime = Runtime::new().map_err(LifecycleError::Runtime)?;
        let result = runtime.block_on(run_until_stopped(
            self.settings.clone(),
            Arc::clone(&self.collaborators),
        ));
        // blocking collaborator calls are not waited on past the grace period
        runtime.shutdown_timeout(SHUTDOWN_GRACE);
        result?;

        info!("daemon stopped");
        Ok(())
    }

    fn stop(&self, handle: &DaemonHandle) -> Result<(), LifecycleError> {
        let pid = handle.pid;
        match pid::terminate(pid) {
            Ok(()) => debug!(pid, "sent SIGTERM"),
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {
                debug!(pid, "daemon exited before SIGTERM")
            }
            Err(source) => return Err(LifecycleError::Signal { pid, source }),
        }

        let deadline = Instant::now() + STOP_TIMEOUT;
        while pid::process_alive(pid) && !health::process_exited(pid) {
            if Instant::now() >= deadline {
                return Err(LifecycleError::StopTimeout { pid });
            }
            thread::sleep(STOP_POLL);
        }

        // a daemon that died without cleaning up leaves its record behind
        if pid::read_pid(&self.settings.pid_path) == Some(pid) {
            if let Err(e) = std::fs::remove_file(&self.settings.pid_path) {
                warn!(error = %e, "could not remove pid file");
            }
        }
        info!(pid, "daemon stopped");
        Ok(())
    }

    fn uptime(&self, handle: &DaemonHandle) -> Result<Duration, LifecycleError> {
        health::process_uptime(handle.pid).ok_or(LifecycleError::ProcessGone { pid: handle.pid })
    }
}

/// Calculates the poll delay for a given attempt, doubling up to the cap.
fn calculate_backoff(attempt: u32) -> Duration {
    let delay_ms = INITIAL_BACKOFF_MS.saturating_mul(1u64 << attempt.min(32));
    Duration::from_millis(delay_ms.min(MAX_BACKOFF_MS))
}

/// Turns the launcher's child into the daemon: new session, a second fork
/// so it never reacquires a terminal, cwd `/`, stdio on `/dev/null`.
///
/// This function MUST be called BEFORE starting the Tokio runtime,
/// as forking after Tokio initialization corrupts global state for
/// signal handling.
fn daemonize_process() -> Result<(), LifecycleError> {
    setsid().map_err(fork_error)?;
    if let Fork::Parent(_) = fork().map_err(fork_error)? {
        // SAFETY: _exit runs no destructors in the forked copy
        unsafe { libc::_exit(0) }
    }
    chdir().map_err(fork_error)?;
    redirect_stdio().map_err(fork_error)?;
    Ok(())
}

fn fork_error(e: io::Error) -> LifecycleError {
    LifecycleError::Fork(e.to_string())
}

/// Collects the intermediate fork so it does not linger as a zombie.
fn reap(child: libc::pid_t) {
    if let Err(e) = waitpid(child) {
        debug!(child, error = %e, "waitpid failed");
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
///
/// If SIGTERM handler registration fails, falls back to SIGINT only.
async fn wait_for_shutdown() {
    match unix_signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("received SIGINT (Ctrl+C), shutting down");
                },
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                },
            }
        }
        Err(e) => {
            warn!(error = %e, "could not register SIGTERM handler, using SIGINT only");
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "failed waiting for SIGINT");
            } else {
                info!("received SIGINT (Ctrl+C), shutting down");
            }
        }
    }
}

/// Serves until a `stop` message or a signal, then stops the workers.
///
/// The pid file is written only once the socket accepts connections, so a
/// located daemon is always reachable.
pub async fn run_until_stopped(
    settings: DaemonSettings,
    collaborators: Arc<dyn Collaborators>,
) -> Result<(), LifecycleError> {
    let mut server = SocketServer::new(settings.socket_path.clone());
    server
        .start()
        .await
        .map_err(|source| LifecycleError::Socket {
            path: settings.socket_path.clone(),
            source,
        })?;
    let pid_file = PidFile::create(&settings.pid_path)?;

    let (shutdown_tx, server_rx) = broadcast::channel(4);
    let workers = WorkerSet::spawn(&settings, Arc::clone(&collaborators), &shutdown_tx);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        let _ = signal_tx.send(());
    });

    info!(pid = pid_file.pid(), workers = ?workers.names(), "daemon running");

    let state = DaemonState::new(
        Arc::clone(&collaborators),
        settings.socket_path.clone(),
        workers.names(),
        shutdown_tx.clone(),
    );
    server.run_with_shutdown(state, server_rx).await;

    // the listener may also stop on its own; make sure the workers follow
    let _ = shutdown_tx.send(());
    collaborators.terminate_running();
    if tokio::time::timeout(SHUTDOWN_GRACE, workers.join())
        .await
        .is_err()
    {
        warn!("workers did not stop in time");
    }
    drop(pid_file);
    Ok(())
}
