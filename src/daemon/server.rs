//! Unix socket server for forwarded commands.
//!
//! Each connection carries one [`TransportMessage`], read to EOF. `stop`
//! triggers the daemon's shutdown broadcast, `status` is answered with a
//! [`StatusReport`], every other daemon-capable command is executed through
//! the collaborators. Malformed or unknown messages are logged and only
//! their own connection is dropped.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::broadcast;
//! use varroa::collaborators::ShellCollaborators;
//! use varroa::config::Config;
//! use varroa::daemon::{DaemonState, SocketServer};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!     let mut server = SocketServer::new("/tmp/varroa.sock".into());
//!     server.start().await?;
//!     let state = DaemonState::new(
//!         Arc::new(ShellCollaborators::new(Config::default())),
//!         "/tmp/varroa.sock".into(),
//!         Vec::new(),
//!         shutdown_tx,
//!     );
//!     server.run_with_shutdown(state, shutdown_rx).await;
//!     Ok(())
//! }
//! ```

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use crate::collaborators::{CollaboratorError, Collaborators};
use crate::command::Action;
use crate::ipc::{StatusReport, TransportMessage, MAX_MESSAGE_BYTES};

/// How long a client has to send its message and close its write half.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Unix socket server for daemon IPC.
///
/// Handles stale socket cleanup on startup, connection acceptance, and
/// socket removal on drop.
pub struct SocketServer {
    socket_path: PathBuf,
    /// Set after `start()` is called
    listener: Option<UnixListener>,
}

/// State shared by every connection handler.
#[derive(Clone)]
pub struct DaemonState {
    collaborators: Arc<dyn Collaborators>,
    start_time: Instant,
    commands_handled: Arc<AtomicU64>,
    socket_path: PathBuf,
    workers: Arc<[String]>,
    shutdown: broadcast::Sender<()>,
}

impl DaemonState {
    pub fn new(
        collaborators: Arc<dyn Collaborators>,
        socket_path: PathBuf,
        workers: Vec<String>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            collaborators,
            start_time: Instant::now(),
            commands_handled: Arc::new(AtomicU64::new(0)),
            socket_path,
            workers: workers.into(),
            shutdown,
        }
    }

    pub fn commands_handled(&self) -> u64 {
        self.commands_handled.load(Ordering::Relaxed)
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            pid: std::process::id(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            socket_path: self.socket_path.display().to_string(),
            commands_handled: self.commands_handled(),
            workers: self.workers.to_vec(),
        }
    }
}

impl SocketServer {
    /// Creates a server for `socket_path`. Nothing is bound until `start()`.
    pub fn new(socket_path: PathBuf) -> Self {
        tracing::debug!(socket = %socket_path.display(), "creating socket server");
        Self {
            socket_path,
            listener: None,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Removes a socket file left behind by a daemon that crashed.
    ///
    /// Returns `AddrInUse` if something still accepts connections on it.
    async fn cleanup_stale_socket(&self) -> io::Result<()> {
        if !self.socket_path.exists() {
            return Ok(());
        }

        match UnixStream::connect(&self.socket_path).await {
            Ok(_) => {
                tracing::error!(socket = %self.socket_path.display(), "another daemon is already listening");
                Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "another daemon is already running",
                ))
            }
            Err(_) => {
                tracing::info!(socket = %self.socket_path.display(), "removing stale socket file");
                fs::remove_file(&self.socket_path)
            }
        }
    }

    /// Cleans up any stale socket and binds, owner-only.
    ///
    /// This method must be called before `run_with_shutdown()`.
    pub async fn start(&mut self) -> io::Result<()> {
        self.cleanup_stale_socket().await?;

        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(0o600))?;
        self.listener = Some(listener);

        tracing::info!(socket = %self.socket_path.display(), "socket server started");
        Ok(())
    }

    /// Accepts connections until `shutdown_rx` fires, one task per client.
    ///
    /// Returns immediately if the server was never started.
    pub async fn run_with_shutdown(
        &self,
        state: DaemonState,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let Some(listener) = self.listener.as_ref() else {
            tracing::error!("socket server not started");
            return;
        };

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            tracing::debug!("accepted client connection");
                            let state = state.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, state).await {
                                    tracing::warn!(error = %e, "client handler error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("shutdown signal received, stopping server");
                    break;
                }
            }
        }
    }
}

impl Drop for SocketServer {
    /// Removes the socket file (best-effort).
    fn drop(&mut self) {
        if self.listener.is_some() && self.socket_path.exists() {
            tracing::debug!(socket = %self.socket_path.display(), "cleaning up socket file");
            if let Err(e) = fs::remove_file(&self.socket_path) {
                tracing::warn!(error = %e, "failed to remove socket file on drop");
            }
        }
    }
}

/// Why a forwarded command was not carried out.
#[derive(Debug, Error)]
enum ExecuteError {
    #[error("'{0}' is not executed by the daemon")]
    NotForwardable(Action),

    #[error("malformed arguments for '{action}': {reason}")]
    BadArguments { action: Action, reason: String },

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// Reads one message to EOF and acts on it.
async fn handle_client(stream: UnixStream, state: DaemonState) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();

    let mut raw = Vec::new();
    let mut limited = reader.take(MAX_MESSAGE_BYTES + 1);
    let read = limited.read_to_end(&mut raw);
    if let Ok(result) = tokio::time::timeout(READ_TIMEOUT, read).await {
        result?;
    } else {
        tracing::warn!(bytes = raw.len(), "dropping client that never finished its message");
        return Ok(());
    }
    if raw.len() as u64 > MAX_MESSAGE_BYTES {
        tracing::warn!(limit = MAX_MESSAGE_BYTES, "dropping oversized message");
        return Ok(());
    }

    let message = match TransportMessage::decode(&raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, bytes = raw.len(), "dropping malformed message");
            return Ok(());
        }
    };
    let action = match message.action() {
        Ok(action) => action,
        Err(e) => {
            tracing::warn!(error = %e, "dropping message");
            return Ok(());
        }
    };

    state.commands_handled.fetch_add(1, Ordering::Relaxed);
    tracing::info!(command = %action, site = %message.site, "received command");

    match action {
        Action::Stop => {
            tracing::info!("stop requested");
            let _ = state.shutdown.send(());
        }
        Action::Status => {
            let line = state.status_report().to_json_line().map_err(io::Error::other)?;
            writer.write_all(line.as_bytes()).await?;
            writer.shutdown().await?;
        }
        _ => {
            let collaborators = Arc::clone(&state.collaborators);
            let outcome =
                tokio::task::spawn_blocking(move || execute(collaborators.as_ref(), &message, action))
                    .await;
            match outcome {
                Ok(Ok(())) => tracing::info!(command = %action, "command executed"),
                Ok(Err(e)) => tracing::error!(command = %action, error = %e, "command failed"),
                Err(e) => tracing::error!(command = %action, error = %e, "command panicked"),
            }
        }
    }
    Ok(())
}

/// Runs a forwarded command against the collaborators.
fn execute(
    collaborators: &dyn Collaborators,
    message: &TransportMessage,
    action: Action,
) -> Result<(), ExecuteError> {
    let ids = || {
        message
            .target_ids()
            .map_err(|arg| ExecuteError::BadArguments {
                action,
                reason: format!("'{arg}' is not a torrent id"),
            })
    };
    let single_path = || match message.args.as_slice() {
        [path] => Ok(Path::new(path)),
        args => Err(ExecuteError::BadArguments {
            action,
            reason: format!("expected one path, got {}", args.len()),
        }),
    };
    let site = message.site.as_str();

    match action {
        Action::Stats => collaborators.generate_stats()?,
        Action::Snatch => collaborators.snatch(site, &ids()?, message.fl_token)?,
        Action::RefreshMetadata => collaborators.refresh_metadata(site, &ids()?)?,
        Action::Info => collaborators.show_info(site, &ids()?)?,
        Action::CheckLog => collaborators.check_log(site, single_path()?)?,
        Action::Reseed => collaborators.reseed(site, single_path()?)?,
        other => return Err(ExecuteError::NotForwardable(other)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::tests::Recording;

    fn message(command: &str, site: &str, args: &[&str], fl_token: bool) -> TransportMessage {
        TransportMessage {
            site: site.to_string(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            fl_token,
        }
    }

    #[test]
    fn test_socket_server_new() {
        let server = SocketServer::new(PathBuf::from("/tmp/test-socket.sock"));
        assert_eq!(server.socket_path(), Path::new("/tmp/test-socket.sock"));
        assert!(server.listener.is_none());
    }

    #[test]
    fn execute_snatch_passes_ids_and_token() {
        let recording = Recording::default();
        execute(
            &recording,
            &message("snatch", "blue", &["101", "202"], true),
            Action::Snatch,
        )
        .unwrap();
        assert_eq!(recording.calls(), vec!["snatch blue 101,202 fl=true"]);
    }

    #[test]
    fn execute_check_log_takes_one_path() {
        let recording = Recording::default();
        execute(
            &recording,
            &message("check-log", "blue", &["/music/rip.log"], false),
            Action::CheckLog,
        )
        .unwrap();
        assert_eq!(recording.calls(), vec!["check_log blue /music/rip.log"]);

        let err = execute(
            &recording,
            &message("check-log", "blue", &[], false),
            Action::CheckLog,
        )
        .unwrap_err();
        assert!(matches!(err, ExecuteError::BadArguments { .. }));
    }

    #[test]
    fn execute_rejects_bad_ids_without_calling() {
        let recording = Recording::default();
        let err = execute(
            &recording,
            &message("info", "blue", &["12", "abc"], false),
            Action::Info,
        )
        .unwrap_err();
        assert!(err.to_string().contains("'abc' is not a torrent id"));
        assert!(recording.calls().is_empty());
    }

    #[test]
    fn execute_refuses_local_only_commands() {
        let recording = Recording::default();
        for action in [Action::Backup, Action::Encrypt, Action::DownloadsFuse, Action::Uptime] {
            let err = execute(
                &recording,
                &message(action.as_str(), "", &[], false),
                action,
            )
            .unwrap_err();
            assert!(matches!(err, ExecuteError::NotForwardable(a) if a == action));
        }
        assert!(recording.calls().is_empty());
    }

    #[test]
    fn execute_surfaces_collaborator_failure() {
        let recording = Recording::failing();
        let err = execute(&recording, &message("stats", "", &[], false), Action::Stats)
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Collaborator(_)));
    }

    #[test]
    fn status_report_reflects_state() {
        let (tx, _rx) = broadcast::channel(1);
        let state = DaemonState::new(
            Arc::new(Recording::default()),
            PathBuf::from("/run/varroa.sock"),
            vec!["stats".to_string()],
            tx,
        );
        state.commands_handled.fetch_add(2, Ordering::Relaxed);
        let report = state.status_report();
        assert_eq!(report.pid, std::process::id());
        assert_eq!(report.socket_path, "/run/varroa.sock");
        assert_eq!(report.commands_handled, 2);
        assert_eq!(report.workers, vec!["stats"]);
    }
}
