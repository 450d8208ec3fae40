//! Test doubles shared by the integration tests.
//!
//! Every double appends to one [`Journal`] so tests can assert both which
//! seams were touched and in what order.

#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use varroa::{
    Action, CollaboratorError, Collaborators, CommandRequest, CommandTransport, DaemonHandle,
    DaemonLocator, DispatchError, Dispatcher, DownloadState, Lifecycle, LifecycleError, Outcome,
    StartOutcome, StatusReport, TransportError, TransportMessage, Validator,
};
use varroa::command::FuseSource;

pub type Journal = Arc<Mutex<Vec<String>>>;

fn note(journal: &Journal, entry: String) {
    journal.lock().unwrap().push(entry);
}

pub struct FixedLocator {
    journal: Journal,
    handle: Option<DaemonHandle>,
}

impl DaemonLocator for FixedLocator {
    fn locate(&self) -> Option<DaemonHandle> {
        note(&self.journal, "locate".to_string());
        self.handle
    }
}

pub struct RecordingTransport {
    journal: Journal,
    fail: bool,
    sent: Mutex<Vec<TransportMessage>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<TransportMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl CommandTransport for RecordingTransport {
    fn deliver(&self, message: &TransportMessage) -> Result<(), TransportError> {
        note(&self.journal, format!("deliver {}", message.command));
        if self.fail {
            return Err(TransportError::Write(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "daemon went away",
            )));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn query_status(&self) -> Result<StatusReport, TransportError> {
        note(&self.journal, "query status".to_string());
        Ok(StatusReport {
            pid: DAEMON_PID,
            uptime_seconds: 90,
            socket_path: "/run/varroa.sock".to_string(),
            commands_handled: 5,
            workers: vec!["stats".to_string()],
        })
    }
}

pub struct ScriptedLifecycle {
    journal: Journal,
    start: StartOutcome,
}

impl Lifecycle for ScriptedLifecycle {
    fn start(&self) -> Result<StartOutcome, LifecycleError> {
        note(&self.journal, "start".to_string());
        Ok(self.start)
    }

    fn serve(&self) -> Result<(), LifecycleError> {
        note(&self.journal, "serve".to_string());
        Ok(())
    }

    fn stop(&self, handle: &DaemonHandle) -> Result<(), LifecycleError> {
        note(&self.journal, format!("signal {}", handle.pid));
        Ok(())
    }

    fn uptime(&self, handle: &DaemonHandle) -> Result<Duration, LifecycleError> {
        note(&self.journal, format!("uptime {}", handle.pid));
        Ok(Duration::from_secs(3720))
    }
}

pub struct RecordingCollaborators {
    journal: Journal,
    fail: bool,
    autosnatch_runs_for: Duration,
}

impl RecordingCollaborators {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail: false,
            autosnatch_runs_for: Duration::ZERO,
        }
    }

    /// Autosnatch blocks for `duration` after recording its call.
    pub fn with_busy_autosnatch(mut self, duration: Duration) -> Self {
        self.autosnatch_runs_for = duration;
        self
    }

    fn call(&self, entry: String) -> Result<(), CollaboratorError> {
        note(&self.journal, format!("collaborator {entry}"));
        if self.fail {
            return Err(CollaboratorError::Failed {
                operation: "test",
                code: Some(2),
            });
        }
        Ok(())
    }
}

impl Collaborators for RecordingCollaborators {
    fn set_up(&self, daemon: bool) -> Result<(), CollaboratorError> {
        note(&self.journal, format!("set_up daemon={daemon}"));
        Ok(())
    }
    fn terminate_running(&self) {
        note(&self.journal, "terminate_running".to_string());
    }
    fn snatch(&self, tracker: &str, ids: &[u64], fl: bool) -> Result<(), CollaboratorError> {
        self.call(format!("snatch {tracker} {ids:?} fl={fl}"))
    }
    fn refresh_metadata(&self, tracker: &str, ids: &[u64]) -> Result<(), CollaboratorError> {
        self.call(format!("refresh_metadata {tracker} {ids:?}"))
    }
    fn show_info(&self, tracker: &str, ids: &[u64]) -> Result<(), CollaboratorError> {
        self.call(format!("show_info {tracker} {ids:?}"))
    }
    fn check_log(&self, tracker: &str, _log_file: &Path) -> Result<(), CollaboratorError> {
        self.call(format!("check_log {tracker}"))
    }
    fn reseed(&self, tracker: &str, _release: &Path) -> Result<(), CollaboratorError> {
        self.call(format!("reseed {tracker}"))
    }
    fn generate_stats(&self) -> Result<(), CollaboratorError> {
        self.call("generate_stats".to_string())
    }
    fn archive_user_files(&self) -> Result<(), CollaboratorError> {
        self.call("archive_user_files".to_string())
    }
    fn autosnatch(&self) -> Result<(), CollaboratorError> {
        let result = self.call("autosnatch".to_string());
        std::thread::sleep(self.autosnatch_runs_for);
        result
    }
    fn show_config(&self) -> Result<(), CollaboratorError> {
        self.call("show_config".to_string())
    }
    fn encrypt_config(&self) -> Result<(), CollaboratorError> {
        self.call("encrypt_config".to_string())
    }
    fn decrypt_config(&self) -> Result<(), CollaboratorError> {
        self.call("decrypt_config".to_string())
    }
    fn scan_downloads(&self) -> Result<(), CollaboratorError> {
        self.call("scan_downloads".to_string())
    }
    fn search_downloads(&self, artist: &str) -> Result<(), CollaboratorError> {
        self.call(format!("search_downloads {artist}"))
    }
    fn download_metadata(&self, id: u64) -> Result<(), CollaboratorError> {
        self.call(format!("download_metadata {id}"))
    }
    fn sort_downloads(&self, id: Option<u64>) -> Result<(), CollaboratorError> {
        self.call(format!("sort_downloads {id:?}"))
    }
    fn list_downloads(&self, state: DownloadState) -> Result<(), CollaboratorError> {
        self.call(format!("list_downloads {state}"))
    }
    fn clean_downloads(&self) -> Result<(), CollaboratorError> {
        self.call("clean_downloads".to_string())
    }
    fn mount_fuse(&self, source: FuseSource, _mount_point: &Path) -> Result<(), CollaboratorError> {
        self.call(format!("mount_fuse {}", source.as_str()))
    }
}

pub const DAEMON_PID: u32 = 4242;

/// A dispatcher wired to doubles, with or without a running daemon.
pub struct Harness {
    journal: Journal,
    helper_on_path: bool,
    pub locator: FixedLocator,
    pub transport: RecordingTransport,
    pub lifecycle: ScriptedLifecycle,
    pub collaborators: RecordingCollaborators,
}

impl Harness {
    fn new(handle: Option<DaemonHandle>) -> Self {
        let journal = Journal::default();
        Self {
            helper_on_path: true,
            locator: FixedLocator {
                journal: journal.clone(),
                handle,
            },
            transport: RecordingTransport {
                journal: journal.clone(),
                fail: false,
                sent: Mutex::new(Vec::new()),
            },
            lifecycle: ScriptedLifecycle {
                journal: journal.clone(),
                start: StartOutcome::Launched { pid: DAEMON_PID },
            },
            collaborators: RecordingCollaborators::new(journal.clone()),
            journal,
        }
    }

    pub fn without_daemon() -> Self {
        Self::new(None)
    }

    pub fn with_daemon() -> Self {
        Self::new(Some(DaemonHandle { pid: DAEMON_PID }))
    }

    pub fn failing_transport(mut self) -> Self {
        self.transport.fail = true;
        self
    }

    pub fn failing_collaborators(mut self) -> Self {
        self.collaborators.fail = true;
        self
    }

    pub fn without_unmount_helper(mut self) -> Self {
        self.helper_on_path = false;
        self
    }

    pub fn starting_in_daemon(mut self) -> Self {
        self.lifecycle.start = StartOutcome::InDaemon;
        self
    }

    pub fn dispatch(&self, request: CommandRequest) -> Result<Outcome, DispatchError> {
        let lookup: fn(&str) -> bool = if self.helper_on_path {
            |_| true
        } else {
            |_| false
        };
        Dispatcher::new(
            Validator::with_helper_lookup(lookup),
            &self.locator,
            &self.transport,
            &self.lifecycle,
            &self.collaborators,
        )
        .dispatch(request)
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    /// True if anything went over the transport.
    pub fn used_transport(&self) -> bool {
        self.journal()
            .iter()
            .any(|entry| entry.starts_with("deliver") || entry == "query status")
    }

    pub fn collaborator_calls(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix("collaborator ").map(str::to_string))
            .collect()
    }
}

/// A well-formed request for `action`, with any files it needs under `dir`.
pub fn valid_request(action: Action, dir: &Path) -> CommandRequest {
    let request = CommandRequest::new(action);
    match action {
        Action::RefreshMetadata | Action::Info => request.tracker("blue").ids(["11", "12"]),
        Action::Snatch => request.tracker("blue").ids(["11"]),
        Action::CheckLog => {
            let log = dir.join("rip.log");
            fs::write(&log, "EAC extraction logfile").unwrap();
            request.tracker("blue").log_file(log)
        }
        Action::Reseed => {
            let release = dir.join("release");
            fs::create_dir_all(release.join("TrackerMetadata")).unwrap();
            fs::write(release.join("01 - Track.flac"), b"fLaC").unwrap();
            request.tracker("blue").path(release)
        }
        Action::DownloadsSearch => request.artist("Low"),
        Action::DownloadsMetadata => request.ids(["3"]),
        Action::DownloadsList => request.download_state("unsorted"),
        Action::DownloadsFuse | Action::LibraryFuse => {
            let mount = dir.join(format!("mount-{}", action.as_str()));
            fs::create_dir_all(&mount).unwrap();
            request.mount_point(mount)
        }
        _ => request,
    }
}
