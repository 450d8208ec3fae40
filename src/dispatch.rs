//! Dispatcher: validate, classify, then run locally or through the daemon.
//!
//! ```text
//! request ─ validate ─ classify ─┬─ start ─ lifecycle.start ─ Launched | serve
//!                                └─ locate ─┬─ local only   ─ run locally
//!                                           ├─ found        ─ uptime | status | deliver (+ signal on stop)
//!                                           └─ not found    ─ DaemonUnavailable | run locally
//! ```

use std::time::Duration;

use tracing::{debug, info};

use crate::client::CommandTransport;
use crate::collaborators::Collaborators;
use crate::command::{Action, CommandDescriptor, CommandRequest, FuseSource, Validator};
use crate::daemon::{DaemonHandle, DaemonLocator, Lifecycle, StartOutcome};
use crate::error::DispatchError;
use crate::ipc::{StatusReport, TransportMessage};

/// What a successful invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A daemon was started in the background.
    Launched { pid: u32 },
    /// This process ran as the daemon and has stopped serving.
    Served,
    /// The daemon was told to stop and has exited.
    Stopped { pid: u32 },
    Uptime(Duration),
    Status(StatusReport),
    /// The command was handed to the daemon; it gives no answer.
    Delivered { action: Action, pid: u32 },
    /// The command ran in this process.
    Local { action: Action },
}

/// Routes one request. Holds no state between invocations.
pub struct Dispatcher<'a> {
    validator: Validator,
    locator: &'a dyn DaemonLocator,
    transport: &'a dyn CommandTransport,
    lifecycle: &'a dyn Lifecycle,
    collaborators: &'a dyn Collaborators,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        validator: Validator,
        locator: &'a dyn DaemonLocator,
        transport: &'a dyn CommandTransport,
        lifecycle: &'a dyn Lifecycle,
        collaborators: &'a dyn Collaborators,
    ) -> Self {
        Self {
            validator,
            locator,
            transport,
            lifecycle,
            collaborators,
        }
    }

    /// Validates `request` and carries it out.
    ///
    /// Nothing outside this process is contacted when validation fails.
    pub fn dispatch(&self, request: CommandRequest) -> Result<Outcome, DispatchError> {
        let descriptor = self.validator.validate(request)?;
        let action = descriptor.action();
        let routing = descriptor.routing();
        debug!(command = %action, class = ?routing.class, "routing command");

        if action == Action::Start {
            return self.start();
        }

        let located = self.locator.locate();

        if !routing.can_use_daemon {
            if let Some(handle) = located {
                debug!(pid = handle.pid, command = %action, "daemon is running, executing locally anyway");
            }
            return self.local(&descriptor);
        }

        match located {
            Some(handle) => self.through_daemon(&descriptor, handle),
            None if routing.requires_daemon => Err(DispatchError::DaemonUnavailable { action }),
            None => self.local(&descriptor),
        }
    }

    fn start(&self) -> Result<Outcome, DispatchError> {
        if let Some(handle) = self.locator.locate() {
            return Err(DispatchError::PreconditionFailed(format!(
                "varroa is already running (pid {})",
                handle.pid
            )));
        }
        match self.lifecycle.start()? {
            StartOutcome::Launched { pid } => {
                info!(pid, "daemon launched");
                Ok(Outcome::Launched { pid })
            }
            StartOutcome::InDaemon => {
                self.lifecycle.serve()?;
                Ok(Outcome::Served)
            }
        }
    }

    fn through_daemon(
        &self,
        descriptor: &CommandDescriptor,
        handle: DaemonHandle,
    ) -> Result<Outcome, DispatchError> {
        let action = descriptor.action();
        match action {
            Action::Uptime => Ok(Outcome::Uptime(self.lifecycle.uptime(&handle)?)),
            Action::Status => Ok(Outcome::Status(self.transport.query_status()?)),
            Action::Stop => {
                self.transport
                    .deliver(&TransportMessage::from_descriptor(descriptor))?;
                self.lifecycle.stop(&handle)?;
                Ok(Outcome::Stopped { pid: handle.pid })
            }
            _ => {
                self.transport
                    .deliver(&TransportMessage::from_descriptor(descriptor))?;
                info!(command = %action, pid = handle.pid, "command sent to the daemon");
                Ok(Outcome::Delivered {
                    action,
                    pid: handle.pid,
                })
            }
        }
    }

    fn local(&self, descriptor: &CommandDescriptor) -> Result<Outcome, DispatchError> {
        let action = descriptor.action();
        self.collaborators.set_up(false)?;
        info!(command = %action, "running locally");
        run_local(self.collaborators, descriptor)?;
        Ok(Outcome::Local { action })
    }
}

/// Executes a validated descriptor in this process.
pub fn run_local(
    collaborators: &dyn Collaborators,
    descriptor: &CommandDescriptor,
) -> Result<(), DispatchError> {
    let tracker = || required(descriptor.tracker(), "a tracker");
    let ids = descriptor.target_ids();

    match descriptor.action() {
        Action::Stats => collaborators.generate_stats()?,
        Action::RefreshMetadata => collaborators.refresh_metadata(tracker()?, ids)?,
        Action::Info => collaborators.show_info(tracker()?, ids)?,
        Action::Snatch => collaborators.snatch(tracker()?, ids, descriptor.use_fl_token())?,
        Action::CheckLog => {
            collaborators.check_log(tracker()?, required(descriptor.log_file(), "a log file")?)?
        }
        Action::Reseed => {
            collaborators.reseed(tracker()?, required(descriptor.reseed_path(), "a path")?)?
        }
        Action::Backup => collaborators.archive_user_files()?,
        Action::ShowConfig => collaborators.show_config()?,
        Action::Encrypt => collaborators.encrypt_config()?,
        Action::Decrypt => collaborators.decrypt_config()?,
        Action::DownloadsScan => collaborators.scan_downloads()?,
        Action::DownloadsSearch => {
            collaborators.search_downloads(required(descriptor.artist(), "an artist")?)?
        }
        Action::DownloadsMetadata => {
            collaborators.download_metadata(*required(ids.first(), "a torrent id")?)?
        }
        Action::DownloadsSort => collaborators.sort_downloads(ids.first().copied())?,
        Action::DownloadsList => collaborators
            .list_downloads(required(descriptor.download_state(), "a download state")?)?,
        Action::DownloadsClean => collaborators.clean_downloads()?,
        Action::DownloadsFuse => collaborators.mount_fuse(
            FuseSource::Downloads,
            required(descriptor.mount_point(), "a mount point")?,
        )?,
        Action::LibraryFuse => collaborators.mount_fuse(
            FuseSource::Library,
            required(descriptor.mount_point(), "a mount point")?,
        )?,
        action @ (Action::Start | Action::Stop | Action::Uptime | Action::Status) => {
            return Err(DispatchError::DaemonUnavailable { action })
        }
    }
    Ok(())
}

fn required<T>(value: Option<T>, what: &str) -> Result<T, DispatchError> {
    value.ok_or_else(|| DispatchError::InvalidArguments(format!("missing {what}")))
}
