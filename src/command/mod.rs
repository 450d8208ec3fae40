//! Command descriptors: one parsed, validated user request.
//!
//! Raw input arrives as a [`CommandRequest`] (straight from the command
//! line, ids still as text). A [`Validator`] turns it into an immutable
//! [`CommandDescriptor`] or rejects it before anything runs or any daemon is
//! contacted.

pub mod routing;
pub mod validate;

pub use routing::{classify, Routing, RoutingClass};
pub use validate::{Validator, UNMOUNT_HELPER};

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

/// Every request varroa understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Start,
    Stop,
    Uptime,
    Status,
    Stats,
    RefreshMetadata,
    CheckLog,
    Snatch,
    Info,
    Backup,
    ShowConfig,
    Encrypt,
    Decrypt,
    DownloadsScan,
    DownloadsSearch,
    DownloadsMetadata,
    DownloadsSort,
    DownloadsList,
    DownloadsClean,
    DownloadsFuse,
    LibraryFuse,
    Reseed,
}

impl Action {
    /// All actions, in usage order.
    pub const ALL: [Action; 22] = [
        Action::Start,
        Action::Stop,
        Action::Uptime,
        Action::Status,
        Action::Stats,
        Action::RefreshMetadata,
        Action::CheckLog,
        Action::Snatch,
        Action::Info,
        Action::Backup,
        Action::ShowConfig,
        Action::Encrypt,
        Action::Decrypt,
        Action::DownloadsScan,
        Action::DownloadsSearch,
        Action::DownloadsMetadata,
        Action::DownloadsSort,
        Action::DownloadsList,
        Action::DownloadsClean,
        Action::DownloadsFuse,
        Action::LibraryFuse,
        Action::Reseed,
    ];

    /// Name used on the wire and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Uptime => "uptime",
            Action::Status => "status",
            Action::Stats => "stats",
            Action::RefreshMetadata => "refresh-metadata",
            Action::CheckLog => "check-log",
            Action::Snatch => "snatch",
            Action::Info => "info",
            Action::Backup => "backup",
            Action::ShowConfig => "show-config",
            Action::Encrypt => "encrypt",
            Action::Decrypt => "decrypt",
            Action::DownloadsScan => "downloads-scan",
            Action::DownloadsSearch => "downloads-search",
            Action::DownloadsMetadata => "downloads-metadata",
            Action::DownloadsSort => "downloads-sort",
            Action::DownloadsList => "downloads-list",
            Action::DownloadsClean => "downloads-clean",
            Action::DownloadsFuse => "downloads-fuse",
            Action::LibraryFuse => "library-fuse",
            Action::Reseed => "reseed",
        }
    }

    /// Actions addressed to a tracker, which need a tracker label.
    pub fn needs_tracker(&self) -> bool {
        matches!(
            self,
            Action::RefreshMetadata
                | Action::CheckLog
                | Action::Snatch
                | Action::Info
                | Action::Reseed
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action name that is not part of the closed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command '{0}'")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// Lifecycle state of a release in the downloads folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Unsorted,
    Accepted,
    Exported,
    Rejected,
}

impl DownloadState {
    pub const ALL: [DownloadState; 4] = [
        DownloadState::Unsorted,
        DownloadState::Accepted,
        DownloadState::Exported,
        DownloadState::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadState::Unsorted => "unsorted",
            DownloadState::Accepted => "accepted",
            DownloadState::Exported => "exported",
            DownloadState::Rejected => "rejected",
        }
    }

    /// Comma-separated list of valid state names, for error messages.
    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(DownloadState::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DownloadState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Which tree a read-only FUSE view exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuseSource {
    Downloads,
    Library,
}

impl FuseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuseSource::Downloads => "downloads",
            FuseSource::Library => "library",
        }
    }
}

/// Unvalidated request as it comes off the command line.
///
/// Torrent ids are kept as text so that a malformed id is reported by the
/// validator as an invalid argument rather than as a parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub action: Action,
    pub tracker: Option<String>,
    pub ids: Vec<String>,
    pub log_file: Option<PathBuf>,
    pub artist: Option<String>,
    pub download_state: Option<String>,
    pub mount_point: Option<PathBuf>,
    pub path: Option<PathBuf>,
    pub use_fl_token: bool,
}

impl CommandRequest {
    /// A request carrying nothing but the action.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            tracker: None,
            ids: Vec::new(),
            log_file: None,
            artist: None,
            download_state: None,
            mount_point: None,
            path: None,
            use_fl_token: false,
        }
    }

    pub fn tracker(mut self, tracker: impl Into<String>) -> Self {
        self.tracker = Some(tracker.into());
        self
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn download_state(mut self, state: impl Into<String>) -> Self {
        self.download_state = Some(state.into());
        self
    }

    pub fn mount_point(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_point = Some(path.into());
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_fl_token(mut self, use_fl_token: bool) -> Self {
        self.use_fl_token = use_fl_token;
        self
    }
}

/// A validated request. Which optional fields are set is fully determined
/// by the action; only [`Validator::validate`] constructs one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub(crate) action: Action,
    pub(crate) target_ids: Vec<u64>,
    pub(crate) tracker: Option<String>,
    pub(crate) log_file: Option<PathBuf>,
    pub(crate) artist: Option<String>,
    pub(crate) download_state: Option<DownloadState>,
    pub(crate) mount_point: Option<PathBuf>,
    pub(crate) reseed_path: Option<PathBuf>,
    pub(crate) use_fl_token: bool,
}

impl CommandDescriptor {
    pub fn action(&self) -> Action {
        self.action
    }

    pub fn target_ids(&self) -> &[u64] {
        &self.target_ids
    }

    pub fn tracker(&self) -> Option<&str> {
        self.tracker.as_deref()
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    pub fn artist(&self) -> Option<&str> {
        self.artist.as_deref()
    }

    pub fn download_state(&self) -> Option<DownloadState> {
        self.download_state
    }

    pub fn mount_point(&self) -> Option<&Path> {
        self.mount_point.as_deref()
    }

    pub fn reseed_path(&self) -> Option<&Path> {
        self.reseed_path.as_deref()
    }

    pub fn use_fl_token(&self) -> bool {
        self.use_fl_token
    }

    /// Routing of this descriptor's action.
    pub fn routing(&self) -> Routing {
        classify(self.action)
    }
}
