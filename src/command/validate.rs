//! Turns a [`CommandRequest`] into a [`CommandDescriptor`].
//!
//! Validation only reads the filesystem (existence, emptiness); it never
//! runs a collaborator or touches the daemon.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Action, CommandDescriptor, CommandRequest, DownloadState};
use crate::error::DispatchError;

/// External executable needed to unmount a FUSE view.
pub const UNMOUNT_HELPER: &str = "fusermount";

/// Directory a release folder keeps its tracker metadata in.
pub const METADATA_DIR: &str = "TrackerMetadata";

const MUSIC_EXTENSIONS: [&str; 2] = ["flac", "mp3"];

/// Validates raw requests.
///
/// The search-path lookup for [`UNMOUNT_HELPER`] is injectable so that the
/// FUSE preconditions can be exercised on machines without FUSE.
#[derive(Clone, Copy)]
pub struct Validator {
    helper_on_path: fn(&str) -> bool,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    /// Validator that looks executables up on `PATH`.
    pub fn new() -> Self {
        Self {
            helper_on_path: |name| which::which(name).is_ok(),
        }
    }

    /// Validator with a custom executable lookup.
    pub fn with_helper_lookup(helper_on_path: fn(&str) -> bool) -> Self {
        Self { helper_on_path }
    }

    /// Checks `request` and builds the descriptor.
    ///
    /// Malformed values are `InvalidArguments`; an environment that cannot
    /// serve the request (missing unmount helper, unusable mount point) is
    /// `PreconditionFailed`.
    pub fn validate(&self, request: CommandRequest) -> Result<CommandDescriptor, DispatchError> {
        check_shape(&request)?;
        let action = request.action;

        let reseed_path = match &request.path {
            Some(path) => Some(check_release_dir(path)?),
            None => None,
        };

        let target_ids = request
            .ids
            .iter()
            .map(|token| parse_torrent_id(token))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(mount_point) = &request.mount_point {
            self.check_mount_point(mount_point)?;
        }

        let download_state = match &request.download_state {
            Some(raw) => Some(raw.parse::<DownloadState>().map_err(|bad| {
                DispatchError::InvalidArguments(format!(
                    "invalid download state '{bad}', must be among: {}",
                    DownloadState::valid_names()
                ))
            })?),
            None => None,
        };

        let log_file = match &request.log_file {
            Some(path) => Some(check_log_file(path)?),
            None => None,
        };

        debug!(action = %action, ids = target_ids.len(), "command validated");
        Ok(CommandDescriptor {
            action,
            target_ids,
            tracker: request.tracker,
            log_file,
            artist: request.artist,
            download_state,
            mount_point: request.mount_point,
            reseed_path,
            use_fl_token: request.use_fl_token,
        })
    }

    fn check_mount_point(&self, mount_point: &Path) -> Result<(), DispatchError> {
        if !(self.helper_on_path)(UNMOUNT_HELPER) {
            return Err(DispatchError::PreconditionFailed(format!(
                "{UNMOUNT_HELPER} is not available on this system, cannot use the fuse command"
            )));
        }
        if !mount_point.is_dir() {
            return Err(DispatchError::PreconditionFailed(format!(
                "fuse mount point {} does not exist",
                mount_point.display()
            )));
        }
        let mut entries = fs::read_dir(mount_point).map_err(|e| {
            DispatchError::PreconditionFailed(format!(
                "could not open fuse mount point {}: {e}",
                mount_point.display()
            ))
        })?;
        if entries.next().is_some() {
            return Err(DispatchError::PreconditionFailed(format!(
                "fuse mount point {} is not empty",
                mount_point.display()
            )));
        }
        Ok(())
    }
}

/// Rejects requests whose fields do not match what the action takes.
fn check_shape(request: &CommandRequest) -> Result<(), DispatchError> {
    let action = request.action;
    let invalid = |message: String| Err(DispatchError::InvalidArguments(message));

    match (action.needs_tracker(), request.tracker.is_some()) {
        (true, false) => return invalid(format!("'{action}' needs a tracker label")),
        (false, true) => return invalid(format!("'{action}' does not take a tracker label")),
        _ => {}
    }

    let ids = request.ids.len();
    let ids_ok = match action {
        Action::RefreshMetadata | Action::Snatch | Action::Info => ids >= 1,
        Action::DownloadsMetadata => ids == 1,
        Action::DownloadsSort => ids <= 1,
        _ => ids == 0,
    };
    if !ids_ok {
        return invalid(match action {
            Action::RefreshMetadata | Action::Snatch | Action::Info => {
                format!("'{action}' needs at least one torrent id")
            }
            Action::DownloadsMetadata => format!("'{action}' needs exactly one download id"),
            Action::DownloadsSort => format!("'{action}' takes at most one download id"),
            _ => format!("'{action}' does not take ids"),
        });
    }

    let fields = [
        ("a log file", request.log_file.is_some(), action == Action::CheckLog),
        ("an artist", request.artist.is_some(), action == Action::DownloadsSearch),
        (
            "a download state",
            request.download_state.is_some(),
            action == Action::DownloadsList,
        ),
        (
            "a mount point",
            request.mount_point.is_some(),
            matches!(action, Action::DownloadsFuse | Action::LibraryFuse),
        ),
        ("a path", request.path.is_some(), action == Action::Reseed),
    ];
    for (name, present, wanted) in fields {
        if present && !wanted {
            return invalid(format!("'{action}' does not take {name}"));
        }
        if wanted && !present {
            return invalid(format!("'{action}' needs {name}"));
        }
    }

    if request.use_fl_token && action != Action::Snatch {
        return invalid(format!("--fl only applies to snatch, not '{action}'"));
    }
    Ok(())
}

fn parse_torrent_id(token: &str) -> Result<u64, DispatchError> {
    match token.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(DispatchError::InvalidArguments(format!(
            "invalid torrent id '{token}', must be a positive integer"
        ))),
    }
}

fn check_log_file(path: &Path) -> Result<PathBuf, DispatchError> {
    if !path.is_file() {
        return Err(DispatchError::InvalidArguments(format!(
            "invalid log file {}, does not exist",
            path.display()
        )));
    }
    absolute(path)
}

fn check_release_dir(path: &Path) -> Result<PathBuf, DispatchError> {
    if !path.is_dir() {
        return Err(DispatchError::InvalidArguments(format!(
            "target path {} does not exist",
            path.display()
        )));
    }
    if !contains_music_and_metadata(path) {
        return Err(DispatchError::InvalidArguments(format!(
            "target path {} does not seem to contain music files and tracker metadata",
            path.display()
        )));
    }
    absolute(path)
}

/// The daemon runs from `/`, so paths are made absolute before they leave
/// this process. The wire carries paths as UTF-8 text, anything else could
/// not reach the daemon unchanged.
fn absolute(path: &Path) -> Result<PathBuf, DispatchError> {
    let resolved = fs::canonicalize(path).map_err(|e| {
        DispatchError::InvalidArguments(format!("cannot resolve {}: {e}", path.display()))
    })?;
    if resolved.to_str().is_none() {
        return Err(DispatchError::InvalidArguments(format!(
            "path {} is not valid UTF-8",
            resolved.display()
        )));
    }
    Ok(resolved)
}

/// True when `dir` has a tracker metadata folder and at least one music file
/// somewhere below it.
pub fn contains_music_and_metadata(dir: &Path) -> bool {
    dir.join(METADATA_DIR).is_dir() && contains_music(dir)
}

fn contains_music(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let path = entry.path();
        if path.is_dir() {
            contains_music(&path)
        } else {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    MUSIC_EXTENSIONS
                        .iter()
                        .any(|music| ext.eq_ignore_ascii_case(music))
                })
        }
    })
}
