//! Static routing table: how each action relates to the daemon.

use super::Action;

/// Where an action may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingClass {
    /// Never contacts the daemon, even when one is running.
    LocalOnly,
    /// Forwarded when a daemon is running, executed locally otherwise.
    PreferDaemon,
    /// Meaningless without a daemon.
    RequireDaemon,
}

/// Routing decision for one action.
///
/// `requires_daemon` and `can_use_daemon` are independent: an action that
/// cannot use the daemon may still carry `requires_daemon = true`, in which
/// case the flag is never consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routing {
    pub class: RoutingClass,
    pub requires_daemon: bool,
    pub can_use_daemon: bool,
}

impl Routing {
    const fn new(class: RoutingClass, requires_daemon: bool, can_use_daemon: bool) -> Self {
        Self {
            class,
            requires_daemon,
            can_use_daemon,
        }
    }
}

/// Classifies an action. Pure and exhaustive over [`Action`].
pub const fn classify(action: Action) -> Routing {
    use RoutingClass::*;
    match action {
        // start daemonizes itself rather than talking to a daemon
        Action::Start | Action::Stop | Action::Uptime | Action::Status => {
            Routing::new(RequireDaemon, true, true)
        }

        Action::Stats
        | Action::RefreshMetadata
        | Action::CheckLog
        | Action::Snatch
        | Action::Info
        | Action::Reseed => Routing::new(PreferDaemon, false, true),

        Action::ShowConfig | Action::Encrypt | Action::Decrypt => {
            Routing::new(LocalOnly, true, false)
        }

        Action::Backup
        | Action::DownloadsScan
        | Action::DownloadsSearch
        | Action::DownloadsMetadata
        | Action::DownloadsSort
        | Action::DownloadsList
        | Action::DownloadsClean
        | Action::DownloadsFuse
        | Action::LibraryFuse => Routing::new(LocalOnly, false, false),
    }
}
