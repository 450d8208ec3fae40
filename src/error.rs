//! Top-level error returned by the dispatcher.

use thiserror::Error;

use crate::client::TransportError;
use crate::collaborators::CollaboratorError;
use crate::command::Action;
use crate::config::ConfigError;
use crate::daemon::LifecycleError;

/// Everything that can end an invocation with a non-zero exit.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A value on the command line is malformed.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The environment cannot serve the request (missing helper, busy mount point).
    #[error("{0}")]
    PreconditionFailed(String),

    /// The action needs a running daemon and none was found.
    #[error(
        "'{action}' needs the daemon, which is not running. \
         Before running a command that requires the daemon, run 'varroa start'."
    )]
    DaemonUnavailable {
        /// The action that was attempted.
        action: Action,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_unavailable_gives_usage_hint() {
        let err = DispatchError::DaemonUnavailable {
            action: Action::Stop,
        };
        let msg = err.to_string();
        assert!(msg.contains("'stop'"));
        assert!(msg.contains("run 'varroa start'"));
    }

    #[test]
    fn invalid_arguments_display() {
        let err = DispatchError::InvalidArguments("invalid torrent id 'abc'".to_string());
        assert_eq!(err.to_string(), "invalid arguments: invalid torrent id 'abc'");
    }

    #[test]
    fn wrapped_errors_are_transparent() {
        let err: DispatchError = CollaboratorError::NotConfigured {
            operation: "stats",
        }
        .into();
        assert!(err.to_string().contains("stats"));
        assert!(matches!(err, DispatchError::Collaborator(_)));
    }
}
