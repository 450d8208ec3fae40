//! Client side of the command transport.
//!
//! The foreground process is synchronous: it opens one connection per
//! command, hands the message over and closes. Delivery is at-most-once and
//! the daemon does not acknowledge, so success only means the bytes reached
//! the socket. `status` is the single exception and waits for a
//! [`StatusReport`].

pub mod connection;

pub use connection::UnixSocketTransport;

use std::path::PathBuf;

use thiserror::Error;

use crate::ipc::{StatusReport, TransportMessage};

/// Errors raised while talking to the daemon.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nothing accepted the connection.
    #[error("cannot connect to the daemon socket {path}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The connection broke while sending.
    #[error("failed to send the command to the daemon")]
    Write(#[source] std::io::Error),

    /// The connection broke while waiting for the status report.
    #[error("failed to read the daemon's answer")]
    Read(#[source] std::io::Error),

    /// The message could not be serialized.
    #[error("failed to encode the command")]
    Encode(#[source] serde_json::Error),

    /// The daemon answered with something that is not a status report.
    #[error("malformed answer from the daemon")]
    Decode(#[source] serde_json::Error),
}

/// Delivers commands to a running daemon.
pub trait CommandTransport {
    /// Fire-and-forget delivery of one message.
    fn deliver(&self, message: &TransportMessage) -> Result<(), TransportError>;

    /// Sends `status` and waits for the daemon's report.
    fn query_status(&self) -> Result<StatusReport, TransportError>;
}
