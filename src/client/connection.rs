//! Unix socket implementation of [`CommandTransport`].

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{CommandTransport, TransportError};
use crate::command::Action;
use crate::ipc::{StatusReport, TransportMessage, MAX_MESSAGE_BYTES};

/// How long `status` waits for the daemon's report.
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Talks to the daemon through its Unix domain socket.
#[derive(Debug, Clone)]
pub struct UnixSocketTransport {
    socket_path: PathBuf,
}

impl UnixSocketTransport {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Connects, writes `message` and closes the write half.
    fn send(&self, message: &TransportMessage) -> Result<UnixStream, TransportError> {
        let payload = message.encode().map_err(TransportError::Encode)?;

        let mut stream =
            UnixStream::connect(&self.socket_path).map_err(|e| TransportError::Connect {
                path: self.socket_path.clone(),
                source: e,
            })?;

        stream
            .write_all(&payload)
            .and_then(|_| stream.flush())
            .map_err(TransportError::Write)?;
        // EOF tells the daemon the message is complete
        stream
            .shutdown(Shutdown::Write)
            .map_err(TransportError::Write)?;

        tracing::debug!(
            command = %message.command,
            socket = %self.socket_path.display(),
            bytes = payload.len(),
            "command handed to the daemon"
        );
        Ok(stream)
    }
}

impl CommandTransport for UnixSocketTransport {
    fn deliver(&self, message: &TransportMessage) -> Result<(), TransportError> {
        self.send(message).map(drop)
    }

    fn query_status(&self) -> Result<StatusReport, TransportError> {
        let stream = self.send(&TransportMessage::control(Action::Status))?;
        stream
            .set_read_timeout(Some(STATUS_TIMEOUT))
            .map_err(TransportError::Read)?;

        let mut answer = String::new();
        stream
            .take(MAX_MESSAGE_BYTES)
            .read_to_string(&mut answer)
            .map_err(TransportError::Read)?;

        serde_json::from_str(answer.trim()).map_err(TransportError::Decode)
    }
}
