//! Wire types exchanged over the daemon's Unix socket.
//!
//! One connection carries exactly one [`TransportMessage`], encoded as a flat
//! JSON object with no framing: the client writes it, shuts down its write
//! half and closes. Only `status` gets an answer, a single [`StatusReport`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::command::{Action, CommandDescriptor, UnknownAction};

/// Upper bound on an inbound message. Anything longer is dropped.
pub const MAX_MESSAGE_BYTES: u64 = 64 * 1024;

/// A command handed to the daemon.
///
/// `{"site": "blue", "command": "snatch", "args": ["101", "202"], "fl_token": true}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessage {
    /// Tracker label, empty when the command is not tracker-facing.
    #[serde(default)]
    pub site: String,
    /// Action name (see [`Action::as_str`]).
    pub command: String,
    /// Torrent ids, or the single log file / release path.
    #[serde(default)]
    pub args: Vec<String>,
    /// Spend a freeleech token (snatch only).
    #[serde(default)]
    pub fl_token: bool,
}

impl TransportMessage {
    /// A message with no tracker and no arguments.
    pub fn control(action: Action) -> Self {
        Self {
            site: String::new(),
            command: action.as_str().to_string(),
            args: Vec::new(),
            fl_token: false,
        }
    }

    /// Encodes a descriptor.
    ///
    /// Lossless for every action that can be forwarded: ids are stringified
    /// in order, a log file or release path becomes the only argument.
    pub fn from_descriptor(descriptor: &CommandDescriptor) -> Self {
        let args = if let Some(path) = descriptor.log_file() {
            vec![path_arg(path)]
        } else if let Some(path) = descriptor.reseed_path() {
            vec![path_arg(path)]
        } else {
            descriptor
                .target_ids()
                .iter()
                .map(u64::to_string)
                .collect()
        };

        Self {
            site: descriptor.tracker().unwrap_or_default().to_string(),
            command: descriptor.action().as_str().to_string(),
            args,
            fl_token: descriptor.use_fl_token(),
        }
    }

    /// The action named by `command`.
    pub fn action(&self) -> Result<Action, UnknownAction> {
        self.command.parse()
    }

    /// `args` read back as torrent ids.
    pub fn target_ids(&self) -> Result<Vec<u64>, String> {
        self.args
            .iter()
            .map(|arg| arg.parse::<u64>().map_err(|_| arg.clone()))
            .collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Descriptor paths are checked to be UTF-8 during validation.
fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// The daemon's answer to `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Pid of the daemon process.
    pub pid: u32,
    /// Seconds since the daemon started serving.
    pub uptime_seconds: u64,
    /// Socket the daemon listens on.
    pub socket_path: String,
    /// Messages executed since start.
    pub commands_handled: u64,
    /// Names of the running background workers.
    pub workers: Vec<String>,
}

impl StatusReport {
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self).map(|json| format!("{json}\n"))
    }
}
