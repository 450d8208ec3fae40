//! varroa library
//!
//! Command routing and daemon control for varroa musica: every command line
//! request is validated into a [`CommandDescriptor`], classified against the
//! static routing table, then run in this process or handed to the
//! background daemon over its Unix socket.
//!
//! # Platform Support
//!
//! This crate supports **Unix-like systems only** (Linux, macOS).
//!
//! Unix-specific features used:
//! - Unix domain sockets for IPC
//! - `fork()` for daemon process creation
//! - Unix signals (SIGTERM, SIGINT) and a pid file for process discovery

/// Client side of the daemon socket.
pub mod client;

/// Operations routed to external subsystems.
pub mod collaborators;

/// Actions, descriptors, validation and routing.
pub mod command;

/// TOML configuration loading, schema and defaults.
pub mod config;

/// Daemon lifecycle, socket server and workers.
pub mod daemon;

pub mod dispatch;

mod error;
pub use error::DispatchError;

/// Wire types shared by client and daemon.
pub mod ipc;

mod health;
pub use health::*;

pub use client::{CommandTransport, TransportError, UnixSocketTransport};
pub use collaborators::{CollaboratorError, Collaborators, ShellCollaborators};
pub use command::{
    classify, Action, CommandDescriptor, CommandRequest, DownloadState, Routing, RoutingClass,
    Validator,
};
pub use daemon::{
    DaemonHandle, DaemonLocator, DaemonSettings, ForkLifecycle, Lifecycle, LifecycleError,
    PidFileLocator, StartOutcome,
};
pub use dispatch::{Dispatcher, Outcome};
pub use ipc::{StatusReport, TransportMessage};
