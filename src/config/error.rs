//! Errors raised while reading, validating or writing the configuration file.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration {path}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// TOML syntax or type mismatch. `line` and `column` are one-based, zero
    /// when the parser gave no position.
    #[error("invalid configuration at {path}:{line}:{column}: {message}")]
    ParseError {
        path: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    /// Only raised for a file named with `--config`; a missing default file
    /// means defaults.
    #[error("configuration file {path} does not exist")]
    NotFound { path: PathBuf },

    #[error("configuration file {path} already exists, use --force to replace it")]
    AlreadyExists { path: PathBuf },

    #[error("cannot write configuration {path}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `key` is dotted, e.g. `daemon.stats_interval`.
    #[error("{key} = '{value}' is not a duration ({message})")]
    InvalidDuration {
        key: String,
        value: String,
        message: String,
    },
}
