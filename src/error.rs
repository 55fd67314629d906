//! Typed errors for the relay.
//!
//! Nothing in the polling core propagates these to subscribers; fetch errors
//! are logged and retried, config errors stop the daemon before it starts,
//! and push errors are logged per notification.

use std::{io, path::PathBuf};

use reqwest::StatusCode;
use thiserror::Error;

/// Failure to fetch the next event from the upstream provider.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a response (DNS, connect, timeout, ...).
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-success HTTP status.
    #[error("Unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The provider answered 2xx but reported an API level failure.
    #[error("API error {code}: {message}")]
    Api { code: u32, message: String },

    /// The response body could not be understood.
    #[error("Invalid event payload: {0}")]
    Decode(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("MAILPUSH_CONFIG points to non-existent file: {}", .0.display())]
    Missing(PathBuf),

    #[error("No configuration file found. Tried MAILPUSH_CONFIG and {}", display_paths(.0))]
    NotFound(Vec<PathBuf>),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure to publish a push notification.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Push endpoint answered {0}")]
    Status(StatusCode),

    /// The stored password is not valid base64.
    #[error("Cannot decode push endpoint password: {0}")]
    Password(#[from] base64::DecodeError),
}
