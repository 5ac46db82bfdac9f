// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::fmt;

use thiserror::Error;

/// Which external build step produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    /// Dependency resolution (e.g. `go get`).
    Fetch,
    /// Compilation into the artifact (e.g. `go build`).
    Compile,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStep::Fetch => f.write_str("fetch"),
            BuildStep::Compile => f.write_str("compile"),
        }
    }
}

#[derive(Error, Debug)]
pub enum HotrunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// The watched tree could not be monitored. Fatal to the watch subsystem.
    #[error("cannot watch {path}: {message}")]
    WatchInit { path: String, message: String },

    #[error("{step} step failed: {message}")]
    Build { step: BuildStep, message: String },

    #[error("cannot start user application: {0}")]
    ProcessStart(String),

    #[error("cannot stop user application: {0}")]
    ProcessStop(String),

    /// The hub has shut down and no longer accepts observers.
    #[error("broadcast hub is closed")]
    HubClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<notify::Error> for HotrunError {
    fn from(err: notify::Error) -> Self {
        let path = err
            .paths
            .first()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        let message = match err.kind {
            notify::ErrorKind::Io(ref io) => io.to_string(),
            _ => err.to_string(),
        };
        HotrunError::WatchInit { path, message }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, HotrunError>;
