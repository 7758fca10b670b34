//! Error taxonomy shared by every birdfingers crate.
//!
//! Parsing and diffing never fail; everything that touches the filesystem,
//! a subprocess or the network reports one of these variants.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A snapshot id or job id that does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A persistence read or write failed at `path`.
    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A persisted record exists but could not be decoded.
    #[error("unreadable record at {}: {reason}", path.display())]
    Payload { path: PathBuf, reason: String },

    /// The package index or the package manager could not be reached, or
    /// answered with something other than success.
    #[error("{service} unavailable: {reason}")]
    UpstreamUnavailable { service: String, reason: String },

    /// A command could not be started at all.
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// A started command could not be waited on or signalled.
    #[error("process '{program}' failed: {source}")]
    Process {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn upstream(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
