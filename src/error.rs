//! Error types for the layerdiff library
//!
//! Every operation in this crate returns [`Result`], whose error type is
//! [`DiffError`]. Errors are fatal to the walk that produced them: the first
//! error observed stops all in-flight work and is returned to the caller.
//! The only filesystem condition that is *not* an error is a missing entry in
//! the base tree, which the walkers treat as "absent in base".

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the layerdiff library
pub type Result<T> = std::result::Result<T, DiffError>;

/// Main error type for all diff operations
#[derive(Debug, Error)]
pub enum DiffError {
    /// I/O errors while reading metadata or file content
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// A walked path did not live under the root it was walked from
    #[error("Path {path:?} is not under walk root {root:?}")]
    OutsideRoot {
        /// Path reported by the walker
        path: PathBuf,
        /// Root the walk started from
        root: PathBuf,
    },

    /// The requested diff source is not a recognised union filesystem
    #[error("unknown diff change source: {0}")]
    UnknownDiffSource(String),

    /// The walk was cancelled through its cancellation token
    #[error("Diff cancelled")]
    Cancelled,

    /// A producer task panicked or was aborted
    #[error("Walker task failed: {0}")]
    TaskJoin(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Error raised by a change callback
    #[error("Change callback failed: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Custom error type for callers
    #[error("{0}")]
    Custom(String),
}

impl From<tokio::task::JoinError> for DiffError {
    fn from(err: tokio::task::JoinError) -> Self {
        DiffError::TaskJoin(err.to_string())
    }
}

impl DiffError {
    /// Wrap an arbitrary error returned from a change callback
    pub fn callback(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        DiffError::Callback(err.into())
    }

    /// Create a custom error with a custom message
    pub fn custom(msg: impl Into<String>) -> Self {
        DiffError::Custom(msg.into())
    }

    /// Check if this error means the walk was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DiffError::Cancelled)
    }

    /// Check if this error is a "no such file or directory" condition
    pub fn is_not_found(&self) -> bool {
        match self {
            DiffError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            DiffError::WalkDir(err) => err
                .io_error()
                .map(|io| io.kind() == std::io::ErrorKind::NotFound)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Check if a lookup failed because the path does not exist
    ///
    /// Besides "not found" this covers a path whose parent is not a
    /// directory, which is how a lookup below a replaced file fails.
    pub fn is_absent(&self) -> bool {
        let io = match self {
            DiffError::Io(err) => Some(err),
            DiffError::WalkDir(err) => err.io_error(),
            _ => None,
        };
        io.map(|err| {
            matches!(
                err.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
            )
        })
        .unwrap_or(false)
    }
}
