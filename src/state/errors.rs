//! State storage errors

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for state storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised while loading or persisting replication state.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure
    #[error("I/O error while {context} ({path}): {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// State could not be encoded or decoded
    #[error("serialization error for state '{name}': {message}")]
    Serialization { name: String, message: String },

    /// Stored bytes fail their checksum or are truncated
    #[error("state file {path} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    /// Injected or backend-specific failure
    #[error("state storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}
