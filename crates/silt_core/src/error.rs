//! Error types for the engine.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in engine operations.
///
/// Transaction conflicts are not an error: `put` and `delete` report them
/// as `Ok(false)` so callers can retry without unwinding.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage source error.
    #[error("storage error: {0}")]
    Storage(#[from] silt_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The commit log contains a record that passed its checksum but cannot
    /// be decoded. A torn tail is handled by truncation; this is not that.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// The data stream returned fewer or different bytes than the index
    /// recorded for a committed value.
    #[error("data corruption: {message}")]
    DataCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A command referenced a dictionary id that was never registered.
    #[error("unknown dictionary id {id}")]
    UnknownDictionary {
        /// The unregistered id.
        id: u32,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates a data corruption error.
    pub fn data_corruption(message: impl Into<String>) -> Self {
        Self::DataCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
