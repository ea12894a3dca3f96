//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing a persistent source.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of a stream.
    #[error("read beyond end of stream: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current stream size.
        size: u64,
    },

    /// The on-disk state is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process already holds the directory lock.
    #[error("storage directory is locked by another process: {0}")]
    Locked(String),

    /// A temporary stream was handed back to a source of a different kind.
    #[error("temporary stream does not belong to this source")]
    TemporaryMismatch,

    /// The source is closed.
    #[error("source is closed")]
    Closed,
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        StorageError::Corrupted(msg.into())
    }
}
