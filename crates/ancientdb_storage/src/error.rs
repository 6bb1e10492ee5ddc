//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by backends and volumes.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The operating system reported an error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read ran past the last byte of a file.
    #[error("read of {len} bytes at offset {offset} runs past end of file ({size} bytes)")]
    ReadPastEnd {
        /// Offset of the read.
        offset: u64,
        /// Length of the read.
        len: usize,
        /// Size of the file.
        size: u64,
    },

    /// A truncation asked a file to grow.
    #[error("cannot truncate {size}-byte file to {requested} bytes")]
    TruncateBeyondEnd {
        /// Requested size.
        requested: u64,
        /// Size of the file.
        size: u64,
    },

    /// The named file does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// A mutating operation was attempted on read-only storage.
    #[error("storage is read-only")]
    ReadOnly,

    /// Another process holds the directory lock.
    #[error("directory locked by another process: {}", .0.display())]
    Locked(PathBuf),
}
