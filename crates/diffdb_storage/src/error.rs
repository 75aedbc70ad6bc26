//! Storage error types.

use std::io;
use thiserror::Error;

/// Result type for backend operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a [`crate::StorageBackend`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying file operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read extended past the bytes written so far.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Bytes currently stored.
        size: u64,
    },

    /// A truncate asked for more bytes than are stored.
    #[error("cannot truncate to {requested} bytes, storage holds {size}")]
    TruncateBeyondEnd {
        /// Requested size.
        requested: u64,
        /// Bytes currently stored.
        size: u64,
    },
}
