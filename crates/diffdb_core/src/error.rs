//! Error types for DiffDB core.

use crate::apply::ApplyErrors;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in DiffDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] diffdb_storage::StorageError),

    /// Payload encoding, decoding or fingerprinting failed.
    #[error("codec error: {0}")]
    Codec(#[from] diffdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An identity was added twice in one conflict-tracking cycle.
    #[error(
        "multiple objects with id {} were added to {collection} in the same cycle",
        String::from_utf8_lossy(id)
    )]
    ConflictingKey {
        /// Collection the add was made against.
        collection: String,
        /// The repeated identity.
        id: Vec<u8>,
    },

    /// The named collection does not exist.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// A bucket on the requested path does not exist.
    #[error("bucket not found: {path}")]
    BucketNotFound {
        /// Slash-joined bucket path.
        path: String,
    },

    /// A bucket was created where one already exists.
    #[error("bucket already exists: {path}")]
    BucketExists {
        /// Slash-joined bucket path.
        path: String,
    },

    /// The commit log is corrupted.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A log record failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the damaged record.
        offset: u64,
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record.
        actual: u32,
    },

    /// The database has been closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Another handle holds the database directory lock.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// The database path is unusable.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Some pending items were not applied.
    #[error(transparent)]
    Apply(#[from] ApplyErrors),
}

impl CoreError {
    /// Creates a conflicting key error.
    pub fn conflicting_key(collection: impl Into<String>, id: &[u8]) -> Self {
        Self::ConflictingKey {
            collection: collection.into(),
            id: id.to_vec(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates a bucket not found error.
    pub fn bucket_not_found(path: &[&[u8]]) -> Self {
        Self::BucketNotFound {
            path: display_path(path),
        }
    }

    /// Creates a bucket exists error.
    pub fn bucket_exists(path: &[&[u8]]) -> Self {
        Self::BucketExists {
            path: display_path(path),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// True for [`CoreError::ConflictingKey`].
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConflictingKey { .. })
    }

    /// The aggregated apply failures, if this is [`CoreError::Apply`].
    #[must_use]
    pub fn apply_errors(&self) -> Option<&ApplyErrors> {
        match self {
            Self::Apply(errors) => Some(errors),
            _ => None,
        }
    }
}

pub(crate) fn display_path(path: &[&[u8]]) -> String {
    path.iter()
        .map(|segment| String::from_utf8_lossy(segment))
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_id_and_collection() {
        let err = CoreError::conflicting_key("rows", b"42");
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "multiple objects with id 42 were added to rows in the same cycle"
        );
    }

    #[test]
    fn bucket_paths_render_slash_joined() {
        let err = CoreError::bucket_not_found(&[&b"rows"[..], &b"_ph"[..]]);
        assert_eq!(err.to_string(), "bucket not found: rows/_ph");
    }
}
