//! # DiffDB Storage
//!
//! Byte backends underneath the DiffDB commit log.
//!
//! A backend knows nothing about buckets, fingerprints or log records. It
//! stores an append-only run of bytes and can read any range back, flush,
//! sync, and cut the tail off after a torn write.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral databases and tests
//! - [`FileBackend`] - a single file on disk
//!
//! ## Example
//!
//! ```rust
//! use diffdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"commit").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"commit");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
