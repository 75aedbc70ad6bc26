//! # DiffDB Codec
//!
//! Payload encoding and structural fingerprints for DiffDB.
//!
//! Two views of one value live here:
//!
//! - [`encode`] / [`decode`] turn any `serde` type into CBOR bytes and back.
//!   Pending payloads are stored in this form and handed to apply callbacks
//!   through a [`Decoder`].
//! - [`fingerprint`] reduces the same value to an 8-byte [`Fingerprint`] that
//!   is stable across runs and insensitive to map iteration order. DiffDB
//!   compares fingerprints, never payloads, to decide whether an item changed.
//!
//! ## Usage
//!
//! ```
//! use diffdb_codec::{decode, encode, fingerprint};
//!
//! let row = ("id-1", vec![1u32, 2, 3]);
//! let bytes = encode(&row).unwrap();
//! let back: (String, Vec<u32>) = decode(&bytes).unwrap();
//! assert_eq!(back.1, row.1);
//!
//! let before = fingerprint(&row).unwrap();
//! let after = fingerprint(&("id-1", vec![1u32, 2, 4])).unwrap();
//! assert_ne!(before, after);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod fingerprint;

pub use cbor::{decode, encode, Decoder};
pub use error::{CodecError, CodecResult};
pub use fingerprint::{fingerprint, unordered, Fingerprint, Unordered};
