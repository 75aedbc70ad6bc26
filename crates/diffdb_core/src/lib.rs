//! # DiffDB Core
//!
//! Persistent change tracking for ingestion pipelines.
//!
//! A pipeline that polls a slow upstream source hands every row it sees to
//! [`Differential::add`]. Rows whose content has not changed since they were
//! last applied are dropped on the spot; changed rows are staged. Later,
//! [`Differential::each`] hands the staged rows to a callback and promotes
//! the ones it accepts. Rejected rows stay staged for the next scan, so a
//! failing downstream never loses a change.
//!
//! This crate provides:
//! - [`Database`]: a directory (or in-memory) store of named collections
//! - [`Differential`]: the change-tracking state of one collection
//! - An apply engine with cancellation ([`Cancellation`]) and per-item
//!   failure reporting ([`ApplyErrors`])
//! - Optional conflict tracking that rejects an identity staged twice in
//!   one cycle
//!
//! State lives in a bucket store rebuilt from a CRC-checked commit log; see
//! [`store`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod cancel;
mod config;
mod database;
mod differential;
#[cfg(feature = "std")]
mod dir;
mod error;
mod layout;
pub mod store;

pub use apply::{ApplyErrors, ApplyFailure, BoxError};
pub use cancel::{CancelToken, Cancellation, NeverCancel};
pub use config::Config;
pub use database::Database;
pub use differential::{Differential, UserData, UserDataMut};
pub use error::{CoreError, CoreResult};
pub use layout::{COMMITTED, CONFLICTS, PAYLOADS, PENDING, USER_DATA};

pub use diffdb_codec::{Decoder, Fingerprint};
