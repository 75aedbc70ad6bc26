//! The apply engine behind [`Differential::each`](crate::Differential::each).
//!
//! One scan is one write transaction. Every pending item is handed to the
//! caller's callback in ascending identity order; items it accepts move to
//! the committed region, items it rejects stay pending. The transaction
//! commits even when some items failed, so the successes are never lost.

use crate::cancel::Cancellation;
use crate::error::CoreResult;
use crate::layout::{payload_key, Regions};
use crate::store::{TxRead, WriteTx};
use diffdb_codec::Decoder;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

/// Boxed error returned by an apply callback.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// One item that did not get applied.
#[derive(Debug, Error)]
pub enum ApplyFailure {
    /// The callback rejected this identity. It stays pending.
    #[error("apply failed for {}: {source}", String::from_utf8_lossy(id))]
    Item {
        /// The rejected identity.
        id: Vec<u8>,
        /// What the callback returned.
        source: BoxError,
    },

    /// The scan stopped early. Everything not yet visited stays pending.
    #[error("scan cancelled")]
    Cancelled,
}

/// Every failure one scan ran into, in the order they happened.
#[derive(Debug, Default)]
pub struct ApplyErrors {
    failures: Vec<ApplyFailure>,
}

impl ApplyErrors {
    fn push(&mut self, failure: ApplyFailure) {
        self.failures.push(failure);
    }

    /// All failures in encounter order.
    #[must_use]
    pub fn failures(&self) -> &[ApplyFailure] {
        &self.failures
    }

    /// Number of failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// True if nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// True if the scan was cut short by its cancellation token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.failures
            .iter()
            .any(|failure| matches!(failure, ApplyFailure::Cancelled))
    }

    /// Identities the callback rejected.
    pub fn failed_ids(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.failures.iter().filter_map(|failure| match failure {
            ApplyFailure::Item { id, .. } => Some(id.as_slice()),
            ApplyFailure::Cancelled => None,
        })
    }
}

impl fmt::Display for ApplyErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.len() {
            1 => write!(f, "1 error occurred:")?,
            n => write!(f, "{n} errors occurred:")?,
        }
        for failure in &self.failures {
            write!(f, "\n\t* {failure}")?;
        }
        Ok(())
    }
}

impl StdError for ApplyErrors {}

impl IntoIterator for ApplyErrors {
    type Item = ApplyFailure;
    type IntoIter = std::vec::IntoIter<ApplyFailure>;

    fn into_iter(self) -> Self::IntoIter {
        self.failures.into_iter()
    }
}

/// Tally of one finished scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ScanStats {
    pub visited: usize,
    pub applied: usize,
    pub failed: usize,
}

/// A scan in progress. Owns the write transaction; dropping it without
/// [`Scan::finish`] rolls everything back.
pub(crate) struct Scan<'a> {
    tx: WriteTx<'a>,
    regions: &'a Regions,
    errors: ApplyErrors,
    stats: ScanStats,
}

impl<'a> Scan<'a> {
    pub(crate) fn new(tx: WriteTx<'a>, regions: &'a Regions) -> Self {
        Self {
            tx,
            regions,
            errors: ApplyErrors::default(),
            stats: ScanStats::default(),
        }
    }

    /// Visits every pending item.
    ///
    /// # Panics
    ///
    /// Panics if a pending record has no payload. That state cannot be
    /// produced through this crate.
    pub(crate) fn run<C, F, E>(&mut self, cancel: &C, mut apply: F) -> CoreResult<()>
    where
        C: Cancellation + ?Sized,
        F: FnMut(&[u8], &Decoder<'_>) -> Result<(), E>,
        E: Into<BoxError>,
    {
        let pending: Vec<(Vec<u8>, Vec<u8>)> = self
            .tx
            .bucket(&self.regions.pending())?
            .iter()
            .map(|(id, hash)| (id.to_vec(), hash.to_vec()))
            .collect();
        let total = pending.len();

        for (id, hash) in pending {
            if cancel.is_cancelled() {
                debug!(remaining = total - self.stats.visited, "scan cancelled");
                self.errors.push(ApplyFailure::Cancelled);
                break;
            }
            self.stats.visited += 1;

            let payload_key = payload_key(&hash, &id);
            let outcome = {
                let Some(data) = self.tx.get(&self.regions.payloads(), &payload_key)? else {
                    panic!(
                        "pending record {} has no payload",
                        String::from_utf8_lossy(&id)
                    );
                };
                apply(&id, &Decoder::new(data))
            };

            match outcome {
                Ok(()) => {
                    self.tx.put(&self.regions.committed(), &id, hash)?;
                    self.tx.delete(&self.regions.pending(), &id)?;
                    self.tx.delete(&self.regions.payloads(), &payload_key)?;
                    self.stats.applied += 1;
                    trace!(id = %String::from_utf8_lossy(&id), "applied");
                }
                Err(err) => {
                    let source: BoxError = err.into();
                    trace!(id = %String::from_utf8_lossy(&id), error = %source, "apply failed");
                    self.errors.push(ApplyFailure::Item { id, source });
                    self.stats.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Commits the applied items and reports what failed.
    pub(crate) fn finish(self) -> CoreResult<()> {
        let Self {
            tx, errors, stats, ..
        } = self;
        tx.commit()?;
        debug!(
            visited = stats.visited,
            applied = stats.applied,
            failed = stats.failed,
            cancelled = errors.is_cancelled(),
            "scan finished"
        );
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}
