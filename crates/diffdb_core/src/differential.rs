//! Change tracking for one named collection.

use crate::apply::{BoxError, Scan};
use crate::cancel::Cancellation;
use crate::error::{CoreError, CoreResult};
use crate::layout::{payload_key, Regions};
use crate::store::{Bucket, Store, TxRead, WriteTx};
use diffdb_codec::{encode, fingerprint, Decoder};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// A named collection of tracked items.
///
/// Each item is known by a caller-chosen identity, for example the primary
/// key of an upstream row. [`Differential::add`] stages a value when its
/// fingerprint differs from the last applied one; [`Differential::each`]
/// hands staged values to the caller and promotes the ones it accepts.
///
/// Obtained from [`Database::open_differential`](crate::Database::open_differential).
///
/// ```
/// use diffdb_core::{Database, NeverCancel};
///
/// let db = Database::open_in_memory().unwrap();
/// let rows = db.open_differential("rows").unwrap();
///
/// rows.add(b"1", &("alice", 30u32)).unwrap();
/// assert_eq!(rows.count_changes().unwrap(), 1);
///
/// rows.each(&NeverCancel, |_id, data| {
///     let (_name, _age): (String, u32) = data.decode()?;
///     Ok::<_, diffdb_core::CoreError>(())
/// })
/// .unwrap();
///
/// assert_eq!(rows.count_tracking().unwrap(), 1);
/// assert!(!rows.changed(b"1", &("alice", 30u32)).unwrap());
/// ```
#[derive(Debug)]
pub struct Differential {
    name: String,
    regions: Regions,
    store: Arc<Store>,
    track_conflicts: AtomicBool,
}

impl Differential {
    pub(crate) fn new(name: &str, store: Arc<Store>) -> Self {
        Self {
            name: name.to_string(),
            regions: Regions::new(name),
            store,
            track_conflicts: AtomicBool::new(false),
        }
    }

    /// Collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once [`Differential::reset_conflict_tracking`] has succeeded on
    /// this handle.
    #[must_use]
    pub fn is_tracking_conflicts(&self) -> bool {
        self.track_conflicts.load(Ordering::Acquire)
    }

    /// Stages `value` as the latest state of `id`.
    ///
    /// Nothing is written when `value` fingerprints the same as the applied
    /// state, or the same as what is already staged. Otherwise the staged
    /// value, if any, is replaced.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ConflictingKey`] if conflict tracking is on and `id`
    ///   was already staged this cycle. Nothing is written.
    /// - [`CoreError::Codec`] if `value` cannot be fingerprinted or encoded.
    pub fn add<T: Serialize + ?Sized>(&self, id: &[u8], value: &T) -> CoreResult<()> {
        let tracking = self.is_tracking_conflicts();
        let mut tx = self.store.begin_write()?;

        if tracking && tx.get(&self.regions.conflicts(), id)?.is_some() {
            return Err(CoreError::conflicting_key(&self.name, id));
        }

        let hash = fingerprint(value)?.to_bytes();
        if tx.get(&self.regions.committed(), id)? == Some(&hash[..]) {
            trace!(collection = %self.name, "unchanged since last apply");
            return Ok(());
        }

        let staged = tx.get(&self.regions.pending(), id)?.map(<[u8]>::to_vec);
        if let Some(staged) = staged {
            if staged == hash {
                trace!(collection = %self.name, "already staged");
                return Ok(());
            }
            tx.delete(&self.regions.payloads(), &payload_key(&staged, id))?;
        }

        tx.put(&self.regions.pending(), id, hash.to_vec())?;
        tx.put(
            &self.regions.payloads(),
            &payload_key(&hash, id),
            encode(value)?,
        )?;
        if tracking {
            tx.put(&self.regions.conflicts(), id, Vec::new())?;
        }
        tx.commit()
    }

    /// True unless `value` fingerprints the same as the applied state of
    /// `id`. Staged values are not consulted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if `value` cannot be fingerprinted.
    pub fn changed<T: Serialize + ?Sized>(&self, id: &[u8], value: &T) -> CoreResult<bool> {
        let hash = fingerprint(value)?.to_bytes();
        self.store.view(|tx| {
            Ok(tx.get(&self.regions.committed(), id)? != Some(&hash[..]))
        })
    }

    /// Number of identities with an applied state.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection was deleted or the database closed.
    pub fn count_tracking(&self) -> CoreResult<usize> {
        self.store.view(|tx| tx.len(&self.regions.committed()))
    }

    /// Number of identities with a staged change.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection was deleted or the database closed.
    pub fn count_changes(&self) -> CoreResult<usize> {
        self.store.view(|tx| tx.len(&self.regions.pending()))
    }

    /// Starts a fresh conflict-tracking cycle.
    ///
    /// Clears every conflict marker and, once that commits, makes later
    /// [`Differential::add`] calls on this handle reject an identity staged
    /// twice in the same cycle.
    ///
    /// # Errors
    ///
    /// Returns the store error. Tracking is left as it was.
    pub fn reset_conflict_tracking(&self) -> CoreResult<()> {
        self.store.update(|tx| {
            let conflicts = self.regions.conflicts();
            if tx.bucket_exists(&conflicts) {
                tx.delete_bucket(&conflicts)?;
            }
            tx.create_bucket(&conflicts)
        })?;
        self.track_conflicts.store(true, Ordering::Release);
        Ok(())
    }

    /// Hands every staged change to `apply`, in ascending identity order.
    ///
    /// An item whose callback returns `Ok` becomes the applied state for its
    /// identity. An item whose callback fails stays staged for the next
    /// scan. `cancel` is checked before every item; once it fires the scan
    /// stops and everything not yet visited stays staged.
    ///
    /// `apply` runs while the database is locked for writing and must not
    /// call back into it.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Apply`] listing every rejected item, plus
    ///   [`ApplyFailure::Cancelled`](crate::ApplyFailure::Cancelled) if the
    ///   scan stopped early. The accepted items are committed regardless.
    /// - Any store error. Nothing from this scan is committed then.
    ///
    /// # Panics
    ///
    /// Panics if a staged record has lost its payload.
    pub fn each<C, F, E>(&self, cancel: &C, apply: F) -> CoreResult<()>
    where
        C: Cancellation + ?Sized,
        F: FnMut(&[u8], &Decoder<'_>) -> Result<(), E>,
        E: Into<BoxError>,
    {
        let mut scan = Scan::new(self.store.begin_write()?, &self.regions);
        scan.run(cancel, apply)?;
        scan.finish()
    }

    /// Runs `f` against the caller bookkeeping region.
    ///
    /// # Errors
    ///
    /// Returns the error from `f` or the store.
    pub fn view_user_data<F, R>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&UserData<'_>) -> CoreResult<R>,
    {
        self.store.view(|tx| {
            let bucket = tx.bucket(&self.regions.user_data())?;
            f(&UserData { bucket })
        })
    }

    /// Runs `f` against the caller bookkeeping region in a write
    /// transaction. An `Err` from `f` discards its changes.
    ///
    /// ```
    /// use diffdb_core::Database;
    ///
    /// let db = Database::open_in_memory().unwrap();
    /// let rows = db.open_differential("rows").unwrap();
    /// rows.update_user_data(|ud| ud.put(b"last_run", b"2024-01-01".to_vec()))
    ///     .unwrap();
    /// let last = rows
    ///     .view_user_data(|ud| Ok(ud.get(b"last_run").map(<[u8]>::to_vec)))
    ///     .unwrap();
    /// assert_eq!(last.as_deref(), Some(&b"2024-01-01"[..]));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns the error from `f` or the store.
    pub fn update_user_data<F, R>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut UserDataMut<'_, '_>) -> CoreResult<R>,
    {
        self.store.update(|tx| {
            let path = self.regions.user_data();
            if !tx.bucket_exists(&path) {
                return Err(CoreError::bucket_not_found(&path));
            }
            f(&mut UserDataMut {
                tx,
                regions: &self.regions,
            })
        })
    }
}

/// Read-only view of a collection's bookkeeping region.
#[derive(Debug, Clone, Copy)]
pub struct UserData<'a> {
    bucket: &'a Bucket,
}

impl<'a> UserData<'a> {
    /// Value under `key`.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&'a [u8]> {
        self.bucket.get(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bucket.len()
    }

    /// True if the region is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bucket.is_empty()
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + 'a {
        self.bucket.iter()
    }
}

/// Writable view of a collection's bookkeeping region.
pub struct UserDataMut<'t, 'a> {
    tx: &'t mut WriteTx<'a>,
    regions: &'t Regions,
}

impl UserDataMut<'_, '_> {
    /// Value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is gone.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<&[u8]>> {
        self.tx.get(&self.regions.user_data(), key)
    }

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is gone.
    pub fn put(&mut self, key: &[u8], value: impl Into<Vec<u8>>) -> CoreResult<()> {
        self.tx.put(&self.regions.user_data(), key, value.into())
    }

    /// Removes `key`, returning whether it was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is gone.
    pub fn delete(&mut self, key: &[u8]) -> CoreResult<bool> {
        self.tx.delete(&self.regions.user_data(), key)
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is gone.
    pub fn len(&self) -> CoreResult<usize> {
        self.tx.len(&self.regions.user_data())
    }

    /// True if the region is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is gone.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Entries in ascending key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is gone.
    pub fn iter(&self) -> CoreResult<impl Iterator<Item = (&[u8], &[u8])> + '_> {
        Ok(self.tx.bucket(&self.regions.user_data())?.iter())
    }
}

impl std::fmt::Debug for UserDataMut<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDataMut")
            .field("regions", &self.regions)
            .finish_non_exhaustive()
    }
}
