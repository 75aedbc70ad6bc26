//! Transactional bucket store.
//!
//! The committed state is a [`Bucket`] tree held in memory and rebuilt from
//! the [`CommitLog`] on open.
//!
//! ## Concurrency
//!
//! - Readers share the tree through [`ReadTx`].
//! - One [`WriteTx`] at a time holds the tree exclusively for its whole
//!   lifetime. Its mutations land in place and are undone on rollback.
//! - Commit appends a single log record. If the append fails the
//!   transaction is rolled back and the partial record is cut off the log,
//!   so neither memory nor a later replay sees it.
//!
//! A callback running inside a transaction must not open another one on the
//! same store; it would wait on itself.

mod bucket;
mod log;

pub use bucket::Bucket;
pub use log::{compute_crc32, encode_record, CommitLog, LogOp, Recovered, RecordKind};

use crate::error::{CoreError, CoreResult};
use diffdb_storage::StorageBackend;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

fn owned_path(path: &[&[u8]]) -> Vec<Vec<u8>> {
    path.iter().map(|segment| segment.to_vec()).collect()
}

fn borrowed_path(path: &[Vec<u8>]) -> Vec<&[u8]> {
    path.iter().map(Vec::as_slice).collect()
}

/// Read access shared by both transaction kinds.
pub trait TxRead {
    /// The tree as this transaction sees it.
    fn tree(&self) -> &Bucket;

    /// The bucket at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNotFound`] if any segment is missing.
    fn bucket(&self, path: &[&[u8]]) -> CoreResult<&Bucket> {
        self.tree()
            .resolve(path)
            .ok_or_else(|| CoreError::bucket_not_found(path))
    }

    /// The value under `key` in the bucket at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNotFound`] if the bucket is missing.
    fn get(&self, path: &[&[u8]], key: &[u8]) -> CoreResult<Option<&[u8]>> {
        Ok(self.bucket(path)?.get(key))
    }

    /// True if a bucket exists at `path`.
    fn bucket_exists(&self, path: &[&[u8]]) -> bool {
        self.tree().resolve(path).is_some()
    }

    /// Number of entries in the bucket at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNotFound`] if the bucket is missing.
    fn len(&self, path: &[&[u8]]) -> CoreResult<usize> {
        Ok(self.bucket(path)?.len())
    }
}

/// Shared, read-only view of committed state.
pub struct ReadTx<'a> {
    tree: RwLockReadGuard<'a, Bucket>,
}

impl TxRead for ReadTx<'_> {
    fn tree(&self) -> &Bucket {
        &self.tree
    }
}

enum Undo {
    Entry {
        path: Vec<Vec<u8>>,
        key: Vec<u8>,
        previous: Option<Vec<u8>>,
    },
    CreatedBucket {
        path: Vec<Vec<u8>>,
    },
    DeletedBucket {
        path: Vec<Vec<u8>>,
        bucket: Bucket,
    },
}

/// Exclusive read-write transaction.
///
/// Dropped without [`WriteTx::commit`], every change is undone.
pub struct WriteTx<'a> {
    store: &'a Store,
    tree: RwLockWriteGuard<'a, Bucket>,
    undo: Vec<Undo>,
    ops: Vec<LogOp>,
    finished: bool,
}

impl TxRead for WriteTx<'_> {
    fn tree(&self) -> &Bucket {
        &self.tree
    }
}

impl<'a> WriteTx<'a> {
    fn parent_and_name<'p>(
        &mut self,
        path: &[&'p [u8]],
    ) -> CoreResult<(&mut Bucket, &'p [u8])> {
        let (name, parent) = path
            .split_last()
            .ok_or_else(|| CoreError::invalid_operation("empty bucket path"))?;
        let bucket = self
            .tree
            .resolve_mut(parent)
            .ok_or_else(|| CoreError::bucket_not_found(parent))?;
        Ok((bucket, *name))
    }

    /// Creates the bucket at `path` unless it exists. The parent must exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNotFound`] if the parent is missing.
    pub fn create_bucket_if_missing(&mut self, path: &[&[u8]]) -> CoreResult<()> {
        if self.bucket_exists(path) {
            return Ok(());
        }
        self.create_bucket(path)
    }

    /// Creates the bucket at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketExists`] if it is already there, or
    /// [`CoreError::BucketNotFound`] if the parent is missing.
    pub fn create_bucket(&mut self, path: &[&[u8]]) -> CoreResult<()> {
        let (parent, name) = self.parent_and_name(path)?;
        if parent.bucket(name).is_some() {
            return Err(CoreError::bucket_exists(path));
        }
        parent.insert_bucket(name.to_vec(), Bucket::default());

        let path = owned_path(path);
        self.undo.push(Undo::CreatedBucket { path: path.clone() });
        self.ops.push(LogOp::CreateBucket { path });
        Ok(())
    }

    /// Removes the bucket at `path` and everything below it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNotFound`] if there is no such bucket.
    pub fn delete_bucket(&mut self, path: &[&[u8]]) -> CoreResult<()> {
        let (parent, name) = self.parent_and_name(path)?;
        let bucket = parent
            .remove_bucket(name)
            .ok_or_else(|| CoreError::bucket_not_found(path))?;

        let path = owned_path(path);
        self.undo.push(Undo::DeletedBucket {
            path: path.clone(),
            bucket,
        });
        self.ops.push(LogOp::DeleteBucket { path });
        Ok(())
    }

    /// Stores `value` under `key` in the bucket at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNotFound`] if the bucket is missing.
    pub fn put(&mut self, path: &[&[u8]], key: &[u8], value: Vec<u8>) -> CoreResult<()> {
        let bucket = self
            .tree
            .resolve_mut(path)
            .ok_or_else(|| CoreError::bucket_not_found(path))?;
        let previous = bucket.insert(key.to_vec(), value.clone());

        let path = owned_path(path);
        self.undo.push(Undo::Entry {
            path: path.clone(),
            key: key.to_vec(),
            previous,
        });
        self.ops.push(LogOp::Put {
            path,
            key: key.to_vec(),
            value,
        });
        Ok(())
    }

    /// Removes `key` from the bucket at `path`. Returns whether it was
    /// present; removing an absent key records nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNotFound`] if the bucket is missing.
    pub fn delete(&mut self, path: &[&[u8]], key: &[u8]) -> CoreResult<bool> {
        let bucket = self
            .tree
            .resolve_mut(path)
            .ok_or_else(|| CoreError::bucket_not_found(path))?;
        let Some(previous) = bucket.remove(key) else {
            return Ok(false);
        };

        let path = owned_path(path);
        self.undo.push(Undo::Entry {
            path: path.clone(),
            key: key.to_vec(),
            previous: Some(previous),
        });
        self.ops.push(LogOp::Delete {
            path,
            key: key.to_vec(),
        });
        Ok(true)
    }

    /// Number of mutations made so far.
    #[must_use]
    pub fn pending_ops(&self) -> usize {
        self.ops.len()
    }

    /// Makes the transaction's changes durable.
    ///
    /// A transaction with no changes writes nothing.
    ///
    /// # Errors
    ///
    /// Returns the log error. The changes are rolled back in memory and cut
    /// off the log. If the log cannot be cut back the store closes itself.
    pub fn commit(mut self) -> CoreResult<()> {
        self.finished = true;
        if self.ops.is_empty() {
            return Ok(());
        }

        let mut log = self.store.log.lock();
        match log.append(&self.ops) {
            Ok(offset) => {
                trace!(offset, ops = self.ops.len(), "transaction committed");
                Ok(())
            }
            Err(err) => {
                if log.is_wedged() {
                    self.store.open.store(false, Ordering::Release);
                }
                drop(log);
                self.undo_all();
                Err(err)
            }
        }
    }

    /// Discards the transaction's changes.
    pub fn rollback(mut self) {
        self.finished = true;
        self.undo_all();
    }

    fn undo_all(&mut self) {
        if !self.undo.is_empty() {
            trace!(changes = self.undo.len(), "rolling back transaction");
        }
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Entry {
                    path,
                    key,
                    previous,
                } => {
                    if let Some(bucket) = self.tree.resolve_mut(&borrowed_path(&path)) {
                        match previous {
                            Some(value) => {
                                bucket.insert(key, value);
                            }
                            None => {
                                bucket.remove(&key);
                            }
                        }
                    }
                }
                Undo::CreatedBucket { path } => {
                    if let Some((name, parent)) = path.split_last() {
                        if let Some(bucket) = self.tree.resolve_mut(&borrowed_path(parent)) {
                            bucket.remove_bucket(name);
                        }
                    }
                }
                Undo::DeletedBucket { mut path, bucket } => {
                    if let Some(name) = path.pop() {
                        if let Some(parent) = self.tree.resolve_mut(&borrowed_path(&path)) {
                            parent.insert_bucket(name, bucket);
                        }
                    }
                }
            }
        }
        self.ops.clear();
    }
}

impl Drop for WriteTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.undo_all();
        }
    }
}

/// Committed tree plus the log that persists it.
pub struct Store {
    tree: RwLock<Bucket>,
    log: Mutex<CommitLog>,
    open: AtomicBool,
}

impl Store {
    /// Replays `log` and returns the store it describes.
    ///
    /// # Errors
    ///
    /// Returns the recovery error if the log is damaged.
    pub fn open(mut log: CommitLog) -> CoreResult<Self> {
        let recovered = log.recover()?;
        debug!(
            records = recovered.records,
            torn_bytes = recovered.torn_bytes,
            "store opened"
        );
        Ok(Self {
            tree: RwLock::new(recovered.tree),
            log: Mutex::new(log),
            open: AtomicBool::new(true),
        })
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Starts a read transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] after [`Store::close`].
    pub fn begin_read(&self) -> CoreResult<ReadTx<'_>> {
        self.ensure_open()?;
        Ok(ReadTx {
            tree: self.tree.read(),
        })
    }

    /// Starts the write transaction, waiting for any current one to end.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] after [`Store::close`].
    pub fn begin_write(&self) -> CoreResult<WriteTx<'_>> {
        self.ensure_open()?;
        Ok(WriteTx {
            store: self,
            tree: self.tree.write(),
            undo: Vec::new(),
            ops: Vec::new(),
            finished: false,
        })
    }

    /// Runs `f` in a write transaction, committing on `Ok` and rolling back
    /// on `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error from `f` or from the commit.
    pub fn update<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTx<'_>) -> CoreResult<T>,
    {
        let mut tx = self.begin_write()?;
        let value = f(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Runs `f` in a read transaction.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`.
    pub fn view<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&ReadTx<'_>) -> CoreResult<T>,
    {
        let tx = self.begin_read()?;
        f(&tx)
    }

    /// Current log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub fn log_size(&self) -> CoreResult<u64> {
        self.log.lock().size()
    }

    /// Rewrites the log as one snapshot of the committed tree. Writers wait
    /// until it finishes.
    ///
    /// See [`CommitLog::compact`] for `replacement` and `install`.
    ///
    /// # Errors
    ///
    /// Returns the error from writing or installing the snapshot.
    pub fn compact<F>(
        &self,
        replacement: Option<Box<dyn StorageBackend>>,
        install: F,
    ) -> CoreResult<()>
    where
        F: FnOnce() -> CoreResult<()>,
    {
        self.ensure_open()?;
        let tree = self.tree.read();
        let mut log = self.log.lock();
        let before = log.size()?;
        let after = log.compact(&tree, replacement, install)?;
        debug!(before, after, "commit log compacted");
        Ok(())
    }

    /// Flushes the log and refuses further transactions. Closing twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns the backend error from the final sync.
    pub fn close(&self) -> CoreResult<()> {
        let _tree = self.tree.write();
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.log.lock().sync()
    }

    /// True until [`Store::close`].
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diffdb_storage::{InMemoryBackend, StorageError, StorageResult};
    use std::sync::Arc;

    const ROWS: &[u8] = b"rows";

    fn store_over(backend: &InMemoryBackend) -> Store {
        Store::open(CommitLog::new(Box::new(backend.clone()), false)).unwrap()
    }

    /// Memory backend whose writes can be made to fail on demand.
    #[derive(Clone, Default)]
    struct FaultyBackend {
        inner: InMemoryBackend,
        fail_sync: Arc<AtomicBool>,
        tear_append: Arc<AtomicBool>,
        fail_truncate: Arc<AtomicBool>,
    }

    fn disk_full() -> StorageError {
        StorageError::Io(std::io::Error::other("disk full"))
    }

    impl StorageBackend for FaultyBackend {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }

        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            if self.tear_append.load(Ordering::SeqCst) {
                self.inner.append(&data[..data.len() / 2])?;
                return Err(disk_full());
            }
            self.inner.append(data)
        }

        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }

        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }

        fn sync(&mut self) -> StorageResult<()> {
            if self.fail_sync.load(Ordering::SeqCst) {
                return Err(disk_full());
            }
            self.inner.sync()
        }

        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            if self.fail_truncate.load(Ordering::SeqCst) {
                return Err(disk_full());
            }
            self.inner.truncate(new_size)
        }
    }

    fn syncing_store_over(backend: &FaultyBackend) -> Store {
        Store::open(CommitLog::new(Box::new(backend.clone()), true)).unwrap()
    }

    fn put_row(store: &Store, key: &[u8], value: u8) -> CoreResult<()> {
        store.update(|tx| {
            tx.create_bucket_if_missing(&[ROWS])?;
            tx.put(&[ROWS], key, vec![value])
        })
    }

    #[test]
    fn committed_writes_survive_reopen() {
        let backend = InMemoryBackend::new();
        let store = store_over(&backend);
        store
            .update(|tx| {
                tx.create_bucket(&[ROWS])?;
                tx.put(&[ROWS], b"a", b"1".to_vec())
            })
            .unwrap();

        let reopened = store_over(&backend);
        let tx = reopened.begin_read().unwrap();
        assert_eq!(tx.get(&[ROWS], b"a").unwrap(), Some(&b"1"[..]));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let store = store_over(&InMemoryBackend::new());
        store.update(|tx| tx.create_bucket(&[ROWS])).unwrap();
        {
            let mut tx = store.begin_write().unwrap();
            tx.put(&[ROWS], b"a", b"1".to_vec()).unwrap();
            tx.create_bucket(&[ROWS, &b"child"[..]]).unwrap();
            tx.delete_bucket(&[ROWS]).unwrap();
            assert_eq!(tx.pending_ops(), 3);
        }

        let tx = store.begin_read().unwrap();
        assert!(tx.bucket_exists(&[ROWS]));
        assert!(!tx.bucket_exists(&[ROWS, &b"child"[..]]));
        assert_eq!(tx.len(&[ROWS]).unwrap(), 0);
    }

    #[test]
    fn rollback_restores_overwritten_and_deleted_values() {
        let store = store_over(&InMemoryBackend::new());
        store
            .update(|tx| {
                tx.create_bucket(&[ROWS])?;
                tx.put(&[ROWS], b"a", b"1".to_vec())?;
                tx.put(&[ROWS], b"b", b"2".to_vec())
            })
            .unwrap();

        let mut tx = store.begin_write().unwrap();
        tx.put(&[ROWS], b"a", b"changed".to_vec()).unwrap();
        assert!(tx.delete(&[ROWS], b"b").unwrap());
        assert!(!tx.delete(&[ROWS], b"missing").unwrap());
        tx.rollback();

        let tx = store.begin_read().unwrap();
        assert_eq!(tx.get(&[ROWS], b"a").unwrap(), Some(&b"1"[..]));
        assert_eq!(tx.get(&[ROWS], b"b").unwrap(), Some(&b"2"[..]));
    }

    #[test]
    fn update_error_rolls_back() {
        let store = store_over(&InMemoryBackend::new());
        let err = store
            .update(|tx| {
                tx.create_bucket(&[ROWS])?;
                tx.create_bucket(&[ROWS])
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::BucketExists { .. }));
        assert!(!store.begin_read().unwrap().bucket_exists(&[ROWS]));
    }

    #[test]
    fn missing_buckets_are_reported() {
        let store = store_over(&InMemoryBackend::new());
        let mut tx = store.begin_write().unwrap();
        assert!(matches!(
            tx.put(&[ROWS], b"k", Vec::new()),
            Err(CoreError::BucketNotFound { .. })
        ));
        assert!(matches!(
            tx.create_bucket(&[ROWS, &b"child"[..]]),
            Err(CoreError::BucketNotFound { .. })
        ));
        assert!(matches!(
            tx.delete_bucket(&[ROWS]),
            Err(CoreError::BucketNotFound { .. })
        ));
    }

    #[test]
    fn empty_commit_writes_nothing() {
        let backend = InMemoryBackend::new();
        let store = store_over(&backend);
        store.begin_write().unwrap().commit().unwrap();
        assert!(backend.data().is_empty());
    }

    #[test]
    fn compaction_keeps_state_and_shrinks_log() {
        let backend = InMemoryBackend::new();
        let store = store_over(&backend);
        store.update(|tx| tx.create_bucket(&[ROWS])).unwrap();
        for round in 0..20u8 {
            store
                .update(|tx| tx.put(&[ROWS], b"k", vec![round]))
                .unwrap();
        }
        let before = store.log_size().unwrap();
        store.compact(None, || Ok(())).unwrap();
        assert!(store.log_size().unwrap() < before);

        let reopened = store_over(&backend);
        let tx = reopened.begin_read().unwrap();
        assert_eq!(tx.get(&[ROWS], b"k").unwrap(), Some(&[19u8][..]));
    }

    #[test]
    fn closed_store_refuses_transactions() {
        let store = store_over(&InMemoryBackend::new());
        store.close().unwrap();
        store.close().unwrap();
        assert!(!store.is_open());
        assert!(matches!(store.begin_read(), Err(CoreError::DatabaseClosed)));
        assert!(matches!(store.begin_write(), Err(CoreError::DatabaseClosed)));
    }

    #[test]
    fn failed_sync_leaves_nothing_to_replay() {
        let backend = FaultyBackend::default();
        let store = syncing_store_over(&backend);
        put_row(&store, b"kept", 1).unwrap();
        let size = store.log_size().unwrap();

        backend.fail_sync.store(true, Ordering::SeqCst);
        assert!(matches!(put_row(&store, b"lost", 2), Err(CoreError::Storage(_))));
        assert_eq!(store.log_size().unwrap(), size);
        assert!(store.is_open());
        assert_eq!(store.view(|tx| tx.len(&[ROWS])).unwrap(), 1);

        backend.fail_sync.store(false, Ordering::SeqCst);
        drop(store);
        let reopened = syncing_store_over(&backend);
        let tx = reopened.begin_read().unwrap();
        assert_eq!(tx.get(&[ROWS], b"kept").unwrap(), Some(&[1u8][..]));
        assert_eq!(tx.get(&[ROWS], b"lost").unwrap(), None);
    }

    #[test]
    fn torn_append_is_cut_before_next_commit() {
        let backend = FaultyBackend::default();
        let store = syncing_store_over(&backend);
        put_row(&store, b"first", 1).unwrap();

        backend.tear_append.store(true, Ordering::SeqCst);
        let long_key = vec![b'x'; 256];
        assert!(put_row(&store, &long_key, 2).is_err());

        backend.tear_append.store(false, Ordering::SeqCst);
        store.update(|tx| tx.put(&[ROWS], b"s", vec![3])).unwrap();
        drop(store);

        let reopened = syncing_store_over(&backend);
        let tx = reopened.begin_read().unwrap();
        assert_eq!(tx.len(&[ROWS]).unwrap(), 2);
        assert_eq!(tx.get(&[ROWS], b"s").unwrap(), Some(&[3u8][..]));
        assert_eq!(tx.get(&[ROWS], &long_key).unwrap(), None);
    }

    #[test]
    fn uncuttable_failed_commit_closes_store() {
        let backend = FaultyBackend::default();
        let store = syncing_store_over(&backend);
        put_row(&store, b"kept", 1).unwrap();

        backend.fail_sync.store(true, Ordering::SeqCst);
        backend.fail_truncate.store(true, Ordering::SeqCst);
        assert!(put_row(&store, b"lost", 2).is_err());
        assert!(!store.is_open());
        assert!(matches!(store.begin_write(), Err(CoreError::DatabaseClosed)));
    }
}
