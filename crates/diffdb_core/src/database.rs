//! Database handle.

use crate::config::Config;
#[cfg(feature = "std")]
use crate::dir::DatabaseDir;
use crate::differential::Differential;
use crate::error::{CoreError, CoreResult};
use crate::layout::Regions;
use crate::store::{CommitLog, Store, TxRead};
use diffdb_storage::StorageBackend;
#[cfg(feature = "std")]
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// An open DiffDB database.
///
/// A database holds any number of named collections. Each collection is
/// worked on through the [`Differential`] returned by
/// [`Database::open_differential`]; those handles share this database's
/// store and stay usable until [`Database::close`].
///
/// # Example
///
/// ```rust,ignore
/// use diffdb_core::Database;
/// use std::path::Path;
///
/// let db = Database::open(Path::new("changes.db"))?;
/// let rows = db.open_differential("customers")?;
/// rows.add(b"42", &customer)?;
/// ```
#[derive(Debug)]
pub struct Database {
    /// Configuration it was opened with.
    config: Config,
    /// Directory lock, for databases opened from a path.
    #[cfg(feature = "std")]
    dir: Option<DatabaseDir>,
    /// Shared with every open differential.
    store: Arc<Store>,
}

impl Database {
    /// Opens a database from a directory path.
    ///
    /// The directory is created if missing. It holds a `LOCK` file, taken
    /// exclusively for as long as the database is open, and the commit log.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another handle has the directory locked (`DatabaseLocked`)
    /// - The commit log is damaged (`LogCorruption`, `ChecksumMismatch`)
    /// - I/O errors occur
    #[cfg(feature = "std")]
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database from a directory path with custom configuration.
    ///
    /// ```rust,ignore
    /// use diffdb_core::{Config, Database};
    ///
    /// let config = Config::default().sync_on_commit(false);
    /// let db = Database::open_with_config(Path::new("changes.db"), config)?;
    /// ```
    ///
    /// # Errors
    ///
    /// See [`Database::open`].
    #[cfg(feature = "std")]
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        use diffdb_storage::FileBackend;

        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        if dir.remove_stale_compaction()? {
            tracing::warn!(path = %dir.path().display(), "removed leftover compaction snapshot");
        }

        let backend = FileBackend::open_with_create_dirs(&dir.log_path())?;
        let store = Store::open(CommitLog::new(Box::new(backend), config.sync_on_commit))?;

        let db = Self {
            config,
            dir: Some(dir),
            store: Arc::new(store),
        };
        db.compact_if_oversized()?;
        Ok(db)
    }

    /// Opens a database over an already-configured backend.
    ///
    /// This is a lower-level constructor for custom storage. For most use
    /// cases, prefer [`Database::open`].
    ///
    /// # Errors
    ///
    /// Returns an error if the backend's log is damaged.
    pub fn open_with_backend(
        config: Config,
        backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let store = Store::open(CommitLog::new(backend, config.sync_on_commit))?;
        let db = Self {
            config,
            #[cfg(feature = "std")]
            dir: None,
            store: Arc::new(store),
        };
        db.compact_if_oversized()?;
        Ok(db)
    }

    /// Opens a fresh in-memory database.
    ///
    /// Nothing is persisted. Data is lost when the database is dropped.
    ///
    /// # Errors
    ///
    /// Infallible in practice; the signature matches the other constructors.
    pub fn open_in_memory() -> CoreResult<Self> {
        use diffdb_storage::InMemoryBackend;
        Self::open_with_backend(Config::default(), Box::new(InMemoryBackend::new()))
    }

    fn compact_if_oversized(&self) -> CoreResult<()> {
        let size = self.store.log_size()?;
        if self.config.should_compact(size) {
            debug!(size, threshold = self.config.compact_on_open_bytes, "compacting on open");
            self.compact()?;
        }
        Ok(())
    }

    /// Opens the named collection, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an empty name, or a store error.
    pub fn open_differential(&self, name: &str) -> CoreResult<Differential> {
        if name.is_empty() {
            return Err(CoreError::invalid_operation(
                "collection name must not be empty",
            ));
        }

        let regions = Regions::new(name);
        self.store.update(|tx| {
            tx.create_bucket_if_missing(&regions.root())?;
            for region in regions.opened() {
                tx.create_bucket_if_missing(&region)?;
            }
            Ok(())
        })?;
        debug!(collection = name, "collection opened");

        Ok(Differential::new(name, Arc::clone(&self.store)))
    }

    /// Deletes the named collection with all its state.
    ///
    /// Handles already open on it fail with `BucketNotFound` afterwards.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if there is no such collection.
    pub fn delete(&self, name: &str) -> CoreResult<()> {
        self.store.update(|tx| {
            let root = [name.as_bytes()];
            if !tx.bucket_exists(&root) {
                return Err(CoreError::CollectionNotFound {
                    name: name.to_string(),
                });
            }
            tx.delete_bucket(&root)
        })?;
        debug!(collection = name, "collection deleted");
        Ok(())
    }

    /// Names of all collections, in ascending byte order.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after [`Database::close`].
    pub fn collections(&self) -> CoreResult<Vec<String>> {
        self.store.view(|tx| {
            Ok(tx
                .tree()
                .bucket_names()
                .map(|name| String::from_utf8_lossy(name).into_owned())
                .collect())
        })
    }

    /// Rewrites the commit log as a single snapshot of the current state.
    ///
    /// On disk the snapshot is written beside the log and renamed over it,
    /// so a crash leaves either the old log or the new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written or installed. The
    /// old log stays in use in that case.
    pub fn compact(&self) -> CoreResult<()> {
        #[cfg(feature = "std")]
        if let Some(dir) = &self.dir {
            use diffdb_storage::FileBackend;

            let fresh = FileBackend::open(&dir.compact_path())?;
            return self
                .store
                .compact(Some(Box::new(fresh)), || dir.install_compacted());
        }
        self.store.compact(None, || Ok(()))
    }

    /// Current commit log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub fn log_size(&self) -> CoreResult<u64> {
        self.store.log_size()
    }

    /// Flushes the commit log and closes the database. Every handle on it,
    /// differentials included, fails with `DatabaseClosed` afterwards.
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the error from the final sync.
    pub fn close(&self) -> CoreResult<()> {
        self.store.close()
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.store.is_open()
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.is_open());
        assert!(db.collections().unwrap().is_empty());
    }

    #[test]
    fn open_differential_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.open_differential("b").unwrap();
        db.open_differential("a").unwrap();
        db.open_differential("b").unwrap();
        assert_eq!(db.collections().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn empty_name_rejected() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.open_differential(""),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn delete_missing_collection() {
        let db = Database::open_in_memory().unwrap();
        let err = db.delete("nope").unwrap_err();
        assert!(matches!(err, CoreError::CollectionNotFound { name } if name == "nope"));
    }

    #[test]
    fn close_database() {
        let db = Database::open_in_memory().unwrap();
        let diff = db.open_differential("rows").unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(db.collections(), Err(CoreError::DatabaseClosed)));
        assert!(matches!(diff.count_changes(), Err(CoreError::DatabaseClosed)));
        db.close().unwrap();
    }

    #[test]
    fn small_threshold_compacts_on_open() {
        use diffdb_storage::InMemoryBackend;

        let backend = InMemoryBackend::new();
        let config = Config::default().sync_on_commit(false);
        {
            let db = Database::open_with_backend(config.clone(), Box::new(backend.clone()))
                .unwrap();
            let diff = db.open_differential("rows").unwrap();
            for i in 0..10u32 {
                diff.add(b"k", &i).unwrap();
            }
        }
        let before = backend.data().len();

        let db = Database::open_with_backend(
            config.compact_on_open_bytes(1),
            Box::new(backend.clone()),
        )
        .unwrap();
        assert!(backend.data().len() < before);
        assert_eq!(db.open_differential("rows").unwrap().count_changes().unwrap(), 1);
    }
}
