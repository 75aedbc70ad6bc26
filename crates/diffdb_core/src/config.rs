//! Database configuration.

/// Configuration for opening a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the commit log on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Rewrite the commit log as a snapshot on open once it reaches this
    /// many bytes (0 = never).
    pub compact_on_open_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            compact_on_open_bytes: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the log size that triggers compaction on open.
    #[must_use]
    pub const fn compact_on_open_bytes(mut self, size: u64) -> Self {
        self.compact_on_open_bytes = size;
        self
    }

    pub(crate) const fn should_compact(&self, log_size: u64) -> bool {
        self.compact_on_open_bytes != 0 && log_size >= self.compact_on_open_bytes
    }
}
