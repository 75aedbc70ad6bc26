//! The commit log.
//!
//! Every committed write transaction is appended as one record. Opening a
//! store replays the records in order to rebuild the bucket tree.
//!
//! ## Record Format
//!
//! ```text
//! | magic "DDBL" (4) | version (2) | kind (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The payload is a `u32` op count followed by the ops. Each op is a tag
//! byte, the bucket path (`u16` segment count, then `u32`-length-prefixed
//! segments) and the length-prefixed key and value where the op has them.
//!
//! ## Recovery Policy
//!
//! - A record cut short by a crash (incomplete header or payload) ends the
//!   log. The torn bytes are truncated so the next append starts clean.
//! - A CRC mismatch, bad magic, unknown kind, future version or malformed
//!   payload is fatal. The store does not open.
//!
//! A `Snapshot` record replaces the whole tree. [`CommitLog::compact`] writes
//! one as the only record of a fresh log.

use crate::error::{CoreError, CoreResult};
use crate::store::bucket::Bucket;
use diffdb_storage::StorageBackend;
use tracing::{debug, error, warn};

/// Magic bytes opening every record.
pub const LOG_MAGIC: [u8; 4] = *b"DDBL";

/// Current record format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + kind (1) + length (4)
const HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;

/// What a record does to the tree on replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Ops applied on top of the current tree.
    Commit = 1,
    /// Ops rebuilding the tree from empty.
    Snapshot = 2,
}

impl RecordKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            2 => Some(Self::Snapshot),
            _ => None,
        }
    }
}

/// One mutation of the bucket tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    /// Create the bucket at `path`. Its parent must exist.
    CreateBucket {
        /// Full path of the new bucket.
        path: Vec<Vec<u8>>,
    },
    /// Remove the bucket at `path` with everything under it.
    DeleteBucket {
        /// Full path of the removed bucket.
        path: Vec<Vec<u8>>,
    },
    /// Store `value` under `key`.
    Put {
        /// Bucket holding the entry.
        path: Vec<Vec<u8>>,
        /// Entry key.
        key: Vec<u8>,
        /// Entry value.
        value: Vec<u8>,
    },
    /// Remove the entry under `key`.
    Delete {
        /// Bucket holding the entry.
        path: Vec<Vec<u8>>,
        /// Entry key.
        key: Vec<u8>,
    },
}

impl LogOp {
    const CREATE_BUCKET: u8 = 1;
    const DELETE_BUCKET: u8 = 2;
    const PUT: u8 = 3;
    const DELETE: u8 = 4;

    fn encode_into(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        match self {
            Self::CreateBucket { path } => {
                buf.push(Self::CREATE_BUCKET);
                write_path(buf, path)?;
            }
            Self::DeleteBucket { path } => {
                buf.push(Self::DELETE_BUCKET);
                write_path(buf, path)?;
            }
            Self::Put { path, key, value } => {
                buf.push(Self::PUT);
                write_path(buf, path)?;
                write_bytes(buf, key)?;
                write_bytes(buf, value)?;
            }
            Self::Delete { path, key } => {
                buf.push(Self::DELETE);
                write_path(buf, path)?;
                write_bytes(buf, key)?;
            }
        }
        Ok(())
    }

    fn decode_from(reader: &mut Reader<'_>) -> CoreResult<Self> {
        let tag = reader.u8()?;
        let path = reader.path()?;
        match tag {
            Self::CREATE_BUCKET => Ok(Self::CreateBucket { path }),
            Self::DELETE_BUCKET => Ok(Self::DeleteBucket { path }),
            Self::PUT => Ok(Self::Put {
                path,
                key: reader.bytes()?,
                value: reader.bytes()?,
            }),
            Self::DELETE => Ok(Self::Delete {
                path,
                key: reader.bytes()?,
            }),
            other => Err(CoreError::log_corruption(format!("unknown op tag {other}"))),
        }
    }
}

fn write_len_u32(buf: &mut Vec<u8>, len: usize) -> CoreResult<()> {
    let len = u32::try_from(len)
        .map_err(|_| CoreError::invalid_operation("key or value larger than 4 GiB"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> CoreResult<()> {
    write_len_u32(buf, bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn write_path(buf: &mut Vec<u8>, path: &[Vec<u8>]) -> CoreResult<()> {
    let depth = u16::try_from(path.len())
        .map_err(|_| CoreError::invalid_operation("bucket path too deep"))?;
    buf.extend_from_slice(&depth.to_le_bytes());
    for segment in path {
        write_bytes(buf, segment)?;
    }
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| CoreError::log_corruption("unexpected end of record payload"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CoreResult<u16> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn bytes(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn path(&mut self) -> CoreResult<Vec<Vec<u8>>> {
        let depth = self.u16()?;
        (0..depth).map(|_| self.bytes()).collect()
    }

    fn finished(&self) -> bool {
        self.pos == self.buf.len()
    }
}

/// Encodes a full record: header, payload and trailing CRC.
pub fn encode_record(kind: RecordKind, ops: &[LogOp]) -> CoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    write_len_u32(&mut payload, ops.len())?;
    for op in ops {
        op.encode_into(&mut payload)?;
    }

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&LOG_MAGIC);
    data.extend_from_slice(&LOG_VERSION.to_le_bytes());
    data.push(kind as u8);
    write_len_u32(&mut data, payload.len())?;
    data.extend_from_slice(&payload);
    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

fn decode_payload(payload: &[u8]) -> CoreResult<Vec<LogOp>> {
    let mut reader = Reader {
        buf: payload,
        pos: 0,
    };
    let count = reader.u32()?;
    let ops = (0..count)
        .map(|_| LogOp::decode_from(&mut reader))
        .collect::<CoreResult<Vec<_>>>()?;
    if !reader.finished() {
        return Err(CoreError::log_corruption(format!(
            "{} trailing bytes after {count} ops",
            payload.len() - reader.pos
        )));
    }
    Ok(ops)
}

/// What replay found.
#[derive(Debug, Default)]
pub struct Recovered {
    /// The rebuilt tree.
    pub tree: Bucket,
    /// Complete records applied.
    pub records: usize,
    /// Bytes of a torn trailing record that were cut away.
    pub torn_bytes: u64,
}

/// Appends records to a storage backend and replays them.
pub struct CommitLog {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
    /// Set when a failed append could not be cut back off the log.
    wedged: bool,
}

impl CommitLog {
    /// Wraps a backend. Call [`CommitLog::recover`] before appending.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
            wedged: false,
        }
    }

    /// Replays every complete record and cuts off a torn tail.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ChecksumMismatch`] or [`CoreError::LogCorruption`]
    /// for damaged records, or a storage error.
    pub fn recover(&mut self) -> CoreResult<Recovered> {
        let data = self.backend.read_all()?;
        let mut recovered = Recovered::default();
        let mut offset = 0usize;

        while offset < data.len() {
            let rest = &data[offset..];
            if rest.len() < HEADER_SIZE {
                break;
            }

            if rest[0..4] != LOG_MAGIC {
                return Err(CoreError::log_corruption(format!(
                    "invalid magic at offset {offset}"
                )));
            }
            let version = u16::from_le_bytes([rest[4], rest[5]]);
            if version > LOG_VERSION {
                return Err(CoreError::log_corruption(format!(
                    "unsupported version {version} at offset {offset}"
                )));
            }
            let kind = RecordKind::from_byte(rest[6]).ok_or_else(|| {
                CoreError::log_corruption(format!(
                    "unknown record kind {} at offset {offset}",
                    rest[6]
                ))
            })?;
            let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;

            let total = HEADER_SIZE + len + CRC_SIZE;
            if rest.len() < total {
                break;
            }

            let body = &rest[..HEADER_SIZE + len];
            let stored = &rest[HEADER_SIZE + len..total];
            let expected = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
            let actual = compute_crc32(body);
            if expected != actual {
                return Err(CoreError::ChecksumMismatch {
                    offset: offset as u64,
                    expected,
                    actual,
                });
            }

            let ops = decode_payload(&body[HEADER_SIZE..])?;
            if kind == RecordKind::Snapshot {
                recovered.tree = Bucket::default();
            }
            for op in ops {
                recovered.tree.apply(op)?;
            }

            recovered.records += 1;
            offset += total;
        }

        if offset < data.len() {
            recovered.torn_bytes = (data.len() - offset) as u64;
            warn!(
                offset,
                torn_bytes = recovered.torn_bytes,
                "discarding torn record at end of commit log"
            );
            self.backend.truncate(offset as u64)?;
        }

        debug!(
            records = recovered.records,
            size = offset,
            "commit log replayed"
        );
        Ok(recovered)
    }

    /// Appends one commit record and makes it durable.
    ///
    /// If the append, flush or sync fails, the log is cut back to where the
    /// record started, so a failed commit never replays. When that cut
    /// fails too the log is wedged and refuses further appends.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, the append, the flush or the sync
    /// fails, and [`CoreError::DatabaseClosed`] once the log is wedged.
    pub fn append(&mut self, ops: &[LogOp]) -> CoreResult<u64> {
        if self.wedged {
            return Err(CoreError::DatabaseClosed);
        }
        let record = encode_record(RecordKind::Commit, ops)?;
        let start = self.backend.size()?;

        match self.write_durable(&record) {
            Ok(offset) => Ok(offset),
            Err(err) => {
                if let Err(cut) = self.backend.truncate(start) {
                    self.wedged = true;
                    error!(
                        offset = start,
                        error = %cut,
                        "cannot remove failed commit from log"
                    );
                } else {
                    warn!(offset = start, error = %err, "commit append failed, log cut back");
                }
                Err(err)
            }
        }
    }

    fn write_durable(&mut self, record: &[u8]) -> CoreResult<u64> {
        let offset = self.backend.append(record)?;
        self.backend.flush()?;
        if self.sync_on_commit {
            self.backend.sync()?;
        }
        Ok(offset)
    }

    /// True once a failed append could not be removed from the log.
    #[must_use]
    pub fn is_wedged(&self) -> bool {
        self.wedged
    }

    /// Current log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Flushes and syncs the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if either call fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }

    /// Rewrites the log as a single snapshot of `tree`.
    ///
    /// With `replacement`, the snapshot goes into that backend, `install`
    /// moves it into place, and the log switches to it. Without one, the
    /// current backend is truncated and rewritten.
    ///
    /// # Errors
    ///
    /// Returns an error if writing the snapshot or `install` fails. The old
    /// log stays active in that case.
    pub fn compact<F>(
        &mut self,
        tree: &Bucket,
        replacement: Option<Box<dyn StorageBackend>>,
        install: F,
    ) -> CoreResult<u64>
    where
        F: FnOnce() -> CoreResult<()>,
    {
        let record = encode_record(RecordKind::Snapshot, &tree.snapshot_ops())?;
        match replacement {
            Some(mut fresh) => {
                fresh.truncate(0)?;
                fresh.append(&record)?;
                fresh.flush()?;
                fresh.sync()?;
                install()?;
                self.backend = fresh;
            }
            None => {
                self.backend.truncate(0)?;
                self.backend.append(&record)?;
                self.sync()?;
            }
        }
        Ok(record.len() as u64)
    }
}

impl std::fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLog")
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}

/// CRC-32 (IEEE) over `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}
