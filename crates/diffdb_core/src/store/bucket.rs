//! The in-memory bucket tree.

use crate::error::{display_path, CoreError, CoreResult};
use crate::store::log::LogOp;
use std::collections::BTreeMap;

/// One region of the store: ordered key/value entries plus named child
/// buckets.
///
/// Entries and child buckets live in separate namespaces. Iteration is in
/// ascending byte order of the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    buckets: BTreeMap<Vec<u8>, Bucket>,
}

impl Bucket {
    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Number of entries. Child buckets are not counted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the bucket holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Child bucket called `name`.
    #[must_use]
    pub fn bucket(&self, name: &[u8]) -> Option<&Bucket> {
        self.buckets.get(name)
    }

    /// Names of child buckets in ascending order.
    pub fn bucket_names(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.buckets.keys().map(Vec::as_slice)
    }

    pub(crate) fn resolve(&self, path: &[&[u8]]) -> Option<&Bucket> {
        path.iter()
            .try_fold(self, |bucket, name| bucket.buckets.get(*name))
    }

    pub(crate) fn resolve_mut(&mut self, path: &[&[u8]]) -> Option<&mut Bucket> {
        path.iter()
            .try_fold(self, |bucket, name| bucket.buckets.get_mut(*name))
    }

    pub(crate) fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        self.entries.insert(key, value)
    }

    pub(crate) fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.remove(key)
    }

    pub(crate) fn insert_bucket(&mut self, name: Vec<u8>, bucket: Bucket) -> Option<Bucket> {
        self.buckets.insert(name, bucket)
    }

    pub(crate) fn remove_bucket(&mut self, name: &[u8]) -> Option<Bucket> {
        self.buckets.remove(name)
    }

    /// Applies one replayed log operation.
    pub(crate) fn apply(&mut self, op: LogOp) -> CoreResult<()> {
        match op {
            LogOp::CreateBucket { path } => {
                let (parent, name) = self.parent_mut(&path)?;
                parent.buckets.entry(name).or_default();
            }
            LogOp::DeleteBucket { path } => {
                let (parent, name) = self.parent_mut(&path)?;
                parent.buckets.remove(&name);
            }
            LogOp::Put { path, key, value } => {
                self.bucket_at_mut(&path)?.entries.insert(key, value);
            }
            LogOp::Delete { path, key } => {
                self.bucket_at_mut(&path)?.entries.remove(&key);
            }
        }
        Ok(())
    }

    /// Ops that rebuild this tree from empty, parents before children.
    pub(crate) fn snapshot_ops(&self) -> Vec<LogOp> {
        let mut ops = Vec::new();
        self.collect_ops(&mut Vec::new(), &mut ops);
        ops
    }

    fn collect_ops(&self, prefix: &mut Vec<Vec<u8>>, ops: &mut Vec<LogOp>) {
        for (key, value) in &self.entries {
            ops.push(LogOp::Put {
                path: prefix.clone(),
                key: key.clone(),
                value: value.clone(),
            });
        }
        for (name, child) in &self.buckets {
            prefix.push(name.clone());
            ops.push(LogOp::CreateBucket {
                path: prefix.clone(),
            });
            child.collect_ops(prefix, ops);
            prefix.pop();
        }
    }

    fn bucket_at_mut(&mut self, path: &[Vec<u8>]) -> CoreResult<&mut Bucket> {
        let borrowed: Vec<&[u8]> = path.iter().map(Vec::as_slice).collect();
        self.resolve_mut(&borrowed)
            .ok_or_else(|| {
                CoreError::log_corruption(format!(
                    "log references missing bucket {}",
                    display_path(&borrowed)
                ))
            })
    }

    fn parent_mut(&mut self, path: &[Vec<u8>]) -> CoreResult<(&mut Bucket, Vec<u8>)> {
        let (name, parent) = path
            .split_last()
            .ok_or_else(|| CoreError::log_corruption("bucket operation with empty path"))?;
        Ok((self.bucket_at_mut(parent)?, name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> Vec<Vec<u8>> {
        segments.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn replayed_ops_build_nested_tree() {
        let mut tree = Bucket::default();
        tree.apply(LogOp::CreateBucket { path: path(&["rows"]) }).unwrap();
        tree.apply(LogOp::CreateBucket { path: path(&["rows", "_m"]) }).unwrap();
        tree.apply(LogOp::Put {
            path: path(&["rows", "_m"]),
            key: b"b".to_vec(),
            value: b"2".to_vec(),
        })
        .unwrap();
        tree.apply(LogOp::Put {
            path: path(&["rows", "_m"]),
            key: b"a".to_vec(),
            value: b"1".to_vec(),
        })
        .unwrap();

        let committed = tree.resolve(&[&b"rows"[..], &b"_m"[..]]).unwrap();
        let keys: Vec<&[u8]> = committed.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(committed.get(b"a"), Some(&b"1"[..]));
    }

    #[test]
    fn op_on_missing_bucket_is_corruption() {
        let mut tree = Bucket::default();
        let err = tree
            .apply(LogOp::Delete {
                path: path(&["nope"]),
                key: b"k".to_vec(),
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::LogCorruption { .. }));
    }

    #[test]
    fn snapshot_ops_rebuild_identical_tree() {
        let mut tree = Bucket::default();
        tree.apply(LogOp::CreateBucket { path: path(&["a"]) }).unwrap();
        tree.apply(LogOp::CreateBucket { path: path(&["a", "b"]) }).unwrap();
        tree.apply(LogOp::Put {
            path: path(&["a", "b"]),
            key: b"k".to_vec(),
            value: b"v".to_vec(),
        })
        .unwrap();
        tree.apply(LogOp::Put {
            path: path(&["a"]),
            key: b"top".to_vec(),
            value: Vec::new(),
        })
        .unwrap();

        let mut rebuilt = Bucket::default();
        for op in tree.snapshot_ops() {
            rebuilt.apply(op).unwrap();
        }
        assert_eq!(rebuilt, tree);
    }
}
