//! Region names inside a collection.
//!
//! ```text
//! <collection>/
//! ├─ _m    identity -> committed fingerprint
//! ├─ _ph   identity -> pending fingerprint
//! ├─ _pd   fingerprint || identity -> encoded payload
//! ├─ _ud   caller bookkeeping
//! └─ _dk   identity -> () while conflict tracking
//! ```

/// Committed fingerprints.
pub const COMMITTED: &[u8] = b"_m";
/// Pending fingerprints.
pub const PENDING: &[u8] = b"_ph";
/// Pending payloads.
pub const PAYLOADS: &[u8] = b"_pd";
/// Caller bookkeeping.
pub const USER_DATA: &[u8] = b"_ud";
/// Conflict markers for the current cycle.
pub const CONFLICTS: &[u8] = b"_dk";

/// Paths to the regions of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Regions {
    name: Vec<u8>,
}

impl Regions {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.as_bytes().to_vec(),
        }
    }

    pub(crate) fn root(&self) -> [&[u8]; 1] {
        [self.name.as_slice()]
    }

    fn region<'a>(&'a self, region: &'static [u8]) -> [&'a [u8]; 2] {
        [self.name.as_slice(), region]
    }

    pub(crate) fn committed(&self) -> [&[u8]; 2] {
        self.region(COMMITTED)
    }

    pub(crate) fn pending(&self) -> [&[u8]; 2] {
        self.region(PENDING)
    }

    pub(crate) fn payloads(&self) -> [&[u8]; 2] {
        self.region(PAYLOADS)
    }

    pub(crate) fn user_data(&self) -> [&[u8]; 2] {
        self.region(USER_DATA)
    }

    pub(crate) fn conflicts(&self) -> [&[u8]; 2] {
        self.region(CONFLICTS)
    }

    /// Regions created when a collection is opened. The conflict region is
    /// created on demand.
    pub(crate) fn opened(&self) -> [[&[u8]; 2]; 4] {
        [
            self.committed(),
            self.pending(),
            self.payloads(),
            self.user_data(),
        ]
    }
}

/// Key of a pending payload: the fingerprint bytes followed by the identity.
///
/// Two identities pending with the same content get separate payloads, so
/// applying or superseding one never touches the other.
pub(crate) fn payload_key(hash: &[u8], id: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(hash.len() + id.len());
    key.extend_from_slice(hash);
    key.extend_from_slice(id);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_key_prefixes_fingerprint() {
        let key = payload_key(&1u64.to_le_bytes(), b"id");
        assert_eq!(key, [1, 0, 0, 0, 0, 0, 0, 0, b'i', b'd']);
    }

    #[test]
    fn region_paths_nest_under_collection() {
        let regions = Regions::new("rows");
        assert_eq!(regions.pending(), [&b"rows"[..], &b"_ph"[..]]);
        assert_eq!(regions.root(), [&b"rows"[..]]);
        assert!(!regions.opened().contains(&regions.conflicts()));
    }
}
