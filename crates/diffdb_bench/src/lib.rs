//! Benchmark fixtures for DiffDB.

use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

/// A typical upstream row.
#[derive(Debug, Clone, Serialize)]
pub struct Row {
    /// Short text column.
    pub name: String,
    /// Numeric column.
    pub count: i64,
    /// Repeated text column.
    pub labels: Vec<String>,
    /// Seconds since the epoch.
    pub updated_at: u64,
    /// Free-form attributes.
    pub attributes: BTreeMap<String, String>,
}

/// The fixed row used by the fingerprint benchmarks.
#[must_use]
pub fn sample_row() -> Row {
    Row {
        name: "abc".to_string(),
        count: 131_241_231,
        labels: ["6", "1", "732", "2341", "q341", "q34e"]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        updated_at: 1_700_000_000,
        attributes: BTreeMap::new(),
    }
}

/// A row with `attributes` random entries of `value_len` bytes each.
#[must_use]
pub fn random_row(attributes: usize, value_len: usize) -> Row {
    let mut rng = rand::thread_rng();
    let mut row = sample_row();
    row.count = rng.gen();
    row.attributes = (0..attributes)
        .map(|i| (format!("attr_{i}"), random_text(&mut rng, value_len)))
        .collect();
    row
}

/// `count` distinct identities.
#[must_use]
pub fn ids(count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|i| format!("row-{i:08}").into_bytes()).collect()
}

fn random_text<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}
