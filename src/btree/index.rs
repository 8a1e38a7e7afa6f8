//! Secondary index seam
//!
//! The B-link tree algorithm is an external collaborator; the transaction
//! layer drives it through `IndexTree`. Index keys are re-encoded into
//! `IndexKey`, a totally ordered form, so composite keys order correctly in
//! any tree implementation. `LocalBTreeIndex` is the in-process
//! implementation used by tests and the benchmark harness.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;

use crate::data::Field;
use crate::store::Key;
use crate::Result;

// ============================================================================
// Index Key
// ============================================================================

/// A comparable key component extracted from a Field for tree ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    Null,
    Int(i64),
    /// Float stored as raw bits; decoded for comparison
    Float(u64),
    Str(String),
    Bytes(Vec<u8>),
}

impl IndexKey {
    /// Convert a Field to an IndexKey
    pub fn from_field(field: &Field) -> Self {
        match field {
            Field::NoType | Field::Null => IndexKey::Null,
            Field::SmallInt(v) => IndexKey::Int(*v as i64),
            Field::Int(v) => IndexKey::Int(*v as i64),
            Field::BigInt(v) => IndexKey::Int(*v),
            Field::Float(v) => IndexKey::Float((*v as f64).to_bits()),
            Field::Double(v) => IndexKey::Float(v.to_bits()),
            Field::Text(s) => IndexKey::Str(s.clone()),
            Field::Blob(b) => IndexKey::Bytes(b.clone()),
        }
    }

    /// Convert a composite field key
    pub fn from_fields(fields: &[Field]) -> Vec<IndexKey> {
        fields.iter().map(IndexKey::from_field).collect()
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (IndexKey::Null, IndexKey::Null) => Ordering::Equal,
            (IndexKey::Null, _) => Ordering::Less,
            (_, IndexKey::Null) => Ordering::Greater,
            (IndexKey::Int(a), IndexKey::Int(b)) => a.cmp(b),
            (IndexKey::Float(a), IndexKey::Float(b)) => {
                let fa = f64::from_bits(*a);
                let fb = f64::from_bits(*b);
                fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
            }
            (IndexKey::Str(a), IndexKey::Str(b)) => a.cmp(b),
            (IndexKey::Bytes(a), IndexKey::Bytes(b)) => a.cmp(b),
            // Cross-type: order by discriminant
            _ => {
                fn disc(k: &IndexKey) -> u8 {
                    match k {
                        IndexKey::Null => 0,
                        IndexKey::Int(_) => 1,
                        IndexKey::Float(_) => 2,
                        IndexKey::Str(_) => 3,
                        IndexKey::Bytes(_) => 4,
                    }
                }
                disc(self).cmp(&disc(other))
            }
        }
    }
}

/// One index entry: composite key plus the row it points at
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexEntry {
    pub key: Vec<IndexKey>,
    pub row: Key,
}

// ============================================================================
// Index Tree Seam
// ============================================================================

/// Ordered-key operations the transaction layer needs from a tree
pub trait IndexTree: Send + Sync {
    /// Entries with key >= `key`, ascending
    fn lower_bound(&self, key: &[IndexKey]) -> Result<Vec<IndexEntry>>;

    /// Entries with key <= `key`, descending
    fn reverse_lower_bound(&self, key: &[IndexKey]) -> Result<Vec<IndexEntry>>;

    fn insert(&self, key: Vec<IndexKey>, row: Key) -> Result<()>;

    fn remove(&self, key: &[IndexKey], row: Key) -> Result<()>;
}

/// In-process ordered index
pub struct LocalBTreeIndex {
    entries: RwLock<BTreeMap<Vec<IndexKey>, BTreeSet<Key>>>,
}

impl LocalBTreeIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Total number of (key, row) pairs
    pub fn entry_count(&self) -> usize {
        self.entries.read().values().map(|rows| rows.len()).sum()
    }
}

impl Default for LocalBTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexTree for LocalBTreeIndex {
    fn lower_bound(&self, key: &[IndexKey]) -> Result<Vec<IndexEntry>> {
        let entries = self.entries.read();
        Ok(entries
            .range(key.to_vec()..)
            .flat_map(|(k, rows)| {
                rows.iter().map(|row| IndexEntry {
                    key: k.clone(),
                    row: *row,
                })
            })
            .collect())
    }

    fn reverse_lower_bound(&self, key: &[IndexKey]) -> Result<Vec<IndexEntry>> {
        let entries = self.entries.read();
        Ok(entries
            .range(..=key.to_vec())
            .rev()
            .flat_map(|(k, rows)| {
                rows.iter().rev().map(|row| IndexEntry {
                    key: k.clone(),
                    row: *row,
                })
            })
            .collect())
    }

    fn insert(&self, key: Vec<IndexKey>, row: Key) -> Result<()> {
        self.entries.write().entry(key).or_default().insert(row);
        Ok(())
    }

    fn remove(&self, key: &[IndexKey], row: Key) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(rows) = entries.get_mut(key) {
            rows.remove(&row);
            if rows.is_empty() {
                entries.remove(key);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_key_ordering() {
        assert!(IndexKey::Int(-3) < IndexKey::Int(7));
        assert!(IndexKey::Float((-1.5f64).to_bits()) < IndexKey::Float(0.5f64.to_bits()));
        assert!(IndexKey::Str("a".into()) < IndexKey::Str("b".into()));
        assert!(IndexKey::Null < IndexKey::Int(i64::MIN));
        // cross-type falls back to discriminant order
        assert!(IndexKey::Int(9) < IndexKey::Str("0".into()));
    }

    #[test]
    fn test_composite_keys_order_lexicographically() {
        let a = vec![IndexKey::Int(1), IndexKey::Str("b".into())];
        let b = vec![IndexKey::Int(1), IndexKey::Str("c".into())];
        let c = vec![IndexKey::Int(2), IndexKey::Str("a".into())];
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_lower_bound_scans() {
        let index = LocalBTreeIndex::new();
        for (v, row) in [(10, 1), (20, 2), (20, 3), (30, 4)] {
            index.insert(vec![IndexKey::Int(v)], row).unwrap();
        }

        let hits = index.lower_bound(&[IndexKey::Int(20)]).unwrap();
        assert_eq!(
            hits.iter().map(|e| e.row).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );

        let hits = index.reverse_lower_bound(&[IndexKey::Int(20)]).unwrap();
        assert_eq!(
            hits.iter().map(|e| e.row).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
    }

    #[test]
    fn test_remove_drops_empty_keys() {
        let index = LocalBTreeIndex::new();
        index.insert(vec![IndexKey::Int(1)], 7).unwrap();
        index.remove(&[IndexKey::Int(1)], 7).unwrap();
        assert_eq!(index.entry_count(), 0);
        assert!(index.lower_bound(&[IndexKey::Null]).unwrap().is_empty());
    }
}
