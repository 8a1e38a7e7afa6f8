//! Per-table transaction cache
//!
//! Owned by exactly one transaction and bound to exactly one store table.
//! Holds two disjoint maps: clean tuples read at the snapshot version, and
//! pending changes staged by the transaction. A write moves the clean entry
//! into the pending change so the undo log later has both the before- and
//! after-image.

use std::sync::Arc;

use ahash::AHashMap;

use crate::commit_manager::SnapshotDescriptor;
use crate::data::Tuple;
use crate::store::{Key, StoreHandle, Table};
use crate::{Result, TellError};

/// Kind of a pending change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Insert,
    Update,
    Delete,
}

/// A tuple read at the snapshot version and not locally modified
pub(crate) struct CleanEntry {
    pub tuple: Arc<Tuple>,
    /// Record version at read time, the CAS expectation for write-back
    pub version: u64,
    /// Whether the transaction has read this entry since it was installed
    pub read: bool,
}

/// A staged local mutation
pub(crate) struct PendingChange {
    /// After-image; `None` for a delete
    pub tuple: Option<Arc<Tuple>>,
    pub op: Operation,
    /// CAS expectation for write-back (0 for an insert)
    pub base_version: u64,
    /// Before-image, for undo-log generation
    pub before: Option<Arc<Tuple>>,
}

/// Read-through cache and write buffer for one (transaction, table) pair
pub struct TableCache {
    table: Table,
    snapshot: SnapshotDescriptor,
    store: Arc<dyn StoreHandle>,
    cache: AHashMap<Key, CleanEntry>,
    changes: AHashMap<Key, PendingChange>,
}

impl TableCache {
    pub(crate) fn new(
        table: Table,
        store: Arc<dyn StoreHandle>,
        snapshot: SnapshotDescriptor,
    ) -> Self {
        Self {
            table,
            snapshot,
            store,
            cache: AHashMap::new(),
            changes: AHashMap::new(),
        }
    }

    pub(crate) fn table(&self) -> &Table {
        &self.table
    }

    /// Read a tuple
    ///
    /// Pending changes win over clean entries; only a miss on both issues a
    /// store request at the snapshot version. A pending delete reads as
    /// `KeyNotFound`.
    pub async fn get(&mut self, key: Key) -> Result<Arc<Tuple>> {
        if let Some(change) = self.changes.get(&key) {
            return match &change.tuple {
                Some(tuple) => Ok(tuple.clone()),
                None => Err(TellError::KeyNotFound(key)),
            };
        }
        if let Some(entry) = self.cache.get_mut(&key) {
            entry.read = true;
            return Ok(entry.tuple.clone());
        }
        let found = self
            .store
            .get(&self.table, key, self.snapshot.version)
            .await?
            .ok_or(TellError::KeyNotFound(key))?;
        let tuple = Arc::new(Tuple::decode(self.table.schema.clone(), &found.data)?);
        self.cache.insert(
            key,
            CleanEntry {
                tuple: tuple.clone(),
                version: found.version,
                read: true,
            },
        );
        Ok(tuple)
    }

    /// Stage an insert
    pub fn insert(&mut self, key: Key, tuple: Tuple) -> Result<()> {
        if let Some(change) = self.changes.get_mut(&key) {
            return match change.op {
                // the row already exists from this transaction's view
                Operation::Insert | Operation::Update => Err(TellError::KeyExists(key)),
                // insert after delete: the row exists at the store, so this
                // becomes an update against the original clean entry
                Operation::Delete => {
                    change.op = Operation::Update;
                    change.tuple = Some(Arc::new(tuple));
                    Ok(())
                }
            };
        }
        if self.cache.contains_key(&key) {
            return Err(TellError::KeyExists(key));
        }
        self.changes.insert(
            key,
            PendingChange {
                tuple: Some(Arc::new(tuple)),
                op: Operation::Insert,
                base_version: 0,
                before: None,
            },
        );
        Ok(())
    }

    /// Stage an update
    pub fn update(&mut self, key: Key, tuple: Tuple) -> Result<()> {
        if let Some(change) = self.changes.get_mut(&key) {
            return match change.op {
                // the row is still new to the store, keep it an insert
                Operation::Insert => {
                    change.tuple = Some(Arc::new(tuple));
                    Ok(())
                }
                // restage with the new image; the before-image and base
                // version from the first update stay
                Operation::Update => {
                    change.tuple = Some(Arc::new(tuple));
                    Ok(())
                }
                Operation::Delete => Err(TellError::KeyNotFound(key)),
            };
        }
        let entry = self
            .cache
            .remove(&key)
            .ok_or(TellError::KeyNotFound(key))?;
        self.changes.insert(
            key,
            PendingChange {
                tuple: Some(Arc::new(tuple)),
                op: Operation::Update,
                base_version: entry.version,
                before: Some(entry.tuple),
            },
        );
        Ok(())
    }

    /// Stage a delete
    ///
    /// Returns `true` when a pending insert was erased outright, leaving no
    /// trace of the key (the row never existed from the store's view).
    pub fn remove(&mut self, key: Key) -> Result<bool> {
        if let Some(change) = self.changes.get_mut(&key) {
            return match change.op {
                Operation::Insert => {
                    self.changes.remove(&key);
                    Ok(true)
                }
                Operation::Update => {
                    change.op = Operation::Delete;
                    change.tuple = None;
                    Ok(false)
                }
                Operation::Delete => Err(TellError::KeyNotFound(key)),
            };
        }
        let entry = self
            .cache
            .remove(&key)
            .ok_or(TellError::KeyNotFound(key))?;
        self.changes.insert(
            key,
            PendingChange {
                tuple: None,
                op: Operation::Delete,
                base_version: entry.version,
                before: Some(entry.tuple),
            },
        );
        Ok(false)
    }

    /// Whether any changes are staged
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Number of staged changes
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub(crate) fn changes(&self) -> impl Iterator<Item = (&Key, &PendingChange)> {
        self.changes.iter()
    }

    /// Discard all cached state
    pub(crate) fn clear(&mut self) {
        self.cache.clear();
        self.changes.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
