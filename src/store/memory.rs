//! In-process store
//!
//! Implements the store handle contract against process memory: per-record
//! versioned CAS state behind a lock, plus per-operation counters so tests
//! can assert which requests a cache actually issued. It models the record
//! and version surface of the remote store, not its internal MVCC.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::commit_manager::SnapshotDescriptor;
use crate::data::Schema;
use crate::{Result, TellError};

use super::{Key, StoreHandle, StoreTuple, Table, TableId, VERSION_CURRENT};

struct VersionedRecord {
    data: Vec<u8>,
    version: u64,
}

struct TableState {
    table: Table,
    records: AHashMap<Key, VersionedRecord>,
}

#[derive(Default)]
struct Catalog {
    by_name: AHashMap<String, TableId>,
    tables: AHashMap<TableId, TableState>,
}

/// Store handle backed by process memory
pub struct MemoryStore {
    catalog: RwLock<Catalog>,
    next_table_id: AtomicU64,
    // Monitoring counters, read by tests
    get_count: AtomicU64,
    insert_count: AtomicU64,
    update_count: AtomicU64,
    remove_count: AtomicU64,
    commit_count: AtomicU64,
    last_remove_version: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(Catalog::default()),
            next_table_id: AtomicU64::new(1),
            get_count: AtomicU64::new(0),
            insert_count: AtomicU64::new(0),
            update_count: AtomicU64::new(0),
            remove_count: AtomicU64::new(0),
            commit_count: AtomicU64::new(0),
            last_remove_version: AtomicU64::new(0),
        }
    }

    /// Number of `get` requests served
    pub fn get_count(&self) -> u64 {
        self.get_count.load(Ordering::Relaxed)
    }

    /// Number of `insert` requests served
    pub fn insert_count(&self) -> u64 {
        self.insert_count.load(Ordering::Relaxed)
    }

    /// Number of `update` requests served
    pub fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::Relaxed)
    }

    /// Number of `remove` requests served
    pub fn remove_count(&self) -> u64 {
        self.remove_count.load(Ordering::Relaxed)
    }

    /// Number of snapshot completions received
    pub fn commit_count(&self) -> u64 {
        self.commit_count.load(Ordering::Relaxed)
    }

    /// Expected version carried by the most recent remove request
    pub fn last_remove_version(&self) -> u64 {
        self.last_remove_version.load(Ordering::Relaxed)
    }

    /// Number of records currently stored in a table
    pub fn record_count(&self, table: TableId) -> usize {
        self.catalog
            .read()
            .tables
            .get(&table)
            .map(|t| t.records.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreHandle for MemoryStore {
    async fn get(&self, table: &Table, key: Key, _version: u64) -> Result<Option<StoreTuple>> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        let catalog = self.catalog.read();
        let state = catalog
            .tables
            .get(&table.id)
            .ok_or_else(|| TellError::TableNotFound(table.name.clone()))?;
        Ok(state.records.get(&key).map(|rec| StoreTuple {
            data: rec.data.clone(),
            version: rec.version,
        }))
    }

    async fn insert(
        &self,
        table: &Table,
        key: Key,
        version: u64,
        data: Vec<u8>,
        check_absence: bool,
    ) -> Result<bool> {
        self.insert_count.fetch_add(1, Ordering::Relaxed);
        let mut catalog = self.catalog.write();
        let state = catalog
            .tables
            .get_mut(&table.id)
            .ok_or_else(|| TellError::TableNotFound(table.name.clone()))?;
        if check_absence && state.records.contains_key(&key) {
            return Ok(false);
        }
        state.records.insert(key, VersionedRecord { data, version });
        Ok(true)
    }

    async fn update(
        &self,
        table: &Table,
        key: Key,
        expected_version: u64,
        data: Vec<u8>,
    ) -> Result<bool> {
        self.update_count.fetch_add(1, Ordering::Relaxed);
        if expected_version == VERSION_CURRENT {
            return Ok(false);
        }
        let mut catalog = self.catalog.write();
        let state = catalog
            .tables
            .get_mut(&table.id)
            .ok_or_else(|| TellError::TableNotFound(table.name.clone()))?;
        match state.records.get_mut(&key) {
            Some(rec) if rec.version == expected_version => {
                rec.data = data;
                rec.version = expected_version + 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, table: &Table, key: Key, expected_version: u64) -> Result<bool> {
        self.remove_count.fetch_add(1, Ordering::Relaxed);
        self.last_remove_version
            .store(expected_version, Ordering::Relaxed);
        if expected_version == VERSION_CURRENT {
            // reserved sentinel, never a valid deletion version
            return Ok(false);
        }
        let mut catalog = self.catalog.write();
        let state = catalog
            .tables
            .get_mut(&table.id)
            .ok_or_else(|| TellError::TableNotFound(table.name.clone()))?;
        match state.records.get(&key) {
            Some(rec) if expected_version == rec.version => {
                state.records.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_table(&self, name: &str, schema: Schema) -> Result<Table> {
        let mut catalog = self.catalog.write();
        if catalog.by_name.contains_key(name) {
            return Err(TellError::TableExists(name.to_string()));
        }
        let id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
        let table = Table {
            id,
            name: name.to_string(),
            schema: Arc::new(schema),
        };
        catalog.by_name.insert(name.to_string(), id);
        catalog.tables.insert(
            id,
            TableState {
                table: table.clone(),
                records: AHashMap::new(),
            },
        );
        Ok(table)
    }

    async fn open_table(&self, name: &str) -> Result<Option<Table>> {
        let catalog = self.catalog.read();
        Ok(catalog
            .by_name
            .get(name)
            .and_then(|id| catalog.tables.get(id))
            .map(|state| state.table.clone()))
    }

    async fn commit(&self, _snapshot: &SnapshotDescriptor) -> Result<()> {
        self.commit_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FieldType, TableType};

    async fn store_with_table() -> (MemoryStore, Table) {
        let store = MemoryStore::new();
        let mut schema = Schema::new(TableType::NonTransactional);
        schema.add_field(FieldType::BigInt, "v", true);
        let table = store.create_table("t", schema).await.unwrap();
        (store, table)
    }

    #[tokio::test]
    async fn test_insert_check_absence() {
        let (store, table) = store_with_table().await;
        assert!(store.insert(&table, 1, 0, vec![1], true).await.unwrap());
        assert!(!store.insert(&table, 1, 0, vec![2], true).await.unwrap());
        // blind insert overwrites
        assert!(store.insert(&table, 1, 0, vec![3], false).await.unwrap());
        let rec = store.get(&table, 1, VERSION_CURRENT).await.unwrap().unwrap();
        assert_eq!(rec.data, vec![3]);
    }

    #[tokio::test]
    async fn test_update_cas() {
        let (store, table) = store_with_table().await;
        store.insert(&table, 1, 0, vec![1], true).await.unwrap();

        assert!(store.update(&table, 1, 0, vec![2]).await.unwrap());
        // stale version
        assert!(!store.update(&table, 1, 0, vec![3]).await.unwrap());
        let rec = store.get(&table, 1, VERSION_CURRENT).await.unwrap().unwrap();
        assert_eq!(rec.version, 1);
        assert_eq!(rec.data, vec![2]);
    }

    #[tokio::test]
    async fn test_remove_version_rules() {
        let (store, table) = store_with_table().await;
        store.insert(&table, 1, 0, vec![1], true).await.unwrap();
        store.update(&table, 1, 0, vec![2]).await.unwrap();

        // both a stale and a too-new expectation fail the CAS
        assert!(!store.remove(&table, 1, 0).await.unwrap());
        assert!(!store.remove(&table, 1, 5).await.unwrap());
        assert!(store.remove(&table, 1, 1).await.unwrap());
        assert!(store.get(&table, 1, VERSION_CURRENT).await.unwrap().is_none());
        // missing key
        assert!(!store.remove(&table, 1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_reserved_version_rejected() {
        let (store, table) = store_with_table().await;
        store.insert(&table, 1, 0, vec![1], true).await.unwrap();
        assert!(!store.remove(&table, 1, VERSION_CURRENT).await.unwrap());
        assert!(!store.update(&table, 1, VERSION_CURRENT, vec![2]).await.unwrap());
    }

    #[tokio::test]
    async fn test_counters() {
        let (store, table) = store_with_table().await;
        store.insert(&table, 1, 0, vec![1], true).await.unwrap();
        store.get(&table, 1, VERSION_CURRENT).await.unwrap();
        store.get(&table, 2, VERSION_CURRENT).await.unwrap();
        assert_eq!(store.insert_count(), 1);
        assert_eq!(store.get_count(), 2);
        assert_eq!(store.record_count(table.id), 1);
    }

    #[tokio::test]
    async fn test_table_catalog() {
        let (store, _table) = store_with_table().await;
        assert!(store.open_table("t").await.unwrap().is_some());
        assert!(store.open_table("missing").await.unwrap().is_none());
        let schema = Schema::new(TableType::Transactional);
        assert!(matches!(
            store.create_table("t", schema).await.unwrap_err(),
            TellError::TableExists(_)
        ));
    }
}
