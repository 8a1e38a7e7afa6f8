//! Store handle contract
//!
//! The remote record store is consumed through `StoreHandle`. Every record is
//! addressed by a 64-bit key within a table and carries a version used for
//! compare-and-swap writes. Reads name the version set they want to observe:
//! the transaction's snapshot version, or `VERSION_CURRENT` for the latest
//! record regardless of snapshots.

use std::sync::Arc;

use async_trait::async_trait;

use crate::commit_manager::SnapshotDescriptor;
use crate::data::Schema;
use crate::Result;

pub mod memory;

pub use memory::MemoryStore;

/// Store-wide table id
pub type TableId = u64;

/// Record key within a table
pub type Key = u64;

/// Reserved version denoting the current active version of a record
///
/// Passing this as a CAS expectation is invalid; the store owns the meaning
/// of this sentinel.
pub const VERSION_CURRENT: u64 = u64::MAX;

/// Table descriptor handed out by the store
#[derive(Debug, Clone)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub schema: Arc<Schema>,
}

/// A record as returned by the store
#[derive(Debug, Clone)]
pub struct StoreTuple {
    /// Encoded tuple image
    pub data: Vec<u8>,
    /// Record version at read time
    pub version: u64,
}

/// Asynchronous handle to the record store
///
/// All operations complete on the transport's event loop; the futures are
/// the only suspension points of the transactional layer.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Point read. `version` is the snapshot version to read at, or
    /// `VERSION_CURRENT` for the latest record.
    async fn get(&self, table: &Table, key: Key, version: u64) -> Result<Option<StoreTuple>>;

    /// Install a record at an initial version. With `check_absence` the
    /// insert fails (returns `false`) when the key already exists.
    async fn insert(
        &self,
        table: &Table,
        key: Key,
        version: u64,
        data: Vec<u8>,
        check_absence: bool,
    ) -> Result<bool>;

    /// Compare-and-swap update; `false` on version mismatch.
    async fn update(
        &self,
        table: &Table,
        key: Key,
        expected_version: u64,
        data: Vec<u8>,
    ) -> Result<bool>;

    /// Compare-and-swap delete; `false` on version mismatch.
    async fn remove(&self, table: &Table, key: Key, expected_version: u64) -> Result<bool>;

    /// Create a table with the given schema.
    async fn create_table(&self, name: &str, schema: Schema) -> Result<Table>;

    /// Look up a table by name.
    async fn open_table(&self, name: &str) -> Result<Option<Table>>;

    /// Signal snapshot completion. Called identically on commit and on
    /// rollback; a rolled-back transaction has applied no writes, which makes
    /// this a no-op at the store.
    async fn commit(&self, snapshot: &SnapshotDescriptor) -> Result<()>;
}
