//! TellDB client transactional layer
//!
//! A client-side layer that provides snapshot-isolated multi-version
//! transactions on top of a remote, non-transactional record store and a
//! central commit-timestamp authority. Reads go through a per-transaction
//! cache, writes are buffered locally and applied in a two-phase write-back
//! guarded by an undo log, and secondary indexes are kept in B-trees whose
//! nodes live as records in the same store.

pub mod btree;
pub mod commit_manager;
pub mod data;
pub mod store;
pub mod txn;

// Re-export main types
pub use commit_manager::{CommitManager, LocalCommitManager, SnapshotDescriptor, TransactionType};
pub use data::{Field, FieldType, Schema, TableType, Tuple};
pub use store::{Key, StoreHandle, Table, TableId};
pub use txn::{ClientContext, Transaction};

/// Transactional layer error type
#[derive(Debug, thiserror::Error)]
pub enum TellError {
    #[error("object does not exist")]
    ObjectDoesntExist,

    #[error("object already exists")]
    ObjectExists,

    #[error("wrong version")]
    WrongVersion,

    #[error("key not found: {0}")]
    KeyNotFound(Key),

    #[error("key already exists: {0}")]
    KeyExists(Key),

    #[error("type mismatch: {left:?} vs {right:?}")]
    TypeMismatch { left: FieldType, right: FieldType },

    #[error("cannot order fields of type {0:?}")]
    Unorderable(FieldType),

    #[error("cannot cast {from:?} to {to:?}")]
    BadCast { from: FieldType, to: FieldType },

    #[error("cannot serialize a field of type {0:?}")]
    NotSerializable(FieldType),

    #[error("write attempted in a read-only transaction")]
    ReadOnly,

    #[error("write conflict on table {table} key {key}")]
    Conflict { table: TableId, key: Key },

    #[error("transaction has already finished")]
    AlreadyFinished,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, TellError>;
