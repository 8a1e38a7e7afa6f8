//! Transaction engine
//!
//! Snapshot-isolated transactions with per-transaction caching, local write
//! buffering and a two-phase write-back guarded by an undo log.

mod cache;
mod context;
mod table_cache;
mod transaction;


pub use cache::{IndexIterator, TransactionCache, UndoLog, UndoRecord};
pub use context::{ClientContext, TRANSACTION_LOG_TABLE};
pub use table_cache::TableCache;
pub use transaction::{Transaction, TxnState};
