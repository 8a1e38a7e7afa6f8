//! Transaction façade
//!
//! The public entry point of the transactional layer. A transaction owns its
//! snapshot descriptor and its cache; commit persists the undo log, replays
//! the write set, writes the indexes and signals snapshot completion.
//! Rollback discards the cache and signals the same completion, which is a
//! no-op at the store because nothing was applied.

use std::sync::Arc;

use crate::commit_manager::{SnapshotDescriptor, TransactionType};
use crate::data::{Field, Schema, Tuple};
use crate::store::{Key, TableId};
use crate::{Result, TellError};

use super::cache::{IndexIterator, TransactionCache};
use super::context::ClientContext;

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    RolledBack,
}

/// A snapshot-isolated transaction
///
/// Single-owner: one logical caller drives it, and its operations are not
/// concurrent with each other. Dropping an active transaction rolls it back.
pub struct Transaction {
    context: Arc<ClientContext>,
    snapshot: SnapshotDescriptor,
    tx_type: TransactionType,
    cache: TransactionCache,
    state: TxnState,
}

impl Transaction {
    /// Begin a transaction with a fresh snapshot from the commit manager
    pub async fn start(context: Arc<ClientContext>, tx_type: TransactionType) -> Result<Self> {
        let snapshot = context.commit_manager().start(tx_type).await?;
        log::debug!("transaction {} started", snapshot.version);
        let cache = TransactionCache::new(context.clone(), snapshot.clone());
        Ok(Self {
            context,
            snapshot,
            tx_type,
            cache,
            state: TxnState::Active,
        })
    }

    /// The snapshot descriptor owned by this transaction
    pub fn snapshot(&self) -> &SnapshotDescriptor {
        &self.snapshot
    }

    /// Current lifecycle state
    pub fn state(&self) -> TxnState {
        self.state
    }

    fn check_active(&self) -> Result<()> {
        if self.state != TxnState::Active {
            return Err(TellError::AlreadyFinished);
        }
        Ok(())
    }

    // ========================================================================
    // Tables
    // ========================================================================

    pub async fn open_table(&mut self, name: &str) -> Result<TableId> {
        self.check_active()?;
        self.cache.open_table(name).await
    }

    pub async fn create_table(&mut self, name: &str, schema: Schema) -> Result<TableId> {
        self.check_active()?;
        self.cache.create_table(name, schema).await
    }

    /// Schema of an open table
    pub fn schema(&self, table: TableId) -> Result<Arc<Schema>> {
        self.cache.schema(table)
    }

    // ========================================================================
    // Data operations
    // ========================================================================

    pub async fn get(&mut self, table: TableId, key: Key) -> Result<Arc<Tuple>> {
        self.check_active()?;
        self.cache.get(table, key).await
    }

    pub fn insert(&mut self, table: TableId, key: Key, tuple: Tuple) -> Result<()> {
        self.check_active()?;
        self.cache.insert(table, key, tuple)
    }

    /// Stage an update; both images are needed for undo-log generation and
    /// for diffing old against new index keys.
    pub fn update(&mut self, table: TableId, key: Key, from: &Tuple, to: Tuple) -> Result<()> {
        self.check_active()?;
        self.cache.update(table, key, from, to)
    }

    pub fn remove(&mut self, table: TableId, key: Key, tuple: &Tuple) -> Result<()> {
        self.check_active()?;
        self.cache.remove(table, key, tuple)
    }

    /// Scan a secondary index ascending from `key`
    pub fn lower_bound(
        &self,
        table: TableId,
        index_name: &str,
        key: &[Field],
    ) -> Result<IndexIterator> {
        self.check_active()?;
        self.cache.lower_bound(table, index_name, key)
    }

    /// Scan a secondary index descending from `key`
    pub fn reverse_lower_bound(
        &self,
        table: TableId,
        index_name: &str,
        key: &[Field],
    ) -> Result<IndexIterator> {
        self.check_active()?;
        self.cache.reverse_lower_bound(table, index_name, key)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Commit: write back, then signal snapshot completion
    ///
    /// On a write-back failure the internal recovery path runs and the
    /// transaction ends rolled back; the error is propagated.
    pub async fn commit(&mut self) -> Result<()> {
        self.check_active()?;
        match self.write_back(true).await {
            Ok(()) => match self.complete().await {
                Ok(()) => {
                    self.state = TxnState::Committed;
                    log::debug!("transaction {} committed", self.snapshot.version);
                    Ok(())
                }
                Err(err) => {
                    log::error!(
                        "snapshot {} completion failed after write-back: {}",
                        self.snapshot.version,
                        err
                    );
                    self.state = TxnState::RolledBack;
                    Err(err)
                }
            },
            Err(err) => {
                log::warn!(
                    "transaction {} aborted during commit: {}",
                    self.snapshot.version,
                    err
                );
                self.cache.rollback();
                // best effort: the snapshot must complete either way
                if let Err(complete_err) = self.complete().await {
                    log::error!(
                        "snapshot {} completion failed after abort: {}",
                        self.snapshot.version,
                        complete_err
                    );
                }
                self.state = TxnState::RolledBack;
                Err(err)
            }
        }
    }

    /// Roll back: discard the cache and signal snapshot completion
    pub async fn rollback(&mut self) -> Result<()> {
        self.check_active()?;
        self.cache.rollback();
        self.complete().await?;
        self.state = TxnState::RolledBack;
        log::debug!("transaction {} rolled back", self.snapshot.version);
        Ok(())
    }

    /// Signal snapshot completion, identically on commit and rollback
    async fn complete(&self) -> Result<()> {
        self.context.store().commit(&self.snapshot).await?;
        self.context.commit_manager().release(&self.snapshot);
        Ok(())
    }

    /// Persist the undo log and replay the write set
    async fn write_back(&mut self, with_indexes: bool) -> Result<()> {
        let log = self.cache.undo_log(with_indexes)?;
        if log.is_empty() {
            return Ok(());
        }
        if self.tx_type != TransactionType::ReadWrite {
            return Err(TellError::ReadOnly);
        }
        self.write_undo_log(log).await?;
        self.cache.write_back().await?;
        if with_indexes {
            self.cache.write_indexes()?;
        }
        Ok(())
    }

    /// Write the undo log to the transaction-log table, keyed by the
    /// snapshot version
    async fn write_undo_log(&self, log: Vec<u8>) -> Result<()> {
        let table = self.context.tx_log_table();
        let mut tuple = Tuple::new(table.schema.clone());
        tuple.set(0, Field::Blob(log))?;
        let written = self
            .context
            .store()
            .insert(table, self.snapshot.version, 0, tuple.encode()?, true)
            .await?;
        if !written {
            log::error!(
                "undo log for snapshot {} already present",
                self.snapshot.version
            );
            return Err(TellError::ObjectExists);
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            // The async completion call cannot run here; release the snapshot
            // locally and leave the store untouched, which is what rollback
            // amounts to with no applied writes.
            log::warn!(
                "transaction {} dropped while active, rolling back",
                self.snapshot.version
            );
            self.cache.rollback();
            self.context.commit_manager().release(&self.snapshot);
            self.state = TxnState::RolledBack;
        }
    }
}
