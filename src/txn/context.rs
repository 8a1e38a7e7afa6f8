//! Process-wide client context
//!
//! One context is shared by every transaction of a client process. It owns
//! the store and commit-manager handles, memoizes the table catalog, keeps
//! the per-index tree handles and bootstraps the transaction-log table.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::btree::{BdTreeNodeTable, BdTreePointerTable, IndexTree, LocalBTreeIndex};
use crate::commit_manager::{CommitManager, TransactionType};
use crate::data::{FieldType, IndexId, Schema, TableType};
use crate::store::{StoreHandle, Table, TableId};
use crate::{Result, TellError};

use super::transaction::Transaction;

/// Name of the transaction-log system table
pub const TRANSACTION_LOG_TABLE: &str = "__transaction_log";

#[derive(Default)]
struct CatalogState {
    by_name: AHashMap<String, TableId>,
    by_id: AHashMap<TableId, Table>,
}

/// Shared handles of one TellDB client
pub struct ClientContext {
    store: Arc<dyn StoreHandle>,
    commit_manager: Arc<dyn CommitManager>,
    catalog: RwLock<CatalogState>,
    index_trees: RwLock<AHashMap<(TableId, IndexId), Arc<dyn IndexTree>>>,
    tx_log: Table,
}

impl ClientContext {
    /// Create a context, bootstrapping the transaction-log table
    pub async fn new(
        store: Arc<dyn StoreHandle>,
        commit_manager: Arc<dyn CommitManager>,
    ) -> Result<Arc<Self>> {
        let tx_log = match store.open_table(TRANSACTION_LOG_TABLE).await? {
            Some(table) => table,
            None => {
                let mut schema = Schema::new(TableType::NonTransactional);
                schema.add_field(FieldType::Blob, "value", true);
                store.create_table(TRANSACTION_LOG_TABLE, schema).await?
            }
        };
        Ok(Arc::new(Self {
            store,
            commit_manager,
            catalog: RwLock::new(CatalogState::default()),
            index_trees: RwLock::new(AHashMap::new()),
            tx_log,
        }))
    }

    /// Begin a transaction on this context
    pub async fn start_transaction(
        self: &Arc<Self>,
        tx_type: TransactionType,
    ) -> Result<Transaction> {
        Transaction::start(self.clone(), tx_type).await
    }

    pub(crate) fn store(&self) -> &Arc<dyn StoreHandle> {
        &self.store
    }

    pub(crate) fn commit_manager(&self) -> &Arc<dyn CommitManager> {
        &self.commit_manager
    }

    pub(crate) fn tx_log_table(&self) -> &Table {
        &self.tx_log
    }

    /// Create a table, its index backing tables and its index tree handles
    pub(crate) async fn create_table(&self, name: &str, schema: Schema) -> Result<Table> {
        if self.catalog.read().by_name.contains_key(name) {
            return Err(TellError::TableExists(name.to_string()));
        }
        let table = self.store.create_table(name, schema).await?;
        for index in table.schema.indexes() {
            BdTreePointerTable::create_table(
                &self.store,
                &format!("{}.{}_ptr", name, index.name),
            )
            .await?;
            BdTreeNodeTable::create_table(
                &self.store,
                &format!("{}.{}_node", name, index.name),
            )
            .await?;
        }
        self.register(&table);
        Ok(table)
    }

    /// Open a table by name, memoizing it in the catalog
    pub(crate) async fn open_table(&self, name: &str) -> Result<Table> {
        {
            let catalog = self.catalog.read();
            if let Some(table) = catalog
                .by_name
                .get(name)
                .and_then(|id| catalog.by_id.get(id))
            {
                return Ok(table.clone());
            }
        }
        let table = self
            .store
            .open_table(name)
            .await?
            .ok_or_else(|| TellError::TableNotFound(name.to_string()))?;
        self.register(&table);
        Ok(table)
    }

    /// Table descriptor by id
    pub(crate) fn table(&self, id: TableId) -> Result<Table> {
        self.catalog
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| TellError::TableNotFound(format!("#{}", id)))
    }

    /// Tree handle for one index of a table
    pub(crate) fn index_tree(&self, table: TableId, index: IndexId) -> Result<Arc<dyn IndexTree>> {
        self.index_trees
            .read()
            .get(&(table, index))
            .cloned()
            .ok_or_else(|| TellError::IndexNotFound(format!("#{} of table #{}", index, table)))
    }

    fn register(&self, table: &Table) {
        let mut catalog = self.catalog.write();
        catalog.by_name.insert(table.name.clone(), table.id);
        catalog.by_id.insert(table.id, table.clone());
        drop(catalog);

        let mut trees = self.index_trees.write();
        for index in table.schema.indexes() {
            trees
                .entry((table.id, index.id))
                .or_insert_with(|| Arc::new(LocalBTreeIndex::new()));
        }
    }
}
