//! # Database Handle
//!
//! `Database` wires the subsystems together: the paged store under the data
//! file, the WAL beside it, the transaction manager whose undo callback
//! reaches back into the table registry, and the tables themselves.
//!
//! ## Open and Recovery
//!
//! Opening a database does not replay the WAL: tables are in-memory and the
//! schema catalog is not persisted, so there is nothing to attach records
//! to yet. The caller redeclares each table (with the same schema it had)
//! and then calls [`Database::recover`], which replays committed
//! transactions and reverses unfinished ones. Records naming a table that
//! has not been redeclared are skipped with a warning.
//!
//! ```ignore
//! let db = Database::open(StoreOptions::new("./app"))?;
//! db.create_table("users", schema)?;
//! let info = db.recover()?;
//! ```
//!
//! ## Autocommit
//!
//! `insert`/`update`/`delete` on the database wrap a single-row mutation in
//! its own begin/commit pair. Multi-row atomicity goes through
//! [`Database::begin`] and the table methods.

use std::sync::Arc;

use eyre::{ensure, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::warn;

use super::{Row, Table, TableSchema};
use crate::config::DEFAULT_BRANCHING_ORDER;
use crate::storage::{PagedStore, StoreOptions};
use crate::txn::{RecoveryInfo, Transaction, TransactionManager};
use crate::types::Value;
use crate::wal::{WalLog, WalRecord};

type TableRegistry = Arc<RwLock<HashMap<String, Arc<Table>>>>;

#[derive(Debug)]
pub struct Database {
    store: Arc<PagedStore>,
    wal: Arc<WalLog>,
    manager: TransactionManager,
    tables: TableRegistry,
}

impl Database {
    /// Opens (or creates) the data file described by `options` and the WAL
    /// beside it.
    pub fn open(options: StoreOptions) -> Result<Self> {
        let store = Arc::new(PagedStore::open(options)?);
        let wal = Arc::new(WalLog::open(WalLog::path_for(store.path()))?);

        let tables: TableRegistry = Arc::new(RwLock::new(HashMap::new()));
        let undo_tables = Arc::clone(&tables);
        let manager = TransactionManager::new(
            Arc::clone(&wal),
            Box::new(move |record| apply_to_registry(&undo_tables, record)),
        );

        Ok(Self {
            store,
            wal,
            manager,
            tables,
        })
    }

    /// Declares a table with the default branching order.
    pub fn create_table(&self, name: &str, schema: TableSchema) -> Result<Arc<Table>> {
        self.create_table_with_order(name, schema, DEFAULT_BRANCHING_ORDER)
    }

    /// Declares a table whose index uses branching order `order`.
    pub fn create_table_with_order(
        &self,
        name: &str,
        schema: TableSchema,
        order: usize,
    ) -> Result<Arc<Table>> {
        let mut tables = self.tables.write();
        ensure!(!tables.contains_key(name), "duplicate table '{}'", name);

        let table = Arc::new(Table::new(name.to_string(), schema, order)?);
        tables.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| eyre::eyre!("unknown table '{}'", name))
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        ensure!(
            self.tables.write().remove(name).is_some(),
            "unknown table '{}'",
            name
        );
        Ok(())
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// Begins an explicit transaction.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        self.manager.begin()
    }

    /// Replays the WAL into the currently declared tables: committed
    /// transactions forward in log order, unfinished ones reversed. Call
    /// after redeclaring tables on reopen.
    pub fn recover(&self) -> Result<RecoveryInfo> {
        let tables = Arc::clone(&self.tables);
        self.manager
            .recover_from_wal(move |record| apply_to_registry(&tables, record))
    }

    /// Autocommit insert of one row.
    pub fn insert(&self, table: &str, row: &Row) -> Result<()> {
        let table = self.table(table)?;
        let mut txn = self.begin()?;
        table.insert(&mut txn, row)?;
        txn.commit()
    }

    /// Autocommit update of one row (keyed by its primary key).
    pub fn update(&self, table: &str, row: &Row) -> Result<()> {
        let table = self.table(table)?;
        let mut txn = self.begin()?;
        table.update(&mut txn, row)?;
        txn.commit()
    }

    /// Autocommit delete by key. Returns whether the row existed.
    pub fn delete(&self, table: &str, key: &Value) -> Result<bool> {
        let table = self.table(table)?;
        let mut txn = self.begin()?;
        let deleted = table.delete(&mut txn, key)?;
        txn.commit()?;
        Ok(deleted)
    }

    /// Point lookup by primary key.
    pub fn select_by_key(&self, table: &str, key: &Value) -> Result<Option<Row>> {
        self.table(table)?.get(key)
    }

    /// Appends a checkpoint marker to the WAL and returns its sequence.
    pub fn checkpoint(&self) -> Result<u64> {
        self.wal.checkpoint()
    }

    /// Flushes dirty store pages and fsyncs the WAL.
    pub fn flush(&self) -> Result<()> {
        self.store.flush()?;
        self.wal.flush()
    }

    /// Flushes and closes the paged store. The WAL file stays as-is; it is
    /// the durable copy of row data.
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    pub fn store(&self) -> &PagedStore {
        &self.store
    }

    pub fn wal(&self) -> &WalLog {
        &self.wal
    }

    pub fn active_transactions(&self) -> usize {
        self.manager.active_count()
    }
}

/// Routes a redo/undo record to its table, skipping (with a warning) tables
/// that have not been redeclared: the schema catalog is not persisted, so
/// recovery can only reattach records to tables the caller declared.
fn apply_to_registry(
    tables: &RwLock<HashMap<String, Arc<Table>>>,
    record: &WalRecord,
) -> Result<()> {
    let table = tables.read().get(&record.table).cloned();
    match table {
        Some(table) => table.apply(record),
        None => {
            warn!(
                table = %record.table,
                txn_id = record.txn_id,
                "skipping WAL record for undeclared table"
            );
            Ok(())
        }
    }
}
