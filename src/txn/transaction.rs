//! # Transaction Handle
//!
//! A [`Transaction`] journals every row mutation into the WAL as it happens
//! (redo) and keeps a private copy of those records (the pending list) so
//! rollback can synthesize undo records in reverse order.
//!
//! Commit is the durability barrier: the `Commit` marker is appended and
//! the WAL is fsynced *before* the call returns. Rollback walks the pending
//! list backwards, dispatches each undo through the manager's callback,
//! then journals `Rollback` and fsyncs.
//!
//! Dropping an `Active` transaction performs a best-effort rollback with
//! errors swallowed, since the scoped-release path must not panic or surface
//! failures from a destructor. If that best-effort pass fails partway the
//! transaction is marked `Aborted`; the WAL still lacks its commit marker,
//! so recovery treats it as unfinished and reverses it properly.

use eyre::{ensure, Result, WrapErr};
use smallvec::SmallVec;

use super::{undo_record, TransactionManager, TxnState};
use crate::types::Value;
use crate::wal::{OpKind, WalRecord};

pub struct Transaction<'a> {
    id: i64,
    state: TxnState,
    pending: SmallVec<[WalRecord; 16]>,
    manager: &'a TransactionManager,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(manager: &'a TransactionManager, id: i64) -> Self {
        Self {
            id,
            state: TxnState::Active,
            pending: SmallVec::new(),
            manager,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn ensure_active(&self, op: &str) -> Result<()> {
        ensure!(
            self.state == TxnState::Active,
            "invalid transaction state: cannot {} transaction {} in state {:?}",
            op,
            self.id,
            self.state
        );
        Ok(())
    }

    /// Journals an insert of `key -> new` into `table`.
    pub fn log_insert(&mut self, table: &str, key: Value, new: Vec<u8>) -> Result<()> {
        self.log_mutation(OpKind::Insert, table, key, None, Some(new))
    }

    /// Journals an update of `key` from `old` to `new`.
    pub fn log_update(&mut self, table: &str, key: Value, old: Vec<u8>, new: Vec<u8>) -> Result<()> {
        self.log_mutation(OpKind::Update, table, key, Some(old), Some(new))
    }

    /// Journals a delete of `key` whose last value was `old`.
    pub fn log_delete(&mut self, table: &str, key: Value, old: Vec<u8>) -> Result<()> {
        self.log_mutation(OpKind::Delete, table, key, Some(old), None)
    }

    fn log_mutation(
        &mut self,
        op: OpKind,
        table: &str,
        key: Value,
        old: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    ) -> Result<()> {
        self.ensure_active("log a mutation in")?;

        let mut record = WalRecord::mutation(self.id, op, table, key, old, new);
        self.manager
            .wal()
            .append(&mut record)
            .wrap_err_with(|| format!("failed to journal {:?} for transaction {}", op, self.id))?;

        self.pending.push(record);
        Ok(())
    }

    /// Appends the commit marker and fsyncs the WAL before reporting
    /// success. Once this returns, every mutation of this transaction is
    /// durable.
    pub fn commit(mut self) -> Result<()> {
        self.ensure_active("commit")?;

        let wal = self.manager.wal();
        wal.append(&mut WalRecord::marker(self.id, OpKind::Commit))
            .wrap_err_with(|| format!("failed to journal commit of transaction {}", self.id))?;
        wal.flush()
            .wrap_err_with(|| format!("failed to fsync commit of transaction {}", self.id))?;

        self.state = TxnState::Committed;
        self.manager.deregister(self.id);
        Ok(())
    }

    /// Reverses every pending mutation in reverse order via the manager's
    /// undo callback, then journals `Rollback` and fsyncs.
    pub fn rollback(mut self) -> Result<()> {
        self.ensure_active("roll back")?;
        self.rollback_inner()
    }

    fn rollback_inner(&mut self) -> Result<()> {
        // Marked before applying undos: if one fails partway the transaction
        // must not present as Active again.
        self.state = TxnState::Aborted;

        let result = (|| {
            for record in self.pending.iter().rev() {
                if let Some(undo) = undo_record(record) {
                    self.manager.apply_undo(&undo).wrap_err_with(|| {
                        format!("failed to apply undo for transaction {}", self.id)
                    })?;
                }
            }

            let wal = self.manager.wal();
            wal.append(&mut WalRecord::marker(self.id, OpKind::Rollback))
                .wrap_err_with(|| {
                    format!("failed to journal rollback of transaction {}", self.id)
                })?;
            wal.flush()
                .wrap_err_with(|| format!("failed to fsync rollback of transaction {}", self.id))
        })();

        // Deregister even on failure: an aborted transaction is not active,
        // and recovery will reverse it from the log.
        self.manager.deregister(self.id);
        result?;

        self.state = TxnState::RolledBack;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            // Scoped release: best-effort rollback, errors swallowed.
            let _ = self.rollback_inner();
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalLog;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup(dir: &std::path::Path) -> (Arc<WalLog>, Arc<Mutex<Vec<WalRecord>>>, TransactionManager) {
        let wal = Arc::new(WalLog::open(dir.join("test.wal")).unwrap());
        let undone = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&undone);
        let manager = TransactionManager::new(
            Arc::clone(&wal),
            Box::new(move |record| {
                sink.lock().push(record.clone());
                Ok(())
            }),
        );
        (wal, undone, manager)
    }

    #[test]
    fn commit_journals_and_deregisters() {
        let dir = tempdir().unwrap();
        let (wal, _, manager) = setup(dir.path());

        let mut txn = manager.begin().unwrap();
        txn.log_insert("t", Value::I64(1), b"v".to_vec()).unwrap();
        txn.commit().unwrap();

        assert_eq!(manager.active_count(), 0);
        let ops: Vec<OpKind> = wal.read_all().unwrap().iter().map(|r| r.op).collect();
        assert_eq!(ops, vec![OpKind::Begin, OpKind::Insert, OpKind::Commit]);
    }

    #[test]
    fn rollback_applies_undo_in_reverse_order() {
        let dir = tempdir().unwrap();
        let (wal, undone, manager) = setup(dir.path());

        let mut txn = manager.begin().unwrap();
        txn.log_insert("t", Value::I64(1), b"a".to_vec()).unwrap();
        txn.log_update("t", Value::I64(2), b"old".to_vec(), b"new".to_vec())
            .unwrap();
        txn.log_delete("t", Value::I64(3), b"gone".to_vec()).unwrap();
        txn.rollback().unwrap();

        let undone = undone.lock();
        assert_eq!(undone.len(), 3);
        // Reverse order: delete undone first (reinsert), insert undone last.
        assert_eq!(undone[0].op, OpKind::Insert);
        assert_eq!(undone[0].key, Some(Value::I64(3)));
        assert_eq!(undone[1].op, OpKind::Update);
        assert_eq!(undone[1].new_value, Some(b"old".to_vec()));
        assert_eq!(undone[2].op, OpKind::Delete);
        assert_eq!(undone[2].key, Some(Value::I64(1)));

        let ops: Vec<OpKind> = wal.read_all().unwrap().iter().map(|r| r.op).collect();
        assert_eq!(
            ops,
            vec![
                OpKind::Begin,
                OpKind::Insert,
                OpKind::Update,
                OpKind::Delete,
                OpKind::Rollback
            ]
        );
    }

    #[test]
    fn drop_of_active_transaction_rolls_back() {
        let dir = tempdir().unwrap();
        let (wal, undone, manager) = setup(dir.path());

        {
            let mut txn = manager.begin().unwrap();
            txn.log_insert("t", Value::I64(9), b"v".to_vec()).unwrap();
        }

        assert_eq!(manager.active_count(), 0);
        assert_eq!(undone.lock().len(), 1);
        let last = wal.read_all().unwrap().last().map(|r| r.op);
        assert_eq!(last, Some(OpKind::Rollback));
    }

    #[test]
    fn drop_after_commit_does_nothing_extra() {
        let dir = tempdir().unwrap();
        let (wal, undone, manager) = setup(dir.path());

        let mut txn = manager.begin().unwrap();
        txn.log_insert("t", Value::I64(1), b"v".to_vec()).unwrap();
        txn.commit().unwrap();

        assert!(undone.lock().is_empty());
        assert_eq!(wal.read_all().unwrap().len(), 3);
    }

    #[test]
    fn drop_swallows_undo_errors() {
        let dir = tempdir().unwrap();
        let wal = Arc::new(WalLog::open(dir.path().join("test.wal")).unwrap());
        let manager = TransactionManager::new(
            Arc::clone(&wal),
            Box::new(|_| eyre::bail!("undo callback failure")),
        );

        {
            let mut txn = manager.begin().unwrap();
            txn.log_insert("t", Value::I64(1), b"v".to_vec()).unwrap();
            // Dropping must not panic even though the undo callback errors.
        }

        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn state_transitions_are_observable() {
        let dir = tempdir().unwrap();
        let (_, _, manager) = setup(dir.path());

        let mut txn = manager.begin().unwrap();
        assert_eq!(txn.state(), TxnState::Active);
        txn.log_insert("t", Value::I64(1), b"v".to_vec()).unwrap();
        assert_eq!(txn.pending_count(), 1);
        txn.commit().unwrap();

        let txn = manager.begin().unwrap();
        assert_eq!(txn.id(), 2);
        txn.rollback().unwrap();
    }
}
