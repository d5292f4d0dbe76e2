//! # Transaction Manager
//!
//! Allocates transaction ids, tracks the set of active transactions, owns
//! the shared WAL handle, and drives startup recovery.
//!
//! The undo callback is supplied by the table façade at construction. It is
//! how rollback and recovery reach back into the in-memory trees without
//! this module knowing anything about tables: the manager hands it a
//! synthesized undo (or replayed redo) record and the façade applies it to
//! the right index.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use eyre::{Result, WrapErr};
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use tracing::{debug, info};

use super::{undo_record, Transaction};
use crate::wal::{OpKind, WalLog, WalRecord};

pub type UndoCallback = Box<dyn Fn(&WalRecord) -> Result<()> + Send + Sync>;

/// What recovery found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryInfo {
    /// Redo records replayed for committed transactions.
    pub records_replayed: usize,
    /// Undo records applied for unfinished transactions.
    pub records_undone: usize,
    pub committed_txns: usize,
    pub rolled_back_txns: usize,
}

pub struct TransactionManager {
    next_txn_id: AtomicI64,
    active: RwLock<HashSet<i64>>,
    wal: Arc<WalLog>,
    undo: UndoCallback,
}

impl TransactionManager {
    pub fn new(wal: Arc<WalLog>, undo: UndoCallback) -> Self {
        Self {
            next_txn_id: AtomicI64::new(1),
            active: RwLock::new(HashSet::new()),
            wal,
            undo,
        }
    }

    /// Begins a transaction: allocates the next id, registers it as active,
    /// and journals a `Begin` record.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);

        self.wal
            .append(&mut WalRecord::marker(id, OpKind::Begin))
            .wrap_err_with(|| format!("failed to journal begin of transaction {}", id))?;

        self.active.write().insert(id);
        Ok(Transaction::new(self, id))
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_active(&self, id: i64) -> bool {
        self.active.read().contains(&id)
    }

    pub(crate) fn wal(&self) -> &WalLog {
        &self.wal
    }

    pub(crate) fn deregister(&self, id: i64) {
        self.active.write().remove(&id);
    }

    pub(crate) fn apply_undo(&self, record: &WalRecord) -> Result<()> {
        (self.undo)(record)
    }

    /// Rebuilds in-memory state from the WAL.
    ///
    /// Mutation records are grouped by transaction id. Transactions with a
    /// `Commit` record are replayed through `apply` in log order; those with
    /// neither a `Commit` nor a `Rollback` are reversed: their mutations
    /// are walked backwards, synthesized into undo records, and dispatched
    /// through `apply`. (A rolled-back transaction's mutations are simply
    /// never replayed: state is rebuilt from scratch, so skipping them *is*
    /// the rollback.) Checkpoint markers carry no state. Finally the id
    /// cursor moves past every id observed.
    pub fn recover_from_wal<F>(&self, mut apply: F) -> Result<RecoveryInfo>
    where
        F: FnMut(&WalRecord) -> Result<()>,
    {
        // Exclusive over the active set: nothing may begin mid-recovery.
        let _guard = self.active.write();

        let records = self.wal.read_all()?;

        let mut committed: HashSet<i64> = HashSet::new();
        let mut rolled_back: HashSet<i64> = HashSet::new();
        let mut mutations: HashMap<i64, Vec<&WalRecord>> = HashMap::new();
        let mut max_txn_id = 0i64;

        for record in &records {
            max_txn_id = max_txn_id.max(record.txn_id);
            match record.op {
                OpKind::Commit => {
                    committed.insert(record.txn_id);
                }
                OpKind::Rollback => {
                    rolled_back.insert(record.txn_id);
                }
                op if op.is_mutation() => {
                    mutations.entry(record.txn_id).or_default().push(record);
                }
                _ => {}
            }
        }

        let mut summary = RecoveryInfo {
            committed_txns: committed.len(),
            rolled_back_txns: rolled_back.len(),
            ..Default::default()
        };

        // Committed transactions: redo in log order, id by id.
        let mut committed_ids: Vec<i64> = committed.iter().copied().collect();
        committed_ids.sort_unstable();
        for id in committed_ids {
            if let Some(records) = mutations.get(&id) {
                for record in records {
                    apply(record)
                        .wrap_err_with(|| format!("failed to replay transaction {}", id))?;
                    summary.records_replayed += 1;
                }
            }
        }

        // Unfinished transactions: undo in reverse order, per transaction.
        let mut unfinished: Vec<i64> = mutations
            .keys()
            .copied()
            .filter(|id| !committed.contains(id) && !rolled_back.contains(id))
            .collect();
        unfinished.sort_unstable();
        for id in &unfinished {
            let records = &mutations[id];
            for record in records.iter().rev() {
                if let Some(undo) = undo_record(record) {
                    apply(&undo)
                        .wrap_err_with(|| format!("failed to undo transaction {}", id))?;
                    summary.records_undone += 1;
                }
            }
            debug!(txn_id = id, "reversed unfinished transaction");
        }

        self.next_txn_id.store(max_txn_id + 1, Ordering::SeqCst);

        info!(
            records = records.len(),
            replayed = summary.records_replayed,
            undone = summary.records_undone,
            committed = summary.committed_txns,
            "WAL recovery complete"
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txn_id", &self.next_txn_id)
            .field("active", &self.active.read().len())
            .finish()
    }
}
