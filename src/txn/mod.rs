//! # Transaction Management
//!
//! Transaction lifecycle (begin/commit/rollback), per-transaction redo
//! journaling into the WAL, undo synthesis for rollback, and the recovery
//! driver that rebuilds in-memory state from the log on startup.
//!
//! ## States
//!
//! ```text
//! ┌────────┐   commit()    ┌───────────┐
//! │ Active │ ────────────> │ Committed │
//! └────────┘               └───────────┘
//!     │  rollback() / drop
//!     v
//! ┌────────────┐
//! │ RolledBack │
//! └────────────┘
//! ```
//!
//! `Aborted` marks a transaction whose best-effort drop rollback failed
//! partway; its undo records may be incomplete in memory, but recovery
//! resolves it like any other unfinished transaction.

mod manager;
mod transaction;

pub use manager::{RecoveryInfo, TransactionManager, UndoCallback};
pub use transaction::Transaction;

use crate::wal::{OpKind, WalRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnState {
    #[default]
    Active,
    Committed,
    RolledBack,
    Aborted,
}

/// Synthesizes the undo record that reverses `record`, or `None` for
/// non-mutation records.
///
/// | Original            | Undo                          |
/// |---------------------|-------------------------------|
/// | Insert(k, new)      | Delete(k) carrying old = new  |
/// | Update(k, old, new) | Update(k, old = new, new = old) |
/// | Delete(k, old)      | Insert(k, new = old)          |
pub fn undo_record(record: &WalRecord) -> Option<WalRecord> {
    let key = record.key.clone()?;

    let undo = match record.op {
        OpKind::Insert => WalRecord::mutation(
            record.txn_id,
            OpKind::Delete,
            &record.table,
            key,
            record.new_value.clone(),
            None,
        ),
        OpKind::Update => WalRecord::mutation(
            record.txn_id,
            OpKind::Update,
            &record.table,
            key,
            record.new_value.clone(),
            record.old_value.clone(),
        ),
        OpKind::Delete => WalRecord::mutation(
            record.txn_id,
            OpKind::Insert,
            &record.table,
            key,
            None,
            record.old_value.clone(),
        ),
        _ => return None,
    };
    Some(undo)
}
