//! Write-ahead logging: the record codec and the append-only log file.

mod log;
mod record;

pub use log::WalLog;
pub use record::{now_ms, OpKind, WalRecord};
