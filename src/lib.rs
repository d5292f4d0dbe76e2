//! # mindb: Embedded Typed-Row Storage Engine
//!
//! mindb is a single-process, embedded key/value storage engine with
//! ACID-style transactions over typed rows. Callers see a table
//! abstraction (schema-defined rows keyed by a primary key); underneath,
//! three subsystems do the work:
//!
//! 1. **Paged file store**: a single backing file of 4 KiB pages behind a
//!    bounded LRU cache of pages or 8-page extents, with an optional
//!    memory-mapped access mode.
//! 2. **B+tree index**: an in-memory, order-preserving index from typed
//!    keys to opaque row blobs, with point lookup, ordered scans, and
//!    bounded range scans.
//! 3. **Write-ahead log**: an append-only record log beside the data file
//!    providing durability for committed transactions, undo for rolled
//!    back ones, and crash recovery on reopen.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mindb::{Column, Database, DataType, StoreOptions, TableSchema, Value};
//!
//! let db = Database::open(StoreOptions::new("./app"))?;
//! let schema = TableSchema::new(
//!     vec![
//!         Column::new("id", DataType::I64),
//!         Column::new("name", DataType::Text),
//!     ],
//!     "id",
//! )?;
//! db.create_table("users", schema)?;
//! db.recover()?; // reattach any WAL state from a previous run
//!
//! db.insert("users", &vec![Some(Value::I64(1)), Some(Value::Text("Alice".into()))])?;
//! let row = db.select_by_key("users", &Value::I64(1))?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │       Database / Table façade         │   schema, rows, autocommit
//! ├───────────────────┬───────────────────┤
//! │      B+tree       │   Transactions    │   index ⇄ redo/undo journal
//! ├───────────────────┴───────────────────┤
//! │            Write-ahead log            │   framing, fsync, recovery
//! ├───────────────────────────────────────┤
//! │   Paged store (LRU cache + backing)   │   pages, extents, allocator
//! └───────────────────────────────────────┘
//! ```
//!
//! ## Durability Model
//!
//! The B+tree lives in memory; the WAL is the durable copy of row data.
//! Commit fsyncs the WAL before returning, reopening replays it (after the
//! caller redeclares table schemas; the catalog is not persisted), and the
//! WAL therefore refuses checkpoint truncation. Data pages are durable via
//! `flush`, but currently carry allocator state rather than row data.
//!
//! ## Concurrency
//!
//! Parallel OS threads, synchronous operations, one lock per subsystem
//! (reader/writer locks from `parking_lot`). Lock order on the write path
//! is table → tree → transaction → WAL → store.

pub mod btree;
pub mod config;
pub mod database;
pub mod encoding;
pub mod storage;
pub mod txn;
pub mod types;
pub mod wal;

pub use btree::BTree;
pub use database::{Column, Database, Row, Table, TableSchema};
pub use storage::{Extent, LruCache, Page, PagedStore, StoreOptions};
pub use txn::{RecoveryInfo, Transaction, TransactionManager, TxnState};
pub use types::{DataType, Value};
pub use wal::{OpKind, WalLog, WalRecord};
