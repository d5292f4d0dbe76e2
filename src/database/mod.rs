//! # Typed-Row Façade
//!
//! The façade layers schema-defined rows over the storage core. A table is
//! a schema plus a B+tree keyed by the primary-key column; rows are encoded
//! into opaque blobs before the core ever sees them, and every mutation is
//! journaled through a transaction before it touches the tree.

mod database;
mod row;
mod schema;
mod table;

pub use database::Database;
pub use row::{decode_row, encode_row, primary_key_value, Row};
pub use schema::{Column, TableSchema};
pub use table::Table;
