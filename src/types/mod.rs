//! Typed scalar values and their byte codecs.
//!
//! The engine stores opaque blobs keyed by typed scalars. This module defines
//! the closed set of scalar variants ([`DataType`], [`Value`]), the null-flag
//! byte encoding used for row columns, the tagged encoding used for WAL keys,
//! and the per-variant total order the B+tree sorts by.

mod data_type;
mod value;

pub use data_type::DataType;
pub use value::{compare_nullable, Value};
