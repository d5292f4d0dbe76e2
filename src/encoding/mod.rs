//! Byte-level encoding primitives shared by the value codec and the WAL.

pub mod varint;

pub use varint::{read_varint, varint_len, write_varint};
