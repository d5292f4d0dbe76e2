//! # Row Codec
//!
//! A row is one `Option<Value>` per column (`None` is SQL-style null). On
//! the way into the tree a row becomes a blob: the null-flagged encodings
//! of its values concatenated in column order. The schema supplies the
//! types on the way back out, so blobs carry no per-column tags.
//!
//! The core stores these blobs opaquely; only this module and the schema
//! know their shape.

use eyre::{ensure, Result};

use super::TableSchema;
use crate::types::Value;

/// One table row: a value (or null) per column, in schema order.
pub type Row = Vec<Option<Value>>;

/// Encodes `row` against `schema`, validating arity, column types, and that
/// the primary key is non-null.
pub fn encode_row(schema: &TableSchema, row: &Row) -> Result<Vec<u8>> {
    ensure!(
        row.len() == schema.columns().len(),
        "row has {} values but table has {} columns",
        row.len(),
        schema.columns().len()
    );

    let mut buf = Vec::new();
    for (column, value) in schema.columns().iter().zip(row) {
        match value {
            None => {
                Value::encode_null(&mut buf);
            }
            Some(value) => {
                ensure!(
                    value.data_type() == column.data_type(),
                    "column '{}' expects {}, got {}",
                    column.name(),
                    column.data_type(),
                    value.data_type()
                );
                value.encode_into(&mut buf);
            }
        }
    }

    ensure!(
        row[schema.primary_key()].is_some(),
        "primary key column '{}' must not be null",
        schema.columns()[schema.primary_key()].name()
    );

    Ok(buf)
}

/// Decodes a blob produced by [`encode_row`] back into a row.
pub fn decode_row(schema: &TableSchema, bytes: &[u8]) -> Result<Row> {
    let mut row = Vec::with_capacity(schema.columns().len());
    let mut offset = 0;

    for column in schema.columns() {
        let (value, read) = Value::decode(&bytes[offset..], column.data_type())?;
        row.push(value);
        offset += read;
    }

    ensure!(
        offset == bytes.len(),
        "{} trailing bytes after decoding row",
        bytes.len() - offset
    );
    Ok(row)
}

/// The primary-key value of `row`. Errors when it is null.
pub fn primary_key_value(schema: &TableSchema, row: &Row) -> Result<Value> {
    row.get(schema.primary_key())
        .and_then(|v| v.clone())
        .ok_or_else(|| {
            eyre::eyre!(
                "primary key column '{}' must not be null",
                schema.columns()[schema.primary_key()].name()
            )
        })
}
