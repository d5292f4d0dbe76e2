//! # Table Façade
//!
//! A [`Table`] pairs a schema with the B+tree that indexes its rows by
//! primary key. Mutations are WAL-first: the row change is journaled
//! through the caller's transaction before the tree is touched, so a crash
//! between the two leaves a redo record that recovery replays (or an
//! unfinished transaction it reverses).
//!
//! The tree sits behind a reader/writer lock. Mutations hold it exclusively
//! across journal-plus-apply; reads and scans take it shared and copy rows
//! out, so every scan is a consistent snapshot taken at one point in the
//! lock order.

use eyre::{Result, WrapErr};
use parking_lot::RwLock;

use super::row::{decode_row, encode_row, primary_key_value, Row};
use super::TableSchema;
use crate::btree::BTree;
use crate::txn::Transaction;
use crate::types::Value;
use crate::wal::{OpKind, WalRecord};

#[derive(Debug)]
pub struct Table {
    name: String,
    schema: TableSchema,
    tree: RwLock<BTree>,
}

impl Table {
    pub(crate) fn new(name: String, schema: TableSchema, order: usize) -> Result<Self> {
        let tree = BTree::new(order, schema.key_type())?;
        Ok(Self {
            name,
            schema,
            tree: RwLock::new(tree),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Number of rows currently indexed.
    pub fn row_count(&self) -> usize {
        self.tree.read().len()
    }

    /// Inserts `row`, journaling through `txn`. An existing row under the
    /// same key is replaced (journaled as an update carrying the old blob).
    pub fn insert(&self, txn: &mut Transaction<'_>, row: &Row) -> Result<()> {
        let blob = encode_row(&self.schema, row)?;
        let key = primary_key_value(&self.schema, row)?;

        let mut tree = self.tree.write();
        match tree.find(&key)?.map(|v| v.to_vec()) {
            Some(old) => txn.log_update(&self.name, key.clone(), old, blob.clone())?,
            None => txn.log_insert(&self.name, key.clone(), blob.clone())?,
        }
        tree.insert(key, blob)?;
        Ok(())
    }

    /// Updates the row stored under `row`'s primary key. Errors when no such
    /// row exists.
    pub fn update(&self, txn: &mut Transaction<'_>, row: &Row) -> Result<()> {
        let blob = encode_row(&self.schema, row)?;
        let key = primary_key_value(&self.schema, row)?;

        let mut tree = self.tree.write();
        let old = tree
            .find(&key)?
            .map(|v| v.to_vec())
            .ok_or_else(|| eyre::eyre!("no row with key {} in table '{}'", key, self.name))?;

        txn.log_update(&self.name, key.clone(), old, blob.clone())?;
        tree.insert(key, blob)?;
        Ok(())
    }

    /// Deletes the row under `key`, returning whether it existed.
    pub fn delete(&self, txn: &mut Transaction<'_>, key: &Value) -> Result<bool> {
        let mut tree = self.tree.write();
        let old = match tree.find(key)?.map(|v| v.to_vec()) {
            Some(old) => old,
            None => return Ok(false),
        };

        txn.log_delete(&self.name, key.clone(), old)?;
        tree.delete(key)?;
        Ok(true)
    }

    /// Point lookup by primary key.
    pub fn get(&self, key: &Value) -> Result<Option<Row>> {
        let tree = self.tree.read();
        match tree.find(key)? {
            Some(blob) => Ok(Some(decode_row(&self.schema, blob)?)),
            None => Ok(None),
        }
    }

    /// Every row in primary-key order, decoded, as one consistent snapshot.
    pub fn scan(&self) -> Result<Vec<(Value, Row)>> {
        let tree = self.tree.read();
        tree.iter_all()
            .map(|(key, blob)| Ok((key.clone(), decode_row(&self.schema, blob)?)))
            .collect()
    }

    /// Rows with keys in `[lo, hi]` (inclusive; `None` leaves a side open),
    /// in key order.
    pub fn range(&self, lo: Option<&Value>, hi: Option<&Value>) -> Result<Vec<(Value, Row)>> {
        let tree = self.tree.read();
        tree.range(lo, hi)?
            .map(|(key, blob)| Ok((key.clone(), decode_row(&self.schema, blob)?)))
            .collect()
    }

    /// Applies a redo or undo record to the tree directly, bypassing
    /// journaling. This is the rollback/recovery entry point: the record
    /// already lives in the WAL (or reverses one that does).
    pub(crate) fn apply(&self, record: &WalRecord) -> Result<()> {
        let key = record
            .key
            .clone()
            .ok_or_else(|| eyre::eyre!("mutation record without a key"))?;

        let mut tree = self.tree.write();
        match record.op {
            OpKind::Insert | OpKind::Update => {
                let blob = record.new_value.clone().ok_or_else(|| {
                    eyre::eyre!("{:?} record without a new value", record.op)
                })?;
                tree.insert(key, blob)
                    .wrap_err_with(|| format!("failed to apply {:?} to '{}'", record.op, self.name))?;
            }
            OpKind::Delete => {
                tree.delete(&key)
                    .wrap_err_with(|| format!("failed to apply delete to '{}'", self.name))?;
            }
            other => eyre::bail!("cannot apply non-mutation record {:?}", other),
        }
        Ok(())
    }
}
