//! # Table Schemas
//!
//! A [`TableSchema`] is a list of typed columns plus the index of the
//! primary-key column. The engine core never sees schemas; they exist so
//! the façade can encode rows into blobs and pick the tree key out of a
//! row. Schemas are not persisted: callers redeclare tables (with identical
//! schemas) after reopening a database, before recovery reattaches WAL
//! records to them.

use eyre::{bail, ensure, Result};

use crate::types::DataType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<Column>,
    primary_key: usize,
}

impl TableSchema {
    /// Builds a schema whose primary key is the column named
    /// `primary_key_column`.
    pub fn new(columns: Vec<Column>, primary_key_column: &str) -> Result<Self> {
        ensure!(!columns.is_empty(), "a table needs at least one column");

        for (i, a) in columns.iter().enumerate() {
            for b in &columns[i + 1..] {
                ensure!(
                    a.name != b.name,
                    "duplicate column name '{}' in schema",
                    a.name
                );
            }
        }

        let primary_key = match columns.iter().position(|c| c.name == primary_key_column) {
            Some(idx) => idx,
            None => bail!(
                "primary key missing: no column named '{}' in schema",
                primary_key_column
            ),
        };

        Ok(Self {
            columns,
            primary_key,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Index of the primary-key column.
    pub fn primary_key(&self) -> usize {
        self.primary_key
    }

    /// Type of the primary-key column; also the tree's key type.
    pub fn key_type(&self) -> DataType {
        self.columns[self.primary_key].data_type()
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| eyre::eyre!("unknown column '{}'", name))
    }
}
