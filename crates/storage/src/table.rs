//! Per-table row storage
//!
//! A table is an ordered map from primary key to stored row plus the version
//! of the last commit that touched it. The table version is what commit
//! validation compares against a transaction's start version.

use linkdb_core::{Row, RowKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A row together with the commit version that wrote it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    /// Column values
    pub values: Row,
    /// Commit version of the last write to this row
    pub version: u64,
}

/// Rows of one table, ordered by primary key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableData {
    rows: BTreeMap<RowKey, StoredRow>,
    version: u64,
}

impl TableData {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Version of the last commit that changed this table (0 = never)
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Fetch a row by key
    pub fn get(&self, key: &RowKey) -> Option<&StoredRow> {
        self.rows.get(key)
    }

    /// Iterate rows in key order
    pub fn iter(&self) -> impl Iterator<Item = (&RowKey, &StoredRow)> {
        self.rows.iter()
    }

    /// Insert or overwrite a row
    pub(crate) fn put(&mut self, key: RowKey, values: Row, version: u64) {
        self.rows.insert(key, StoredRow { values, version });
    }

    /// Remove a row; returns whether it existed
    pub(crate) fn remove(&mut self, key: &RowKey) -> bool {
        self.rows.remove(key).is_some()
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = self.version.max(version);
    }

    pub(crate) fn from_parts(rows: BTreeMap<RowKey, StoredRow>, version: u64) -> Self {
        Self { rows, version }
    }
}
