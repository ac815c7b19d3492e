//! Write batches and change sets
//!
//! A `WriteBatch` is the buffered output of a transaction: per table, the
//! final state of every touched key (`Some(row)` = put, `None` = delete).
//! Applying a batch yields a `ChangeSet` naming the tables that changed,
//! which is what live queries are invalidated by.

use linkdb_core::{Row, RowKey};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Buffered writes grouped by table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    tables: BTreeMap<String, BTreeMap<RowKey, Option<Row>>>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a put (overrides any earlier write to the same key)
    pub fn put(&mut self, table: &str, key: RowKey, row: Row) {
        self.table_mut(table).insert(key, Some(row));
    }

    /// Buffer a delete (overrides any earlier write to the same key)
    pub fn delete(&mut self, table: &str, key: RowKey) {
        self.table_mut(table).insert(key, None);
    }

    /// Buffered state of a key: `None` = untouched, `Some(None)` = deleted
    pub fn get(&self, table: &str, key: &RowKey) -> Option<Option<&Row>> {
        self.tables
            .get(table)
            .and_then(|t| t.get(key))
            .map(|w| w.as_ref())
    }

    /// Buffered writes for one table, in key order
    pub fn table(&self, table: &str) -> Option<&BTreeMap<RowKey, Option<Row>>> {
        self.tables.get(table)
    }

    /// Names of every table with buffered writes
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Iterate `(table, writes)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<RowKey, Option<Row>>)> {
        self.tables.iter().map(|(t, w)| (t.as_str(), w))
    }

    /// Number of buffered puts and deletes
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// True if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every buffered write
    pub fn clear(&mut self) {
        self.tables.clear();
    }

    fn table_mut(&mut self, table: &str) -> &mut BTreeMap<RowKey, Option<Row>> {
        self.tables.entry(table.to_string()).or_default()
    }
}

/// Tables changed by one commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// Commit version
    pub version: u64,
    /// Names of changed tables
    pub tables: SmallVec<[String; 4]>,
}

impl ChangeSet {
    /// Whether `table` was changed
    pub fn touches(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }

    /// Whether any of `tables` was changed
    pub fn touches_any<'a>(&self, mut tables: impl Iterator<Item = &'a String>) -> bool {
        tables.any(|t| self.touches(t))
    }
}
