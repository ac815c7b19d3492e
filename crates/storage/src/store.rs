//! TableStore: in-memory table storage with version management
//!
//! This module implements the storage backend using:
//! - `BTreeMap<String, Arc<TableData>>` for the table map (copy-on-write tables)
//! - `parking_lot::RwLock` for thread-safe access
//! - `AtomicU64` for the monotonically increasing store version
//!
//! # Design Notes
//!
//! - **No version history**: Each key stores only its latest row
//! - **Batch atomicity**: `apply_batch` holds the write lock for the whole batch,
//!   so no snapshot can observe part of a commit
//! - **Version allocation is external**: the transaction manager hands in the
//!   commit version; the store only records it

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::debug;

use linkdb_core::{Error, Result, RowKey};

use crate::batch::{ChangeSet, WriteBatch};
use crate::snapshot::StoreSnapshot;
use crate::table::{StoredRow, TableData};

/// Serializable copy of one table's rows
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TableDump {
    /// Table name
    pub name: String,
    /// Version of the last commit to the table
    pub version: u64,
    /// Rows in key order
    pub rows: Vec<(RowKey, StoredRow)>,
}

/// Thread-safe table storage
#[derive(Debug)]
pub struct TableStore {
    tables: RwLock<BTreeMap<String, Arc<TableData>>>,
    version: AtomicU64,
}

impl TableStore {
    /// Create an empty store at version 0
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
        }
    }

    /// Rebuild a store from dumped tables
    pub fn from_dump(version: u64, dump: Vec<TableDump>) -> Self {
        let tables = dump
            .into_iter()
            .map(|t| {
                let rows = t.rows.into_iter().collect();
                (t.name, Arc::new(TableData::from_parts(rows, t.version)))
            })
            .collect();
        Self {
            tables: RwLock::new(tables),
            version: AtomicU64::new(version),
        }
    }

    /// Version of the latest applied commit
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Create an empty table
    pub fn create_table(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(Error::InvalidOperation(format!("table {} already exists", name)));
        }
        tables.insert(name.to_string(), Arc::new(TableData::new()));
        Ok(())
    }

    /// Remove a table and all its rows
    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.tables
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::InvalidOperation(format!("table {} does not exist", name)))
    }

    /// Whether a table exists
    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    /// Version of the last commit to `table`
    pub fn table_version(&self, table: &str) -> Option<u64> {
        self.tables.read().get(table).map(|t| t.version())
    }

    /// Create a snapshot of the current state
    ///
    /// Cheap: clones the table map of `Arc`s, not the rows.
    pub fn snapshot(&self) -> StoreSnapshot {
        // Read the version under the lock so it matches the cloned tables
        let tables = self.tables.read();
        let version = self.current_version();
        StoreSnapshot::new(version, tables.clone())
    }

    /// Apply a batch of puts and deletes atomically
    ///
    /// Every table named in the batch must exist; this is checked before
    /// anything is written. All changes carry `version`.
    pub fn apply_batch(&self, batch: &WriteBatch, version: u64) -> Result<ChangeSet> {
        let mut tables = self.tables.write();

        if let Some(missing) = batch.table_names().find(|t| !tables.contains_key(*t)) {
            return Err(Error::InvalidOperation(format!(
                "batch writes to unknown table {}",
                missing
            )));
        }

        let mut changed: SmallVec<[String; 4]> = SmallVec::new();
        for (name, writes) in batch.iter() {
            if writes.is_empty() {
                continue;
            }
            let Some(entry) = tables.get_mut(name) else {
                continue;
            };
            let table = Arc::make_mut(entry);
            for (key, write) in writes {
                match write {
                    Some(row) => table.put(key.clone(), row.clone(), version),
                    None => {
                        table.remove(key);
                    }
                }
            }
            table.set_version(version);
            changed.push(name.to_string());
        }

        self.version.fetch_max(version, Ordering::SeqCst);
        debug!(version, tables = ?changed, writes = batch.len(), "applied batch");

        Ok(ChangeSet {
            version,
            tables: changed,
        })
    }

    /// Copy every table for checkpointing
    pub fn dump(&self) -> (u64, Vec<TableDump>) {
        let tables = self.tables.read();
        let version = self.current_version();
        let dump = tables
            .iter()
            .map(|(name, data)| TableDump {
                name: name.clone(),
                version: data.version(),
                rows: data.iter().map(|(k, r)| (k.clone(), r.clone())).collect(),
            })
            .collect();
        (version, dump)
    }
}

impl Default for TableStore {
    fn default() -> Self {
        Self::new()
    }
}
