//! Transaction context for OCC
//!
//! TransactionContext tracks the tables a transaction read and buffers all
//! of its writes, enabling table-level validation at commit time.
//!
//! Reads come from the snapshot taken at begin, overlaid with the
//! transaction's own buffered writes (read-your-writes).

use linkdb_core::{Error, Result, Row, RowKey};
use linkdb_storage::{StoreSnapshot, WriteBatch};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

/// Summary of pending operations that would be discarded on abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOperations {
    /// Number of pending puts
    pub puts: usize,
    /// Number of pending deletes
    pub deletes: usize,
}

impl PendingOperations {
    /// Total number of pending operations
    pub fn total(&self) -> usize {
        self.puts + self.deletes
    }

    /// Check if there are no pending operations
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Status of a transaction in its lifecycle
///
/// State transitions:
/// - `Active` → `Validating` (begin commit)
/// - `Validating` → `Committed` (validation passed)
/// - `Validating` → `Aborted` (conflict detected)
/// - `Active` → `Aborted` (user abort or failed statement)
///
/// Terminal states (no transitions allowed):
/// - `Committed`
/// - `Aborted`
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionStatus {
    /// Transaction is executing, can read/write
    Active,
    /// Transaction is being validated for conflicts
    Validating,
    /// Transaction committed successfully
    Committed,
    /// Transaction aborted; `cause` is the failure that aborted it
    Aborted {
        /// The original error
        cause: Error,
    },
}

/// Transaction state: snapshot, read set and buffered writes
///
/// # Lifecycle
///
/// 1. **BEGIN**: Created by the transaction manager, status is `Active`
/// 2. **READ/WRITE**: `get()`, `scan()`, `put()`, `delete()`
/// 3. **VALIDATE**: the manager checks every touched table for newer commits
/// 4. **COMMIT/ABORT**: writes applied atomically, or discarded
pub struct TransactionContext {
    /// Unique transaction ID
    pub txn_id: u64,
    /// Store version the snapshot was taken at
    pub start_version: u64,
    snapshot: StoreSnapshot,
    /// Tables read through this transaction
    read_set: BTreeSet<String>,
    /// Buffered writes, applied at commit
    writes: WriteBatch,
    /// Current transaction status
    pub status: TransactionStatus,
    start_time: Instant,
    /// Outcome already counted by the coordinator
    settled: bool,
}

impl TransactionContext {
    /// Create a transaction over a snapshot
    pub fn new(txn_id: u64, snapshot: StoreSnapshot) -> Self {
        TransactionContext {
            txn_id,
            start_version: snapshot.version(),
            snapshot,
            read_set: BTreeSet::new(),
            writes: WriteBatch::new(),
            status: TransactionStatus::Active,
            start_time: Instant::now(),
            settled: false,
        }
    }

    // === Read Operations ===

    /// Fetch a row by key, seeing this transaction's own writes
    pub fn get(&mut self, table: &str, key: &RowKey) -> Result<Option<Row>> {
        self.ensure_active()?;
        self.read_set.insert(table.to_string());
        if let Some(buffered) = self.writes.get(table, key) {
            return Ok(buffered.cloned());
        }
        Ok(self.snapshot.get(table, key).cloned())
    }

    /// All rows of a table in key order, seeing this transaction's own writes
    pub fn scan(&mut self, table: &str) -> Result<Vec<(RowKey, Row)>> {
        self.ensure_active()?;
        self.read_set.insert(table.to_string());

        let Some(buffered) = self.writes.table(table) else {
            return Ok(self
                .snapshot
                .scan(table)
                .map(|(k, r)| (k.clone(), r.clone()))
                .collect());
        };

        let mut merged: BTreeMap<RowKey, Row> = self
            .snapshot
            .scan(table)
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect();
        for (key, write) in buffered {
            match write {
                Some(row) => {
                    merged.insert(key.clone(), row.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Whether the table existed when the transaction began
    pub fn table_exists(&self, table: &str) -> bool {
        self.snapshot.contains_table(table)
    }

    // === Write Operations ===

    /// Buffer a put
    pub fn put(&mut self, table: &str, key: RowKey, row: Row) -> Result<()> {
        self.ensure_active()?;
        self.writes.put(table, key, row);
        Ok(())
    }

    /// Buffer a delete
    pub fn delete(&mut self, table: &str, key: RowKey) -> Result<()> {
        self.ensure_active()?;
        self.writes.delete(table, key);
        Ok(())
    }

    /// Mark the transaction's end as accounted for
    ///
    /// Returns true only on the first call, so a commit failure followed by
    /// an explicit abort (or a repeated abort) is counted once.
    pub fn settle(&mut self) -> bool {
        !std::mem::replace(&mut self.settled, true)
    }

    // === Accessors ===

    /// Snapshot the transaction reads from
    pub fn snapshot(&self) -> &StoreSnapshot {
        &self.snapshot
    }

    /// Buffered writes
    pub fn writes(&self) -> &WriteBatch {
        &self.writes
    }

    /// Tables read so far
    pub fn read_tables(&self) -> impl Iterator<Item = &str> {
        self.read_set.iter().map(String::as_str)
    }

    /// Every table read or written, each once
    pub fn touched_tables(&self) -> BTreeSet<String> {
        self.read_set
            .iter()
            .cloned()
            .chain(self.writes.table_names().map(str::to_string))
            .collect()
    }

    /// Get summary of pending operations
    pub fn pending_operations(&self) -> PendingOperations {
        let (mut puts, mut deletes) = (0, 0);
        for (_, writes) in self.writes.iter() {
            for write in writes.values() {
                if write.is_some() {
                    puts += 1;
                } else {
                    deletes += 1;
                }
            }
        }
        PendingOperations { puts, deletes }
    }

    /// True if nothing has been written
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    // === State Management ===

    /// Check if transaction is in Active state
    pub fn is_active(&self) -> bool {
        matches!(self.status, TransactionStatus::Active)
    }

    /// Check if transaction is committed
    pub fn is_committed(&self) -> bool {
        matches!(self.status, TransactionStatus::Committed)
    }

    /// Check if transaction is aborted
    pub fn is_aborted(&self) -> bool {
        matches!(self.status, TransactionStatus::Aborted { .. })
    }

    /// The error that aborted the transaction, if any
    pub fn abort_cause(&self) -> Option<&Error> {
        match &self.status {
            TransactionStatus::Aborted { cause } => Some(cause),
            _ => None,
        }
    }

    /// Get the elapsed time since transaction started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Check if transaction can accept operations
    ///
    /// An aborted transaction reports the error that aborted it.
    pub fn ensure_active(&self) -> Result<()> {
        match &self.status {
            TransactionStatus::Active => Ok(()),
            TransactionStatus::Aborted { cause } => Err(cause.clone()),
            other => Err(Error::InvalidOperation(format!(
                "transaction {} is not active: {:?}",
                self.txn_id, other
            ))),
        }
    }

    /// Transition to Validating state
    ///
    /// # State Transition
    /// `Active` → `Validating`
    pub fn mark_validating(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.status = TransactionStatus::Validating;
        Ok(())
    }

    /// Transition to Committed state
    ///
    /// # State Transition
    /// `Validating` → `Committed`
    pub fn mark_committed(&mut self) -> Result<()> {
        match &self.status {
            TransactionStatus::Validating => {
                self.status = TransactionStatus::Committed;
                Ok(())
            }
            _ => Err(Error::InvalidOperation(format!(
                "cannot commit transaction {} from state {:?}",
                self.txn_id, self.status
            ))),
        }
    }

    /// Abort the transaction, discarding buffered writes
    ///
    /// # State Transitions
    /// - `Active` → `Aborted`
    /// - `Validating` → `Aborted`
    pub fn mark_aborted(&mut self, cause: Error) -> Result<()> {
        match &self.status {
            TransactionStatus::Committed => Err(Error::InvalidOperation(format!(
                "cannot abort committed transaction {}",
                self.txn_id
            ))),
            TransactionStatus::Aborted { .. } => Err(Error::InvalidOperation(format!(
                "transaction {} already aborted",
                self.txn_id
            ))),
            _ => {
                self.status = TransactionStatus::Aborted { cause };
                // Aborted transactions write nothing; read_set is kept for diagnostics
                self.writes.clear();
                Ok(())
            }
        }
    }

    /// Abort because a statement failed and hand the error back
    ///
    /// The first failure wins: later calls on an already aborted
    /// transaction keep the original cause.
    pub fn fail(&mut self, error: Error) -> Error {
        if self.is_active() {
            let _ = self.mark_aborted(error.clone());
        }
        error
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("txn_id", &self.txn_id)
            .field("start_version", &self.start_version)
            .field("read_set", &self.read_set)
            .field("pending", &self.pending_operations())
            .field("status", &self.status)
            .finish()
    }
}
