//! Commit-time conflict detection
//!
//! Validation is table-granular: a transaction conflicts if any table it
//! read or wrote received a commit after the transaction's snapshot was
//! taken. First committer wins; the later transaction aborts.
//!
//! Read-only transactions always validate: their snapshot was consistent
//! when taken and they publish nothing.

use crate::transaction::TransactionContext;
use linkdb_storage::TableStore;

/// Types of conflicts detected during validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// Another transaction committed to `table` after our snapshot
    TableConflict {
        /// Table that changed underneath the transaction
        table: String,
        /// Table version in the transaction's snapshot
        snapshot_version: u64,
        /// Table version now
        current_version: u64,
    },
    /// A table the transaction touched was dropped
    TableDropped {
        /// Dropped table
        table: String,
    },
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictType::TableConflict {
                table,
                snapshot_version,
                current_version,
            } => write!(
                f,
                "table {} changed (snapshot v{}, now v{})",
                table, snapshot_version, current_version
            ),
            ConflictType::TableDropped { table } => write!(f, "table {} was dropped", table),
        }
    }
}

/// Result of validating a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Conflicts found, empty if valid
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// Create a successful validation result (no conflicts)
    pub fn ok() -> Self {
        Self::default()
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }
}

/// Check every table the transaction touched against the store
///
/// Must be called with the commit lock held so that no commit lands
/// between validation and apply.
pub fn validate_transaction(txn: &TransactionContext, store: &TableStore) -> ValidationResult {
    if txn.is_read_only() {
        return ValidationResult::ok();
    }

    let mut result = ValidationResult::ok();
    for table in txn.touched_tables() {
        let snapshot_version = txn.snapshot().table_version(&table);
        match (snapshot_version, store.table_version(&table)) {
            (Some(snapshot_version), Some(current_version)) if current_version > snapshot_version => {
                result.conflicts.push(ConflictType::TableConflict {
                    table,
                    snapshot_version,
                    current_version,
                });
            }
            (Some(_), None) => result.conflicts.push(ConflictType::TableDropped { table }),
            _ => {}
        }
    }
    result
}
