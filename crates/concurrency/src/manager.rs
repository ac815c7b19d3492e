//! Transaction manager for coordinating commit operations
//!
//! Provides atomic commit by orchestrating:
//! 1. Validation (first-committer-wins, per table)
//! 2. Version allocation
//! 3. Storage application (visibility)
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. mark_validating()       - Active → Validating
//! 2. read-only? mark_committed() and return, nothing to publish
//! 3. take commit lock
//! 4. validate_transaction()  - compare touched table versions
//! 5. IF conflicts: mark_aborted() and return TransactionAborted
//! 6. allocate commit version
//! 7. apply_batch()           - all writes become visible at once
//! 8. mark_committed()        - Validating → Committed
//! ```
//!
//! The commit lock serializes steps 4 through 7, so validation always sees
//! every commit that precedes it.

use crate::transaction::TransactionContext;
use crate::validation::validate_transaction;
use linkdb_core::{Error, Result};
use linkdb_storage::{ChangeSet, TableStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Manages transaction lifecycle and atomic commits
pub struct TransactionManager {
    /// Global version counter
    ///
    /// Monotonically increasing. Each committing write transaction increments by 1.
    version: AtomicU64,

    /// Next transaction ID
    next_txn_id: AtomicU64,

    /// Serializes validate + apply
    commit_lock: Mutex<()>,
}

impl TransactionManager {
    /// Create a new transaction manager
    ///
    /// # Arguments
    /// * `initial_version` - Starting version (the store's current version)
    pub fn new(initial_version: u64) -> Self {
        TransactionManager {
            version: AtomicU64::new(initial_version),
            next_txn_id: AtomicU64::new(1),
            commit_lock: Mutex::new(()),
        }
    }

    /// Get current global version
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Allocate next transaction ID
    pub fn next_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    fn allocate_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Start a transaction over a fresh snapshot of `store`
    pub fn begin(&self, store: &TableStore) -> TransactionContext {
        let txn = TransactionContext::new(self.next_txn_id(), store.snapshot());
        trace!(txn_id = txn.txn_id, start_version = txn.start_version, "begin");
        txn
    }

    /// Commit a transaction atomically
    ///
    /// # Returns
    /// - `Ok(Some(changes))` when writes were published
    /// - `Ok(None)` for a read-only transaction
    /// - `Err(cause)` if the transaction was already aborted by a failed statement
    /// - `Err(TransactionAborted)` if validation found a conflict
    pub fn commit(&self, txn: &mut TransactionContext, store: &TableStore) -> Result<Option<ChangeSet>> {
        txn.mark_validating()?;

        if txn.is_read_only() {
            txn.mark_committed()?;
            return Ok(None);
        }

        let _guard = self.commit_lock.lock();

        let validation = validate_transaction(txn, store);
        if !validation.is_valid() {
            let reason = validation
                .conflicts
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            debug!(txn_id = txn.txn_id, %reason, "commit conflict");
            let err = Error::aborted(reason);
            txn.mark_aborted(err.clone())?;
            return Err(err);
        }

        let version = self.allocate_version();
        let changes = match store.apply_batch(txn.writes(), version) {
            Ok(changes) => changes,
            Err(e) => {
                txn.mark_aborted(e.clone())?;
                return Err(e);
            }
        };
        txn.mark_committed()?;
        debug!(txn_id = txn.txn_id, version, tables = ?changes.tables, "committed");
        Ok(Some(changes))
    }

    /// Explicitly abort a transaction
    ///
    /// All buffered operations are discarded.
    pub fn abort(&self, txn: &mut TransactionContext, reason: impl Into<String>) -> Result<()> {
        txn.mark_aborted(Error::aborted(reason))
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("version", &self.current_version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkdb_core::{RowKey, Value};

    fn setup() -> (TransactionManager, TableStore) {
        let store = TableStore::new();
        store.create_table("carts").unwrap();
        (TransactionManager::new(store.current_version()), store)
    }

    #[test]
    fn test_commit_publishes_writes() {
        let (manager, store) = setup();
        let mut txn = manager.begin(&store);
        txn.put("carts", RowKey::from("c1"), vec![Value::from("c1")]).unwrap();

        let changes = manager.commit(&mut txn, &store).unwrap().unwrap();
        assert_eq!(changes.version, 1);
        assert!(txn.is_committed());
        assert!(store.snapshot().get("carts", &RowKey::from("c1")).is_some());
    }

    #[test]
    fn test_read_only_commit_has_no_changes() {
        let (manager, store) = setup();
        let mut txn = manager.begin(&store);
        txn.scan("carts").unwrap();
        assert!(manager.commit(&mut txn, &store).unwrap().is_none());
        assert_eq!(manager.current_version(), 0);
    }

    #[test]
    fn test_first_committer_wins() {
        let (manager, store) = setup();
        let mut t1 = manager.begin(&store);
        let mut t2 = manager.begin(&store);

        t1.scan("carts").unwrap();
        t1.put("carts", RowKey::from("c1"), vec![]).unwrap();
        t2.scan("carts").unwrap();
        t2.put("carts", RowKey::from("c2"), vec![]).unwrap();

        manager.commit(&mut t1, &store).unwrap();
        let err = manager.commit(&mut t2, &store).unwrap_err();
        assert!(err.is_conflict());
        assert!(t2.is_aborted());
        assert!(store.snapshot().get("carts", &RowKey::from("c2")).is_none());
    }

    #[test]
    fn test_commit_of_failed_transaction_returns_cause() {
        let (manager, store) = setup();
        let mut txn = manager.begin(&store);
        txn.put("carts", RowKey::from("c1"), vec![]).unwrap();
        let cause = txn.fail(Error::schema("no table named cart"));

        assert_eq!(manager.commit(&mut txn, &store).unwrap_err(), cause);
        assert!(store.snapshot().get("carts", &RowKey::from("c1")).is_none());
    }

    #[test]
    fn test_write_to_missing_table_aborts() {
        let (manager, store) = setup();
        let mut txn = manager.begin(&store);
        txn.put("nope", RowKey::from("x"), vec![]).unwrap();
        assert!(manager.commit(&mut txn, &store).is_err());
        assert!(txn.is_aborted());
    }

    #[test]
    fn test_abort_discards() {
        let (manager, store) = setup();
        let mut txn = manager.begin(&store);
        txn.put("carts", RowKey::from("c1"), vec![]).unwrap();
        manager.abort(&mut txn, "caller").unwrap();
        assert!(txn.is_read_only());
        assert!(manager.commit(&mut txn, &store).is_err());
    }
}
