//! TransactionCoordinator: begin/commit/abort plus outcome counters
//!
//! Sits between `Database` and the table-granular `TransactionManager`.
//! Every transaction that starts here ends in exactly one of `commit` or
//! `abort`, and each end is counted once.

use std::sync::atomic::{AtomicU64, Ordering};

use linkdb_concurrency::{TransactionContext, TransactionManager};
use linkdb_core::Result;
use linkdb_storage::{ChangeSet, TableStore};
use tracing::{debug, warn};

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
}

enum Outcome {
    Committed,
    Aborted,
}

/// Starts and finishes transactions against one store
///
/// Counters are Relaxed: they are read for reporting and order nothing.
pub struct TransactionCoordinator {
    manager: TransactionManager,
    counters: Counters,
}

impl TransactionCoordinator {
    /// Coordinator whose first commit gets `initial_version + 1`
    pub fn new(initial_version: u64) -> Self {
        Self {
            manager: TransactionManager::new(initial_version),
            counters: Counters::default(),
        }
    }

    /// Start a new transaction over a snapshot of `store`
    pub fn start_transaction(&self, store: &TableStore) -> TransactionContext {
        let txn = self.manager.begin(store);
        self.counters.started.fetch_add(1, Ordering::Relaxed);
        debug!(target: "linkdb::txn", txn_id = txn.txn_id, "Transaction started");
        txn
    }

    /// Commit through the concurrency layer and record the outcome
    ///
    /// # Returns
    /// * `Ok(Some(changes))` - writes published
    /// * `Ok(None)` - read-only transaction
    /// * `Err(_)` - conflict, or the error that already aborted the transaction
    pub fn commit(&self, txn: &mut TransactionContext, store: &TableStore) -> Result<Option<ChangeSet>> {
        match self.manager.commit(txn, store) {
            Ok(changes) => {
                self.finish(txn, Outcome::Committed);
                debug!(
                    target: "linkdb::txn",
                    txn_id = txn.txn_id,
                    version = changes.as_ref().map(|c| c.version),
                    "Transaction committed"
                );
                Ok(changes)
            }
            Err(e) => {
                self.finish(txn, Outcome::Aborted);
                warn!(target: "linkdb::txn", txn_id = txn.txn_id, error = %e, "Transaction aborted");
                Err(e)
            }
        }
    }

    /// Abort explicitly, discarding buffered writes
    pub fn abort(&self, txn: &mut TransactionContext, reason: &str) -> Result<()> {
        if !txn.is_aborted() {
            self.manager.abort(txn, reason)?;
            debug!(target: "linkdb::txn", txn_id = txn.txn_id, reason, "Transaction rolled back");
        }
        // A transaction poisoned by a failed statement is counted here; one
        // already counted by `commit` or an earlier abort is not
        self.finish(txn, Outcome::Aborted);
        Ok(())
    }

    fn finish(&self, txn: &mut TransactionContext, outcome: Outcome) {
        if !txn.settle() {
            return;
        }
        let counter = match outcome {
            Outcome::Committed => &self.counters.committed,
            Outcome::Aborted => &self.counters.aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Version of the newest commit
    pub fn current_version(&self) -> u64 {
        self.manager.current_version()
    }

    /// Point-in-time copy of the counters
    pub fn metrics(&self) -> TransactionMetrics {
        let started = self.counters.started.load(Ordering::Relaxed);
        let committed = self.counters.committed.load(Ordering::Relaxed);
        let aborted = self.counters.aborted.load(Ordering::Relaxed);
        TransactionMetrics {
            active_count: started.saturating_sub(committed + aborted),
            total_started: started,
            total_committed: committed,
            total_aborted: aborted,
        }
    }

    /// Transactions started but not yet committed or aborted
    pub fn active_count(&self) -> u64 {
        self.metrics().active_count
    }
}

/// Counters reported by [`TransactionCoordinator::metrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionMetrics {
    /// In flight
    pub active_count: u64,
    /// Ever started
    pub total_started: u64,
    /// Ended in a commit (including read-only ones)
    pub total_committed: u64,
    /// Ended in a conflict, a failed statement or an explicit abort
    pub total_aborted: u64,
}

impl TransactionMetrics {
    /// Committed plus aborted
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_aborted
    }

    /// Share of completed transactions that aborted; 0 before any complete
    pub fn abort_rate(&self) -> f64 {
        match self.total_completed() {
            0 => 0.0,
            done => self.total_aborted as f64 / done as f64,
        }
    }
}
