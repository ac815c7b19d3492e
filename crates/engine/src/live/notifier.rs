//! Change notifier
//!
//! Commits hand their `ChangeSet` to a dedicated worker thread, which
//! re-runs every registered live query that depends on a changed table.
//! Bursts of changes are coalesced: each affected query runs once per
//! batch, against the newest snapshot.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use linkdb_core::{Error, Result};
use linkdb_storage::ChangeSet;

use super::subject::ListenerGuard;

type Rerun = Arc<dyn Fn() -> Result<()> + Send + Sync>;

struct Registration {
    tables: Vec<String>,
    rerun: Rerun,
}

enum Message {
    Changed(ChangeSet),
    Flush(Sender<()>),
    Shutdown,
}

struct NotifierInner {
    registrations: DashMap<u64, Registration>,
    next_id: AtomicU64,
    coalesce_limit: usize,
}

/// Dispatches table changes to live queries on a worker thread
pub(crate) struct ChangeNotifier {
    inner: Arc<NotifierInner>,
    sender: Sender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl ChangeNotifier {
    /// Start the worker thread
    pub(crate) fn start(coalesce_limit: usize) -> Result<Self> {
        let inner = Arc::new(NotifierInner {
            registrations: DashMap::new(),
            next_id: AtomicU64::new(1),
            coalesce_limit: coalesce_limit.max(1),
        });
        let (sender, receiver) = crossbeam_channel::unbounded();
        let worker_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("linkdb-notify".to_string())
            .spawn(move || worker_loop(&worker_inner, &receiver))
            .map_err(|e| Error::Io(format!("failed to spawn notifier thread: {}", e)))?;
        let worker_id = handle.thread().id();
        Ok(ChangeNotifier {
            inner,
            sender,
            worker: Mutex::new(Some(handle)),
            worker_id,
        })
    }

    /// Register a re-run callback for changes to any of `tables`
    ///
    /// The registration lives until the guard is dropped or the callback
    /// returns an error.
    pub(crate) fn register(
        &self,
        tables: Vec<String>,
        rerun: impl Fn() -> Result<()> + Send + Sync + 'static,
    ) -> ListenerGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.registrations.insert(
            id,
            Registration {
                tables,
                rerun: Arc::new(rerun),
            },
        );
        let weak: Weak<NotifierInner> = Arc::downgrade(&self.inner);
        ListenerGuard::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.registrations.remove(&id);
            }
        })
    }

    /// Queue a committed change; never blocks on query execution
    pub(crate) fn notify(&self, changes: ChangeSet) {
        if self.sender.send(Message::Changed(changes)).is_err() {
            trace!("notifier stopped, change dropped");
        }
    }

    /// Block until every change queued so far has been dispatched
    ///
    /// No-op on the worker thread itself.
    pub(crate) fn flush(&self) {
        if std::thread::current().id() == self.worker_id {
            return;
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        if self.sender.send(Message::Flush(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Number of active registrations
    pub(crate) fn registration_count(&self) -> usize {
        self.inner.registrations.len()
    }

    /// Dispatch what is queued, then stop the worker
    pub(crate) fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        let _ = self.sender.send(Message::Shutdown);
        if handle.thread().id() != std::thread::current().id() {
            let _ = handle.join();
        }
        self.inner.registrations.clear();
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: &NotifierInner, receiver: &Receiver<Message>) {
    while let Ok(message) = receiver.recv() {
        let mut batch = match message {
            Message::Changed(changes) => vec![changes],
            Message::Flush(done) => {
                let _ = done.send(());
                continue;
            }
            Message::Shutdown => return,
        };

        // Coalesce whatever else is already queued
        let mut pending_control = None;
        while batch.len() < inner.coalesce_limit {
            match receiver.try_recv() {
                Ok(Message::Changed(changes)) => batch.push(changes),
                Ok(control) => {
                    pending_control = Some(control);
                    break;
                }
                Err(_) => break,
            }
        }

        dispatch(inner, &batch);

        match pending_control {
            Some(Message::Flush(done)) => {
                let _ = done.send(());
            }
            Some(Message::Shutdown) => return,
            _ => {}
        }
    }
}

fn dispatch(inner: &NotifierInner, batch: &[ChangeSet]) {
    let changed: BTreeSet<&str> = batch
        .iter()
        .flat_map(|c| c.tables.iter().map(String::as_str))
        .collect();
    let version = batch.iter().map(|c| c.version).max().unwrap_or(0);

    // Collect first so no map shard is locked while queries run
    let affected: Vec<(u64, Rerun)> = inner
        .registrations
        .iter()
        .filter(|r| r.tables.iter().any(|t| changed.contains(t.as_str())))
        .map(|r| (*r.key(), Arc::clone(&r.rerun)))
        .collect();

    debug!(
        version,
        changes = batch.len(),
        queries = affected.len(),
        "dispatching table changes"
    );

    for (id, rerun) in affected {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| rerun())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(id, error = %e, "live query failed, unregistering");
                inner.registrations.remove(&id);
            }
            Err(panic) => {
                error!(
                    id,
                    "live query re-run panicked: {}",
                    panic
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                        .unwrap_or("(non-string panic)")
                );
                inner.registrations.remove(&id);
            }
        }
    }
}
