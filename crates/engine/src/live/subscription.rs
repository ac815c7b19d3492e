//! Pull-style subscriber over a live view

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use linkdb_core::Result;

use super::subject::ListenerGuard;

/// A cancellable stream of snapshots
///
/// The first item is the view's current snapshot (if it has one); each
/// later item is a fresh snapshot. A recomputation error arrives as a final
/// `Err` item, after which the stream ends. Dropping the subscription
/// cancels it.
pub struct Subscription<T> {
    receiver: Receiver<Result<T>>,
    sender: Arc<Mutex<Option<Sender<Result<T>>>>>,
    guard: Mutex<Option<ListenerGuard>>,
    source: Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

impl<T: Send + 'static> Subscription<T> {
    /// Wire a subscription; `attach` registers the delivery callback
    pub(crate) fn new<F>(source: Box<dyn Any + Send + Sync>, attach: F) -> Self
    where
        F: FnOnce(Box<dyn Fn(&Result<T>) + Send + Sync>) -> ListenerGuard,
        T: Clone,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sender = Arc::new(Mutex::new(Some(tx)));
        let slot = Arc::clone(&sender);
        let guard = attach(Box::new(move |event: &Result<T>| {
            let mut slot = slot.lock();
            if let Some(tx) = slot.as_ref() {
                let _ = tx.send(event.clone());
                if event.is_err() {
                    // Terminal: close the stream after the error
                    *slot = None;
                }
            }
        }));
        Subscription {
            receiver: rx,
            sender,
            guard: Mutex::new(Some(guard)),
            source: Mutex::new(Some(source)),
        }
    }

    /// Stop delivery; nothing is delivered once this returns
    ///
    /// Also lets go of the view this subscription kept alive, so a query
    /// held only by the subscription stops re-running. Items already queued
    /// can still be drained with `try_recv`.
    pub fn cancel(&self) {
        self.sender.lock().take();
        let guard = self.guard.lock().take();
        if let Some(guard) = guard {
            guard.release();
        }
        // Dropped outside the lock; releasing the view can unregister queries
        let source = self.source.lock().take();
        drop(source);
    }

    /// True after `cancel` or a terminal error
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Block for the next snapshot; `None` once the stream is closed and drained
    pub fn recv(&self) -> Option<Result<T>> {
        self.receiver.recv().ok()
    }

    /// Like `recv` with a deadline; `None` on timeout or end of stream
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Next queued snapshot without blocking
    pub fn try_recv(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Drain the queue and keep only the newest item
    pub fn latest(&self) -> Option<Result<T>> {
        let mut last = None;
        while let Some(item) = self.try_recv() {
            last = Some(item);
        }
        last
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.sender.lock().take();
        if let Some(guard) = self.guard.lock().take() {
            guard.release();
        }
        let source = self.source.lock().take();
        drop(source);
    }
}

impl<T: Send + 'static> Iterator for Subscription<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        self.recv()
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("queued", &self.receiver.len())
            .field("closed", &self.sender.lock().is_none())
            .finish()
    }
}
