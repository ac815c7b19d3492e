//! Latest-value subject
//!
//! A `Subject` remembers its latest emission and replays it to every new
//! listener, then forwards each later emission. A failure is terminal: it is
//! delivered once, replayed to late listeners, and nothing follows it.
//!
//! Listeners run outside the state lock but under a per-subject delivery
//! lock, so a listener sees emissions in order and never misses one between
//! replay and registration.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};

use linkdb_core::{Error, Result};

type Listener<T> = Arc<dyn Fn(&Result<T>) + Send + Sync>;

struct SubjectState<T> {
    latest: Option<Result<T>>,
    listeners: BTreeMap<u64, Listener<T>>,
    next_id: u64,
}

pub(crate) struct Subject<T> {
    state: Mutex<SubjectState<T>>,
    delivery: ReentrantMutex<()>,
}

impl<T: Clone + Send + Sync + 'static> Subject<T> {
    pub(crate) fn new() -> Self {
        Subject {
            state: Mutex::new(SubjectState {
                latest: None,
                listeners: BTreeMap::new(),
                next_id: 0,
            }),
            delivery: ReentrantMutex::new(()),
        }
    }

    /// Latest emission, if any
    pub(crate) fn latest(&self) -> Option<Result<T>> {
        self.state.lock().latest.clone()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        matches!(self.state.lock().latest, Some(Err(_)))
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Publish a new value; ignored once terminated
    pub(crate) fn emit(&self, value: T) {
        self.publish(Ok(value));
    }

    /// Terminate with an error; ignored once terminated
    pub(crate) fn fail(&self, error: Error) {
        self.publish(Err(error));
    }

    fn publish(&self, event: Result<T>) {
        let _delivery = self.delivery.lock();
        let listeners: Vec<Listener<T>> = {
            let mut state = self.state.lock();
            if matches!(state.latest, Some(Err(_))) {
                return;
            }
            state.latest = Some(event.clone());
            let listeners = state.listeners.values().cloned().collect();
            if event.is_err() {
                state.listeners.clear();
            }
            listeners
        };
        for listener in listeners {
            listener(&event);
        }
    }

    /// Register a listener; it is called at once with the latest emission
    pub(crate) fn listen(self: &Arc<Self>, listener: impl Fn(&Result<T>) + Send + Sync + 'static) -> ListenerGuard {
        let listener: Listener<T> = Arc::new(listener);
        let _delivery = self.delivery.lock();
        let (id, replay) = {
            let mut state = self.state.lock();
            let replay = state.latest.clone();
            let id = state.next_id;
            state.next_id += 1;
            // A terminated subject replays its error and keeps no listener
            if !matches!(replay, Some(Err(_))) {
                state.listeners.insert(id, Arc::clone(&listener));
            }
            (id, replay)
        };
        if let Some(event) = replay {
            listener(&event);
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        ListenerGuard::new(move || {
            if let Some(subject) = weak.upgrade() {
                subject.state.lock().listeners.remove(&id);
            }
        })
    }
}

/// Releases a registration when dropped
#[must_use = "dropping the guard releases the registration"]
pub struct ListenerGuard {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerGuard {
    pub(crate) fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        ListenerGuard {
            release: Some(Box::new(release)),
        }
    }

    /// Release now instead of on drop
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("active", &self.release.is_some())
            .finish()
    }
}
