//! Live views and combinators
//!
//! A `LiveView` is a handle on a stream of snapshots. Derived views keep
//! their upstream views and listener registrations alive; dropping the last
//! handle of a derived view releases everything it registered.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use linkdb_core::Result;

use super::subject::{ListenerGuard, Subject};
use super::subscription::Subscription;

type KeepAlive = Box<dyn Any + Send + Sync>;

struct ViewInner<T> {
    subject: Arc<Subject<T>>,
    _keep_alive: Vec<KeepAlive>,
}

/// A query (or value derived from queries) that re-emits as data changes
pub struct LiveView<T> {
    inner: Arc<ViewInner<T>>,
}

impl<T> Clone for LiveView<T> {
    fn clone(&self) -> Self {
        LiveView {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for LiveView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveView")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> LiveView<T> {
    pub(crate) fn new(subject: Arc<Subject<T>>, keep_alive: Vec<KeepAlive>) -> Self {
        LiveView {
            inner: Arc::new(ViewInner {
                subject,
                _keep_alive: keep_alive,
            }),
        }
    }

    /// A view that holds one value forever
    pub fn constant(value: T) -> Self {
        let subject = Arc::new(Subject::new());
        subject.emit(value);
        LiveView::new(subject, Vec::new())
    }

    /// Latest snapshot, or the terminal error
    pub fn current(&self) -> Option<Result<T>> {
        self.inner.subject.latest()
    }

    /// True once the view has failed; it will not emit again
    pub fn is_terminated(&self) -> bool {
        self.inner.subject.is_terminated()
    }

    /// Number of listeners attached (subscriptions and derived views)
    pub fn listener_count(&self) -> usize {
        self.inner.subject.listener_count()
    }

    pub(crate) fn listen(&self, listener: impl Fn(&Result<T>) + Send + Sync + 'static) -> ListenerGuard {
        self.inner.subject.listen(listener)
    }

    /// Subscribe to snapshots, starting with the current one
    pub fn subscribe(&self) -> Subscription<T> {
        let subject = Arc::clone(&self.inner.subject);
        Subscription::new(Box::new(self.clone()), move |deliver| {
            subject.listen(move |event| deliver(event))
        })
    }

    /// Derive a view by transforming each snapshot
    pub fn map<U, F>(&self, f: F) -> LiveView<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.try_map(move |v| Ok(f(v)))
    }

    /// Derive a view with a fallible transform; an error terminates it
    pub fn try_map<U, F>(&self, f: F) -> LiveView<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> Result<U> + Send + Sync + 'static,
    {
        let out = Arc::new(Subject::new());
        let sink = Arc::clone(&out);
        let guard = self.listen(move |event| match event {
            Ok(value) => match f(value) {
                Ok(mapped) => sink.emit(mapped),
                Err(e) => sink.fail(e),
            },
            Err(e) => sink.fail(e.clone()),
        });
        LiveView::new(out, vec![Box::new(self.clone()), Box::new(guard)])
    }
}

/// Emit `f` over the latest value of every view, once all have one
///
/// Re-emits whenever any input emits. An input error terminates the
/// combined view. With no inputs, `f(&[])` is emitted once.
pub fn combine_latest<T, U, F>(views: &[LiveView<T>], f: F) -> LiveView<U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: Fn(&[T]) -> U + Send + Sync + 'static,
{
    let out = Arc::new(Subject::new());
    if views.is_empty() {
        out.emit(f(&[]));
        return LiveView::new(out, Vec::new());
    }

    let slots: Arc<Mutex<Vec<Option<T>>>> = Arc::new(Mutex::new(vec![None; views.len()]));
    let f = Arc::new(f);
    let mut keep_alive: Vec<KeepAlive> = Vec::with_capacity(views.len() * 2);
    for (i, view) in views.iter().enumerate() {
        let slots = Arc::clone(&slots);
        let sink = Arc::clone(&out);
        let f = Arc::clone(&f);
        let guard = view.listen(move |event| match event {
            Ok(value) => {
                let mut slots = slots.lock();
                slots[i] = Some(value.clone());
                if slots.iter().all(Option::is_some) {
                    let values: Vec<T> = slots.iter().flatten().cloned().collect();
                    sink.emit(f(&values));
                }
            }
            Err(e) => sink.fail(e.clone()),
        });
        keep_alive.push(Box::new(view.clone()));
        keep_alive.push(Box::new(guard));
    }
    LiveView::new(out, keep_alive)
}

/// Two-input `combine_latest` over differently typed views
pub fn combine_latest2<A, B, U, F>(a: &LiveView<A>, b: &LiveView<B>, f: F) -> LiveView<U>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: Fn(&A, &B) -> U + Send + Sync + 'static,
{
    let out = Arc::new(Subject::new());
    let slots: Arc<Mutex<(Option<A>, Option<B>)>> = Arc::new(Mutex::new((None, None)));
    let f = Arc::new(f);

    let emit = {
        let sink = Arc::clone(&out);
        let f = Arc::clone(&f);
        move |slots: &(Option<A>, Option<B>)| {
            if let (Some(a), Some(b)) = slots {
                sink.emit(f(a, b));
            }
        }
    };
    let emit = Arc::new(emit);

    let guard_a = {
        let slots = Arc::clone(&slots);
        let sink = Arc::clone(&out);
        let emit = Arc::clone(&emit);
        a.listen(move |event| match event {
            Ok(value) => {
                let mut slots = slots.lock();
                slots.0 = Some(value.clone());
                emit(&*slots);
            }
            Err(e) => sink.fail(e.clone()),
        })
    };
    let guard_b = {
        let slots = Arc::clone(&slots);
        let sink = Arc::clone(&out);
        b.listen(move |event| match event {
            Ok(value) => {
                let mut slots = slots.lock();
                slots.1 = Some(value.clone());
                emit(&*slots);
            }
            Err(e) => sink.fail(e.clone()),
        })
    };

    LiveView::new(
        out,
        vec![
            Box::new(a.clone()),
            Box::new(b.clone()),
            Box::new(guard_a),
            Box::new(guard_b),
        ],
    )
}

struct InnerSlot<I> {
    latest: Option<I>,
    _view: Option<LiveView<I>>,
    _guard: Option<ListenerGuard>,
}

struct SwitchState<K, I> {
    generation: u64,
    order: Vec<K>,
    arena: BTreeMap<K, InnerSlot<I>>,
}

impl<K: Ord + Clone, I: Clone> SwitchState<K, I> {
    /// Inner values in key order, once every inner view has emitted
    fn complete(&self) -> Option<Vec<(K, I)>> {
        self.order
            .iter()
            .map(|k| {
                let latest = self.arena.get(k)?.latest.clone()?;
                Some((k.clone(), latest))
            })
            .collect()
    }
}

/// Keyed switch-to-latest
///
/// For every outer snapshot, `keys` picks the parents and `inner` opens
/// one view per parent. All inner views opened for the previous outer
/// snapshot are disposed first. Once every inner view of the current
/// generation has a value, `combine` receives them in key order; later
/// inner emissions re-run `combine`. Emissions from disposed inner views
/// are dropped.
pub fn switch_keyed<T, K, I, U, KF, IF, CF>(
    outer: &LiveView<T>,
    keys: KF,
    inner: IF,
    combine: CF,
) -> LiveView<U>
where
    T: Clone + Send + Sync + 'static,
    K: Ord + Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    KF: Fn(&T) -> Vec<K> + Send + Sync + 'static,
    IF: Fn(&K) -> Result<LiveView<I>> + Send + Sync + 'static,
    CF: Fn(&[(K, I)]) -> U + Send + Sync + 'static,
{
    let out: Arc<Subject<U>> = Arc::new(Subject::new());
    let state: Arc<Mutex<SwitchState<K, I>>> = Arc::new(Mutex::new(SwitchState {
        generation: 0,
        order: Vec::new(),
        arena: BTreeMap::new(),
    }));
    let combine = Arc::new(combine);

    let weak_state: Weak<Mutex<SwitchState<K, I>>> = Arc::downgrade(&state);
    let sink = Arc::clone(&out);
    let guard = outer.listen(move |event| {
        let snapshot = match event {
            Ok(snapshot) => snapshot,
            Err(e) => {
                sink.fail(e.clone());
                return;
            }
        };
        let Some(state) = weak_state.upgrade() else {
            return;
        };

        let mut seen = BTreeSet::new();
        let order: Vec<K> = keys(snapshot)
            .into_iter()
            .filter(|k| seen.insert(k.clone()))
            .collect();

        let (generation, previous) = {
            let mut st = state.lock();
            st.generation += 1;
            st.order = order.clone();
            let fresh = order
                .iter()
                .map(|k| {
                    let slot = InnerSlot {
                        latest: None,
                        _view: None,
                        _guard: None,
                    };
                    (k.clone(), slot)
                })
                .collect();
            let previous = std::mem::replace(&mut st.arena, fresh);
            if order.is_empty() {
                sink.emit(combine(&[]));
            }
            (st.generation, previous)
        };
        // Dispose the previous generation outside the lock
        drop(previous);

        for key in order {
            let view = match inner(&key) {
                Ok(view) => view,
                Err(e) => {
                    sink.fail(e);
                    return;
                }
            };
            let listener = inner_listener(
                Arc::downgrade(&state),
                generation,
                key.clone(),
                Arc::clone(&sink),
                Arc::clone(&combine),
            );
            let guard = view.listen(listener);

            let mut st = state.lock();
            if st.generation != generation {
                // Superseded while opening; release after unlocking
                drop(st);
                drop(guard);
                return;
            }
            if let Some(slot) = st.arena.get_mut(&key) {
                slot._view = Some(view);
                slot._guard = Some(guard);
            }
        }
    });

    LiveView::new(
        out,
        vec![Box::new(outer.clone()), Box::new(guard), Box::new(state)],
    )
}

fn inner_listener<K, I, U, CF>(
    state: Weak<Mutex<SwitchState<K, I>>>,
    generation: u64,
    key: K,
    sink: Arc<Subject<U>>,
    combine: Arc<CF>,
) -> impl Fn(&Result<I>) + Send + Sync + 'static
where
    K: Ord + Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    CF: Fn(&[(K, I)]) -> U + Send + Sync + 'static,
{
    move |event| {
        let Some(state) = state.upgrade() else {
            return;
        };
        let mut st = state.lock();
        if st.generation != generation {
            return;
        }
        match event {
            Ok(value) => {
                let Some(slot) = st.arena.get_mut(&key) else {
                    return;
                };
                slot.latest = Some(value.clone());
                if let Some(values) = st.complete() {
                    sink.emit(combine(&values));
                }
            }
            Err(e) => sink.fail(e.clone()),
        }
    }
}
