//! Live queries
//!
//! `Database::live_query` wraps a SELECT as a [`LiveView`]: the first
//! snapshot is computed on creation, and every commit that touches one of
//! the statement's tables re-runs it on the notifier thread. Views compose
//! with [`LiveView::map`], [`combine_latest`] and [`switch_keyed`], and are
//! consumed through a cancellable [`Subscription`].

mod notifier;
mod subject;
mod subscription;
mod view;

pub(crate) use notifier::ChangeNotifier;
pub(crate) use subject::Subject;

pub use subject::ListenerGuard;
pub use subscription::Subscription;
pub use view::{combine_latest, combine_latest2, switch_keyed, LiveView};
