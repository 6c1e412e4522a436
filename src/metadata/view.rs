use super::semilattice::Semilattice;

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// Invoked after a `join` changes the visible value. Callbacks take no argument;
/// they call `get()` and, because values only grow, observe a non-decreasing
/// sequence.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Read-write access to a replicated value.
pub trait MetadataView<T>: Send + Sync {
    /// The current merged value. Never blocks on other joiners for long.
    fn get(&self) -> T;

    /// Merges `delta` into the value and notifies subscribers if it changed.
    fn join(&self, delta: &T);

    /// Registers `callback`; dropping the returned guard unsubscribes.
    fn subscribe(&self, callback: ChangeCallback) -> Subscription;
}

pub type SharedView<T> = Arc<dyn MetadataView<T>>;

/// Keeps a subscription alive. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

struct Shared<T> {
    value: watch::Sender<T>,
    subscribers: DashMap<u64, ChangeCallback>,
    next_subscription: AtomicU64,
}

/// Sole owner of a replicated value.
pub struct MetadataController<T> {
    shared: Arc<Shared<T>>,
}

impl<T> MetadataController<T>
where
    T: Semilattice + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (value, _) = watch::channel(initial);
        Self {
            shared: Arc::new(Shared {
                value,
                subscribers: DashMap::new(),
                next_subscription: AtomicU64::new(0),
            }),
        }
    }

    pub fn handle(&self) -> MetadataHandle<T> {
        MetadataHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn view(&self) -> SharedView<T> {
        Arc::new(self.handle())
    }
}

/// Cheap, cloneable handle onto a controller's value.
pub struct MetadataHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for MetadataHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> MetadataHandle<T>
where
    T: Semilattice + Send + Sync + 'static,
{
    /// A receiver that wakes whenever a join changes the value.
    pub fn changes(&self) -> watch::Receiver<T> {
        self.shared.value.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.len()
    }

    fn notify(&self) {
        // Snapshot first so callbacks may subscribe or unsubscribe freely
        let callbacks: Vec<ChangeCallback> = self
            .shared
            .subscribers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for callback in callbacks {
            callback();
        }
    }
}

impl<T> MetadataView<T> for MetadataHandle<T>
where
    T: Semilattice + Send + Sync + 'static,
{
    fn get(&self) -> T {
        self.shared.value.borrow().clone()
    }

    fn join(&self, delta: &T) {
        let changed = self.shared.value.send_if_modified(|current| {
            let joined = current.clone().joined(delta);
            if joined == *current {
                return false;
            }
            *current = joined;
            true
        });

        if changed {
            self.notify();
        }
    }

    fn subscribe(&self, callback: ChangeCallback) -> Subscription {
        let id = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.insert(id, callback);

        let shared: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.subscribers.remove(&id);
            }
        })
    }
}
