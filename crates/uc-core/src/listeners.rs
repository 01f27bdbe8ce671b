//! Multi-subscriber callback lists used by event-style delegate methods.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A subscriber callback.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by every `on_*` / `subscribe` method.
///
/// Dropping the handle keeps the subscription alive; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wrap an arbitrary unsubscribe action.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription that has nothing to undo.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Combine several subscriptions into one.
    pub fn all(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || {
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        })
    }

    /// Remove the callback.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

type Entries<T> = Vec<(u64, Callback<T>)>;

/// Ordered list of callbacks for one event.
pub struct Listeners<T> {
    entries: Arc<Mutex<Entries<T>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries<T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: 'static> Listeners<T> {
    /// Register a callback; it runs after all previously registered ones.
    pub fn add(&self, callback: Callback<T>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, callback));

        let entries = Arc::clone(&self.entries);
        Subscription::new(move || {
            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(entry_id, _)| *entry_id != id);
        })
    }

    /// Invoke every callback in registration order.
    ///
    /// Callbacks run on a snapshot, so a callback may add or remove
    /// subscriptions without deadlocking.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> =
            self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in snapshot {
            callback(value);
        }
    }
}
