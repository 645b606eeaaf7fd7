//! Multicast event channels.
//!
//! A [`Subject`] delivers every published value to every current observer,
//! synchronously and in subscription order. Nothing is replayed to late
//! subscribers. Dropping a [`Subscription`] detaches its observer; closing
//! the subject detaches all of them.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Observer callback.
pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    next_id: u64,
    observers: Vec<(u64, Observer<T>)>,
    closed: bool,
}

/// Hot multicast channel.
pub struct Subject<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

fn lock<T>(inner: &Mutex<Inner<T>>) -> MutexGuard<'_, Inner<T>> {
    // Observers run outside the lock, so a poisoned lock still holds
    // consistent state.
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T: Send + 'static> Subject<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                observers: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Attach `observer`. On a closed subject the observer is dropped
    /// immediately and the returned subscription is inert.
    pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Subscription::inert();
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.observers.push((id, Arc::new(observer)));

        let weak: Weak<Mutex<Inner<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner).observers.retain(|(oid, _)| *oid != id);
                }
            })),
        }
    }

    /// Deliver `value` to every observer.
    pub fn publish(&self, value: &T) {
        let observers: Vec<Observer<T>> = {
            let inner = lock(&self.inner);
            inner.observers.iter().map(|(_, o)| o.clone()).collect()
        };
        for observer in observers {
            observer(value);
        }
    }

    /// Detach every observer and refuse new ones.
    pub fn close(&self) {
        let mut inner = lock(&self.inner);
        inner.closed = true;
        inner.observers.clear();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.inner).observers.len()
    }
}

impl<T: Send + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Subject")
            .field("observers", &inner.observers.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

/// Observer registration; dropping it detaches the observer.
#[must_use = "dropping a Subscription detaches the observer"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn inert() -> Self {
        Self { detach: None }
    }

    /// Detach now.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.is_some())
            .finish()
    }
}
