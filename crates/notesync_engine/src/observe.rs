//! Observable value holder.
//!
//! Holds one current value and a list of subscribers. Every published value
//! reaches every live subscriber in publication order; a new subscriber
//! first receives the current value. Only the owning component publishes.

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Stream of values from an observable component.
pub type Subscription<T> = UnboundedReceiver<T>;

pub(crate) struct Observable<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    value: T,
    subscribers: Vec<UnboundedSender<T>>,
}

impl<T: Clone> Observable<T> {
    pub(crate) fn new(initial: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                value: initial,
                subscribers: Vec::new(),
            }),
        }
    }

    pub(crate) fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    pub(crate) fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if tx.send(inner.value.clone()).is_ok() {
            inner.subscribers.push(tx);
        }
        rx
    }

    pub(crate) fn set(&self, value: T) {
        let mut inner = self.inner.lock();
        inner.publish(value);
    }

    /// Replaces the value with `f(current)` unless `f` returns `None`.
    /// Returns whether a value was published.
    pub(crate) fn try_update(&self, f: impl FnOnce(&T) -> Option<T>) -> bool {
        let mut inner = self.inner.lock();
        match f(&inner.value) {
            Some(next) => {
                inner.publish(next);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl<T: Clone + PartialEq> Observable<T> {
    /// Publishes `value` only if it differs from the current one.
    pub(crate) fn set_if_changed(&self, value: T) -> bool {
        self.try_update(|current| (*current != value).then(|| value.clone()))
    }
}

impl<T: Clone> Inner<T> {
    fn publish(&mut self, value: T) {
        self.value = value;
        let value = &self.value;
        self.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
    }
}
