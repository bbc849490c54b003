//! Concurrent LIFO used for the free-fiber pool and group awaiter queues.

use parking_lot::Mutex;

pub(crate) struct LifoQueue<T> {
    items: Mutex<Vec<T>>,
}

impl<T> LifoQueue<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        LifoQueue {
            items: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub(crate) fn push(&self, value: T) {
        self.items.lock().push(value);
    }

    pub(crate) fn try_pop(&self) -> Option<T> {
        self.items.lock().pop()
    }

    /// Takes every queued item in one step. Concurrent pushers either land
    /// before the drain (and are taken) or after (and wait for the next one).
    pub(crate) fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }
}
