//! One-shot latch backing every firing signal.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::Subscription;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const RETIRED: u8 = 2;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A write-once "changed" flag with a callback table.
///
/// Callbacks always run outside the table lock, so a callback may register
/// on, fire, or retire any latch (including this one).
pub(crate) struct Latch {
    state: AtomicU8,
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback)>>,
    /// Resources owned by this latch, released when it fires or retires.
    attachments: Mutex<Vec<Subscription>>,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(ARMED),
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(Vec::new()),
            attachments: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fired() -> Self {
        let latch = Self::new();
        latch.state.store(FIRED, Ordering::Release);
        latch
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }

    /// Fire the latch. Returns `false` if it already fired or was retired.
    pub(crate) fn fire(&self) -> bool {
        if self
            .state
            .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let callbacks = mem::take(&mut *self.callbacks.lock());
        let attachments = mem::take(&mut *self.attachments.lock());
        drop(attachments);

        for (_, callback) in callbacks {
            callback();
        }
        true
    }

    /// Retire an unfired latch: it will never fire and its callbacks are dropped.
    pub(crate) fn retire(&self) {
        if self
            .state
            .compare_exchange(ARMED, RETIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let callbacks = mem::take(&mut *self.callbacks.lock());
        let attachments = mem::take(&mut *self.attachments.lock());
        drop(callbacks);
        drop(attachments);
    }

    /// Register `callback`.
    ///
    /// A fired latch runs the callback immediately and returns an inert
    /// subscription; a retired latch drops it.
    pub(crate) fn register(self: &Arc<Self>, callback: Callback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rejected = {
            let mut callbacks = self.callbacks.lock();
            if self.is_armed() {
                callbacks.push((id, callback));
                None
            } else {
                Some(callback)
            }
        };

        if let Some(callback) = rejected {
            if self.has_fired() {
                callback();
            }
            return Subscription::inert();
        }

        let latch = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(latch) = latch.upgrade() {
                latch.unregister(id);
            }
        })
    }

    /// Tie `subscription` to this latch's lifetime.
    pub(crate) fn attach(&self, subscription: Subscription) {
        let rejected = {
            let mut attachments = self.attachments.lock();
            if self.is_armed() {
                attachments.push(subscription);
                None
            } else {
                Some(subscription)
            }
        };
        drop(rejected);
    }

    fn unregister(&self, id: u64) {
        let removed = {
            let mut callbacks = self.callbacks.lock();
            callbacks
                .iter()
                .position(|(i, _)| *i == id)
                .map(|index| callbacks.swap_remove(index))
        };
        drop(removed);
    }

    #[cfg(test)]
    pub(crate) fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }
}
