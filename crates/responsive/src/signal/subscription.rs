//! Scoped release handles.

use std::fmt;

use parking_lot::Mutex;

type Release = Box<dyn FnOnce() + Send + 'static>;

/// Handle representing a live registration.
///
/// Dropping the handle (or calling [`Subscription::dispose`]) runs its
/// release action exactly once. An inert subscription holds nothing and
/// releases nothing.
///
/// # Example
///
/// ```rust,ignore
/// let producer = SignalProducer::from_subscription(|trigger| {
///     let id = bus.add_listener(move || trigger.fire());
///     Ok(Subscription::new(move || bus.remove_listener(id)))
/// });
/// ```
pub struct Subscription {
    release: Mutex<Option<Release>>,
}

impl Subscription {
    /// Create a subscription that runs `release` when disposed.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// A subscription that releases nothing.
    #[must_use]
    pub const fn inert() -> Self {
        Self {
            release: Mutex::new(None),
        }
    }

    /// Bundle several subscriptions so they are released together, in order.
    #[must_use]
    pub fn all(subscriptions: Vec<Self>) -> Self {
        if subscriptions.is_empty() {
            return Self::inert();
        }
        Self::new(move || drop(subscriptions))
    }

    /// Returns `true` until the release action has run.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.release.lock().is_some()
    }

    /// Release now. Later calls and the eventual drop do nothing.
    pub fn dispose(&self) {
        let release = self.release.lock().take();
        if let Some(release) = release {
            release();
        }
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::inert()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.get_mut().take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_release_runs_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sub.is_active());
        sub.dispose();
        sub.dispose();
        assert!(!sub.is_active());
        drop(sub);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        {
            let _sub = Subscription::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_all_releases_every_child() {
        let count = Arc::new(AtomicU32::new(0));
        let subs = (0..3)
            .map(|_| {
                let c = count.clone();
                Subscription::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        Subscription::all(subs).dispose();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!Subscription::all(Vec::new()).is_active());
    }
}
