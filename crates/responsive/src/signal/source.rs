//! Signal producers.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::latch::Latch;
use super::{Signal, Subscription};
use crate::error::{BoxError, Error, Result};

/// A source of fresh [`Signal`]s.
///
/// Implement this to plug a custom change detector into the crate. Most
/// hosts use the constructors on [`SignalProducer`] instead.
pub trait SignalSource: Send + Sync + 'static {
    /// Hand out the signal for the current condition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SubscriptionFailed`] if the source could not register
    /// with its external event source.
    fn signal(&self) -> Result<Signal>;

    /// Release any external subscription this source holds.
    fn close(&self) {}
}

/// Cheaply cloneable handle to a [`SignalSource`].
///
/// All clones share the same source and the same subscription lifetime.
#[derive(Clone)]
pub struct SignalProducer {
    source: Arc<dyn SignalSource>,
}

impl SignalProducer {
    /// Wrap a custom source.
    pub fn new<S: SignalSource>(source: S) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// A producer whose signals never fire.
    #[must_use]
    pub fn never() -> Self {
        Self::new(NeverSource)
    }

    /// A manually triggered producer.
    ///
    /// [`Trigger::fire`] fires the currently active signal and atomically
    /// arms a fresh one, so every signal obtained afterwards is unchanged.
    #[must_use]
    pub fn manual() -> (Self, Trigger) {
        let trigger = Trigger::new();
        let producer = Self::new(ManualSource {
            trigger: trigger.clone(),
        });
        (producer, trigger)
    }

    /// Adapt a function that returns signals.
    ///
    /// A `None` from `f` is replaced by a signal that never fires.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Option<Signal> + Send + Sync + 'static,
    {
        Self::new(FnSource { f })
    }

    /// A producer backed by one long-lived external subscription.
    ///
    /// `subscribe` runs once, when the first signal is requested. It receives
    /// a [`Trigger`] to call whenever the external source reports a change, and
    /// returns the [`Subscription`] that unregisters it. The subscription lives
    /// until [`SignalProducer::close`] or until every clone is dropped.
    ///
    /// Requests made while the first registration is in progress wait for it.
    /// A failed registration is fatal: every later request returns the same
    /// [`Error::SubscriptionFailed`], and a closed producer returns
    /// [`Error::Disposed`]. `subscribe` must not request a signal from the
    /// producer it is registering.
    pub fn from_subscription<F>(subscribe: F) -> Self
    where
        F: Fn(Trigger) -> Result<Subscription, BoxError> + Send + Sync + 'static,
    {
        Self::new(SubscribedSource {
            subscribe: Box::new(subscribe),
            trigger: Trigger::new(),
            state: Mutex::new(Subscribed::Idle),
        })
    }

    /// A producer for event sources whose registrations are single-shot.
    ///
    /// Every signal request arms a fresh signal and registers anew. The new
    /// registration is in place before the previous one is released, so no
    /// change can slip between them.
    pub fn from_resubscribing<F>(subscribe: F) -> Self
    where
        F: Fn(Trigger) -> Result<Subscription, BoxError> + Send + Sync + 'static,
    {
        Self::new(ResubscribingSource {
            subscribe: Box::new(subscribe),
            trigger: Trigger::new(),
            registration: ArcSwapOption::empty(),
            closed: AtomicU8::new(0),
        })
    }

    /// A producer driven by an add/remove-style event handler.
    ///
    /// `add` is called lazily with a [`Trigger`] to invoke from the handler and
    /// returns whatever `remove` needs to detach it.
    pub fn from_handlers<H, A, R>(add: A, remove: R) -> Self
    where
        H: Send + 'static,
        A: Fn(Trigger) -> H + Send + Sync + 'static,
        R: Fn(H) + Send + Sync + 'static,
    {
        let remove = Arc::new(remove);
        Self::from_subscription(move |trigger| {
            let handler = add(trigger);
            let remove = remove.clone();
            Ok(Subscription::new(move || remove(handler)))
        })
    }

    /// Request a signal for the current condition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SubscriptionFailed`] if the underlying source could
    /// not register, or [`Error::Disposed`] after [`close`](Self::close).
    pub fn signal(&self) -> Result<Signal> {
        self.source.signal()
    }

    /// Release the producer's external subscription, if any.
    pub fn close(&self) {
        self.source.close();
    }
}

impl Default for SignalProducer {
    fn default() -> Self {
        Self::never()
    }
}

impl fmt::Debug for SignalProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalProducer").finish_non_exhaustive()
    }
}

/// Fires the active signal of a producer and arms the next one.
///
/// Triggers are cheap to clone and safe to fire from any thread. Concurrent
/// fires each fire exactly the signal that was active when they swapped it out.
#[derive(Clone)]
pub struct Trigger {
    slot: Arc<ArcSwap<Latch>>,
}

impl Trigger {
    fn new() -> Self {
        Self {
            slot: Arc::new(ArcSwap::from_pointee(Latch::new())),
        }
    }

    /// Fire the currently active signal.
    pub fn fire(&self) {
        let previous = self.slot.swap(Arc::new(Latch::new()));
        previous.fire();
    }

    fn current(&self) -> Signal {
        Signal::from_latch(self.slot.load_full())
    }

    /// Replace the active signal with a fresh one, retiring the old one.
    fn rearm(&self) -> Arc<Latch> {
        let fresh = Arc::new(Latch::new());
        let previous = self.slot.swap(fresh.clone());
        previous.retire();
        fresh
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger").finish_non_exhaustive()
    }
}

struct NeverSource;

impl SignalSource for NeverSource {
    fn signal(&self) -> Result<Signal> {
        Ok(Signal::never())
    }
}

struct ManualSource {
    trigger: Trigger,
}

impl SignalSource for ManualSource {
    fn signal(&self) -> Result<Signal> {
        Ok(self.trigger.current())
    }
}

struct FnSource<F> {
    f: F,
}

impl<F> SignalSource for FnSource<F>
where
    F: Fn() -> Option<Signal> + Send + Sync + 'static,
{
    fn signal(&self) -> Result<Signal> {
        Ok((self.f)().unwrap_or_default())
    }
}

type SubscribeFn = Box<dyn Fn(Trigger) -> Result<Subscription, BoxError> + Send + Sync>;

enum Subscribed {
    Idle,
    Active(Subscription),
    Failed(Error),
    Closed,
}

struct SubscribedSource {
    subscribe: SubscribeFn,
    trigger: Trigger,
    /// Held across the subscribe call so concurrent requests wait for the
    /// one attempt and observe its outcome.
    state: Mutex<Subscribed>,
}

impl SignalSource for SubscribedSource {
    fn signal(&self) -> Result<Signal> {
        let mut state = self.state.lock();
        match &*state {
            Subscribed::Active(_) => {}
            Subscribed::Failed(error) => return Err(error.clone()),
            Subscribed::Closed => return Err(Error::Disposed),
            Subscribed::Idle => match (self.subscribe)(self.trigger.clone()) {
                Ok(subscription) => {
                    debug!("signal source subscribed");
                    *state = Subscribed::Active(subscription);
                }
                Err(e) => {
                    let error = Error::subscription_failed(e);
                    warn!(error = %error, "signal source subscription failed");
                    *state = Subscribed::Failed(error.clone());
                    return Err(error);
                }
            },
        }
        Ok(self.trigger.current())
    }

    fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), Subscribed::Closed);
        // Released outside the lock.
        if let Subscribed::Active(subscription) = previous {
            subscription.dispose();
            debug!("signal source unsubscribed");
        }
    }
}

struct ResubscribingSource {
    subscribe: SubscribeFn,
    trigger: Trigger,
    registration: ArcSwapOption<Subscription>,
    closed: AtomicU8,
}

impl SignalSource for ResubscribingSource {
    fn signal(&self) -> Result<Signal> {
        if self.closed.load(Ordering::Acquire) != 0 {
            return Err(Error::Disposed);
        }

        // Arm first so a registration that fires synchronously hits the new signal.
        let latch = self.trigger.rearm();
        let registration = (self.subscribe)(self.trigger.clone()).map_err(|e| {
            let error = Error::subscription_failed(e);
            warn!(error = %error, "signal source re-subscription failed");
            error
        })?;

        let previous = self.registration.swap(Some(Arc::new(registration)));
        drop(previous);

        if self.closed.load(Ordering::Acquire) != 0 {
            drop(self.registration.swap(None));
        }
        Ok(Signal::from_latch(latch))
    }

    fn close(&self) {
        self.closed.store(1, Ordering::Release);
        drop(self.registration.swap(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_manual_trigger_arms_fresh_signal() {
        let (producer, trigger) = SignalProducer::manual();
        let first = producer.signal().unwrap();
        assert!(!first.has_changed());

        trigger.fire();
        assert!(first.has_changed());

        let second = producer.signal().unwrap();
        assert!(!second.has_changed());
        assert!(!first.same(&second));
    }

    #[test]
    fn test_manual_signal_shared_until_fired() {
        let (producer, _trigger) = SignalProducer::manual();
        let a = producer.signal().unwrap();
        let b = producer.signal().unwrap();
        assert!(a.same(&b));
    }

    #[test]
    fn test_from_fn_substitutes_never() {
        let producer = SignalProducer::from_fn(|| None);
        let signal = producer.signal().unwrap();
        assert!(signal.same(&Signal::never()));
    }

    #[test]
    fn test_subscription_is_lazy_and_single() {
        let subscribes = Arc::new(AtomicU32::new(0));
        let s = subscribes.clone();
        let producer = SignalProducer::from_subscription(move |_trigger| {
            s.fetch_add(1, Ordering::SeqCst);
            Ok(Subscription::inert())
        });

        assert_eq!(subscribes.load(Ordering::SeqCst), 0);
        producer.signal().unwrap();
        producer.signal().unwrap();
        assert_eq!(subscribes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_failure_is_fatal() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let producer = SignalProducer::from_subscription(move |_trigger| {
            a.fetch_add(1, Ordering::SeqCst);
            Err("event source offline".into())
        });

        let first = producer.signal().unwrap_err();
        assert!(matches!(first, Error::SubscriptionFailed { .. }));
        let second = producer.signal().unwrap_err();
        assert!(second.to_string().contains("event source offline"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_requests_share_failed_subscription() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let producer = SignalProducer::from_subscription(move |_trigger| {
            a.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(100));
            Err("event source offline".into())
        });

        let first = std::thread::spawn({
            let producer = producer.clone();
            move || producer.signal()
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        let second = producer.signal();

        assert!(matches!(second, Err(Error::SubscriptionFailed { .. })));
        assert!(matches!(
            first.join().unwrap(),
            Err(Error::SubscriptionFailed { .. })
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_after_failure_is_disposed() {
        let producer =
            SignalProducer::from_subscription(|_trigger| Err("event source offline".into()));

        assert!(matches!(
            producer.signal(),
            Err(Error::SubscriptionFailed { .. })
        ));
        producer.close();
        assert!(matches!(producer.signal(), Err(Error::Disposed)));
    }

    #[test]
    fn test_close_releases_subscription() {
        let released = Arc::new(AtomicU32::new(0));
        let r = released.clone();
        let producer = SignalProducer::from_subscription(move |_trigger| {
            let r = r.clone();
            Ok(Subscription::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }))
        });

        producer.signal().unwrap();
        producer.close();
        producer.close();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(matches!(producer.signal(), Err(Error::Disposed)));
    }

    #[test]
    fn test_resubscribing_registers_before_release() {
        let live = Arc::new(AtomicU32::new(0));
        let max_live = Arc::new(AtomicU32::new(0));
        let (l, m) = (live.clone(), max_live.clone());
        let producer = SignalProducer::from_resubscribing(move |_trigger| {
            let now = l.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(now, Ordering::SeqCst);
            let l = l.clone();
            Ok(Subscription::new(move || {
                l.fetch_sub(1, Ordering::SeqCst);
            }))
        });

        producer.signal().unwrap();
        producer.signal().unwrap();
        producer.signal().unwrap();

        // Two overlap briefly during each swap; only one survives.
        assert_eq!(max_live.load(Ordering::SeqCst), 2);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        producer.close();
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handlers_add_and_remove() {
        let handlers = Arc::new(parking_lot::Mutex::new(Vec::<Trigger>::new()));
        let removed = Arc::new(AtomicU32::new(0));

        let h = handlers.clone();
        let r = removed.clone();
        let producer = SignalProducer::from_handlers(
            move |trigger| {
                h.lock().push(trigger);
                0usize
            },
            move |_index| {
                r.fetch_add(1, Ordering::SeqCst);
            },
        );

        let signal = producer.signal().unwrap();
        for handler in handlers.lock().iter() {
            handler.fire();
        }
        assert!(signal.has_changed());

        drop(producer);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }
}
