//! Fan-in of several producers into one.

use std::fmt;

use arc_swap::ArcSwapOption;

use super::{Signal, SignalProducer, SignalSource};
use crate::error::Result;

/// A source whose signals fire when any child producer's signal fires.
///
/// Each child is flagged with whether its previous signal should be retired
/// when a new one is requested. Retiring frees the old signal's callbacks
/// immediately instead of waiting for it to fire.
pub struct CompositeSource {
    children: Vec<Child>,
}

struct Child {
    producer: SignalProducer,
    dispose_on_rearm: bool,
    current: ArcSwapOption<Signal>,
}

impl CompositeSource {
    /// Combine `children`, each with its dispose-on-rearm flag.
    pub fn new<I>(children: I) -> Self
    where
        I: IntoIterator<Item = (SignalProducer, bool)>,
    {
        let children = children
            .into_iter()
            .map(|(producer, dispose_on_rearm)| Child {
                producer,
                dispose_on_rearm,
                current: ArcSwapOption::empty(),
            })
            .collect();
        Self { children }
    }

    /// Number of child producers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Returns `true` if there are no children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Child {
    fn rearm(&self) -> Result<Signal> {
        let signal = self.producer.signal()?;
        let previous = self.current.swap(Some(std::sync::Arc::new(signal.clone())));
        if self.dispose_on_rearm
            && let Some(previous) = previous
            && !previous.same(&signal)
        {
            previous.retire();
        }
        Ok(signal)
    }
}

impl SignalSource for CompositeSource {
    fn signal(&self) -> Result<Signal> {
        let mut signals = self
            .children
            .iter()
            .map(Child::rearm)
            .collect::<Result<Vec<_>>>()?;

        Ok(match signals.len() {
            0 => Signal::never(),
            1 => signals.remove(0),
            _ => Signal::any(signals),
        })
    }

    fn close(&self) {
        for child in &self.children {
            drop(child.current.swap(None));
            child.producer.close();
        }
    }
}

impl fmt::Debug for CompositeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeSource")
            .field("children", &self.children.len())
            .finish()
    }
}

impl SignalProducer {
    /// Combine several producers; the result fires when any child fires.
    ///
    /// Superseded child signals are retired on every request.
    pub fn compose<I>(producers: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        Self::compose_with(producers.into_iter().map(|p| (p, true)))
    }

    /// Combine several producers with an explicit dispose-on-rearm flag per child.
    pub fn compose_with<I>(producers: I) -> Self
    where
        I: IntoIterator<Item = (Self, bool)>,
    {
        Self::new(CompositeSource::new(producers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::signal::{OneShot, Subscription};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A producer that arms a fresh one-shot per request, keeping the handles.
    fn one_shots() -> (SignalProducer, Arc<Mutex<Vec<OneShot>>>) {
        let handles = Arc::new(Mutex::new(Vec::new()));
        let h = handles.clone();
        let producer = SignalProducer::from_fn(move || {
            let (signal, one_shot) = Signal::one_shot();
            h.lock().push(one_shot);
            Some(signal)
        });
        (producer, handles)
    }

    #[test]
    fn test_empty_composite_never_fires() {
        let producer = SignalProducer::compose(Vec::new());
        assert!(producer.signal().unwrap().same(&Signal::never()));
    }

    #[test]
    fn test_single_child_passes_through() {
        let (child, _trigger) = SignalProducer::manual();
        let composite = SignalProducer::compose([child.clone()]);
        let a = composite.signal().unwrap();
        let b = child.signal().unwrap();
        assert!(a.same(&b));
    }

    #[test]
    fn test_any_child_fires_composite() {
        let (a, _fire_a) = SignalProducer::manual();
        let (b, fire_b) = SignalProducer::manual();
        let composite = SignalProducer::compose([a, b]);

        let signal = composite.signal().unwrap();
        assert!(!signal.has_changed());
        fire_b.fire();
        assert!(signal.has_changed());
        assert!(!composite.signal().unwrap().has_changed());
    }

    #[test]
    fn test_child_failure_propagates() {
        let (ok, _trigger) = SignalProducer::manual();
        let failing = SignalProducer::from_subscription(|_| Err("offline".into()));
        let composite = SignalProducer::compose([ok, failing]);
        assert!(matches!(
            composite.signal(),
            Err(Error::SubscriptionFailed { .. })
        ));
    }

    #[test]
    fn test_rearm_retires_superseded_signal() {
        let producer = SignalProducer::from_resubscribing(|_| Ok(Subscription::inert()));
        let composite = SignalProducer::compose_with([(producer, true)]);

        let first = composite.signal().unwrap();
        let _second = composite.signal().unwrap();
        let late = first.register(|| panic!("retired signal fired"));
        assert!(!late.is_active());
        assert!(!first.has_changed());
    }

    #[test]
    fn test_kept_child_signal_still_fires_after_rearm() {
        let (child, handles) = one_shots();
        let composite =
            SignalProducer::compose_with([(child, false), (SignalProducer::never(), true)]);

        let first = composite.signal().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        let _registration = first.register(move || f.store(true, Ordering::SeqCst));

        let second = composite.signal().unwrap();
        assert_eq!(handles.lock().len(), 2);

        let superseded = handles.lock()[0].clone();
        assert!(superseded.fire());
        assert!(first.has_changed());
        assert!(fired.load(Ordering::SeqCst));
        assert!(!second.has_changed());
    }

    #[test]
    fn test_retired_child_signal_never_fires_after_rearm() {
        let (child, handles) = one_shots();
        let composite =
            SignalProducer::compose_with([(child, true), (SignalProducer::never(), true)]);

        let first = composite.signal().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        let _registration = first.register(move || f.store(true, Ordering::SeqCst));

        let _second = composite.signal().unwrap();
        let superseded = handles.lock()[0].clone();
        assert!(!superseded.fire());
        assert!(!first.has_changed());
        assert!(!fired.load(Ordering::SeqCst));
    }
}
