//! Change signals and the producers that hand them out.
//!
//! A [`Signal`] is a one-shot latch meaning "something changed". Once it
//! has changed it stays changed; the next condition needs a fresh signal,
//! which is obtained from a [`SignalProducer`].
//!
//! # Producers
//!
//! | Constructor | Fires when |
//! |-------------|------------|
//! | [`SignalProducer::manual`] | The returned [`Trigger`] is fired |
//! | [`SignalProducer::from_subscription`] | A long-lived external subscription calls its trigger |
//! | [`SignalProducer::from_resubscribing`] | A single-shot registration calls its trigger |
//! | [`SignalProducer::from_handlers`] | An add/remove-style event handler is invoked |
//! | [`SignalProducer::from_cancellation`] | A [`CancellationToken`](tokio_util::sync::CancellationToken) is cancelled |
//! | [`SignalProducer::compose`] | Any child producer's signal fires |
//! | `watch_files` (feature `watch`) | A watched file is created, modified or removed |
//!
//! # Example
//!
//! ```rust,ignore
//! use responsive::signal::SignalProducer;
//!
//! let (config_changed, trigger) = SignalProducer::manual();
//! let (flags_changed, flags) = SignalProducer::manual();
//! let any = SignalProducer::compose([config_changed, flags_changed]);
//!
//! let signal = any.signal()?;
//! let _registration = signal.register(|| println!("changed"));
//!
//! flags.fire();
//! assert!(signal.has_changed());
//! ```

mod cancel;
mod composite;
mod latch;
mod source;
mod subscription;
#[cfg(feature = "watch")]
mod watch;

use std::fmt;
use std::sync::Arc;

use latch::Latch;

pub use composite::CompositeSource;
pub use source::{SignalProducer, SignalSource, Trigger};
pub use subscription::Subscription;
#[cfg(feature = "watch")]
pub use watch::watch_files;

/// A one-shot "something changed" latch.
///
/// Cloning a signal yields another handle to the same latch. The default
/// signal never fires.
#[derive(Clone, Default)]
pub struct Signal {
    kind: SignalKind,
}

#[derive(Clone, Default)]
enum SignalKind {
    #[default]
    Never,
    Latch(Arc<Latch>),
    Any(Arc<AnySignal>),
}

/// Signal fired by whichever of its children changes first.
struct AnySignal {
    latch: Arc<Latch>,
    children: Vec<Signal>,
}

impl Signal {
    /// A signal that never fires.
    #[must_use]
    pub const fn never() -> Self {
        Self {
            kind: SignalKind::Never,
        }
    }

    /// A standalone signal and the handle that fires it.
    #[must_use]
    pub fn one_shot() -> (Self, OneShot) {
        let latch = Arc::new(Latch::new());
        (Self::from_latch(latch.clone()), OneShot { latch })
    }

    /// A signal that fires as soon as any of `children` fires.
    ///
    /// Once fired, the signal unregisters from every child. Dropping the
    /// returned signal (and all its clones) also unregisters.
    #[must_use]
    pub fn any(children: Vec<Self>) -> Self {
        let latch = Arc::new(Latch::new());
        let registrations = children
            .iter()
            .map(|child| {
                let latch = Arc::downgrade(&latch);
                child.register(move || {
                    if let Some(latch) = latch.upgrade() {
                        latch.fire();
                    }
                })
            })
            .collect();
        latch.attach(Subscription::all(registrations));

        Self {
            kind: SignalKind::Any(Arc::new(AnySignal { latch, children })),
        }
    }

    pub(crate) const fn from_latch(latch: Arc<Latch>) -> Self {
        Self {
            kind: SignalKind::Latch(latch),
        }
    }

    /// Returns `true` once the signal has fired. Never reverts.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        match &self.kind {
            SignalKind::Never => false,
            SignalKind::Latch(latch) => latch.has_fired(),
            SignalKind::Any(any) => {
                any.latch.has_fired() || any.children.iter().any(Self::has_changed)
            }
        }
    }

    /// Returns `true` if the signal proactively invokes callbacks.
    ///
    /// Every signal built by this crate does; consumers never need to poll.
    #[must_use]
    pub const fn active_callbacks(&self) -> bool {
        true
    }

    /// Register a callback to run when the signal fires.
    ///
    /// If the signal has already fired, the callback runs immediately on the
    /// calling thread and the returned subscription is inert.
    pub fn register<F>(&self, callback: F) -> Subscription
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.kind {
            SignalKind::Never => Subscription::inert(),
            SignalKind::Latch(latch) => latch.register(Box::new(callback)),
            SignalKind::Any(any) => any.latch.register(Box::new(callback)),
        }
    }

    /// Returns `true` if both handles refer to the same latch.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (SignalKind::Never, SignalKind::Never) => true,
            (SignalKind::Latch(a), SignalKind::Latch(b)) => Arc::ptr_eq(a, b),
            (SignalKind::Any(a), SignalKind::Any(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Retire an unfired signal so it never fires and holds no callbacks.
    pub(crate) fn retire(&self) {
        match &self.kind {
            SignalKind::Never => {}
            SignalKind::Latch(latch) => latch.retire(),
            SignalKind::Any(any) => any.latch.retire(),
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            SignalKind::Never => "never",
            SignalKind::Latch(_) => "latch",
            SignalKind::Any(_) => "any",
        };
        f.debug_struct("Signal")
            .field("kind", &kind)
            .field("changed", &self.has_changed())
            .finish()
    }
}

/// Fires the signal returned alongside it by [`Signal::one_shot`].
#[derive(Clone)]
pub struct OneShot {
    latch: Arc<Latch>,
}

impl OneShot {
    /// Fire the signal. Returns `false` if it had already fired.
    pub fn fire(&self) -> bool {
        self.latch.fire()
    }
}

impl fmt::Debug for OneShot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneShot")
            .field("fired", &self.latch.has_fired())
            .finish()
    }
}
