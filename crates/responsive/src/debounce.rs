//! Trailing-edge debouncing of signal bursts.
//!
//! A [`Debouncer`] listens to a [`SignalProducer`] and invokes its callback
//! once the producer has been quiet for the configured window. Every fire
//! during the window restarts the timer, so a burst of K fires yields exactly
//! one callback, no earlier than `quiet` after the last fire.
//!
//! ```text
//! fires:     |  |   |            |
//! timer:     [--x--x---x-------->]callback
//!                                [---x------->]callback
//! ```
//!
//! The debouncer always holds an up-to-date registration on a fresh signal,
//! including while the timer is pending, so no fire is ever missed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::signal::{SignalProducer, Subscription};

type Callback = Box<dyn Fn() + Send + Sync + 'static>;

/// Coalesces bursts of signals into a single trailing callback.
///
/// Dropping the debouncer disposes it.
pub struct Debouncer {
    inner: Arc<Inner>,
}

struct Inner {
    producer: SignalProducer,
    quiet: Duration,
    runtime: Handle,
    callback: Callback,
    timer: ArcSwapOption<Timer>,
    registration: ArcSwapOption<Subscription>,
    next_timer: AtomicU64,
    disposed: AtomicBool,
}

struct Timer {
    id: u64,
    abort: OnceLock<AbortHandle>,
}

impl Timer {
    fn cancel(&self) {
        if let Some(abort) = self.abort.get() {
            abort.abort();
        }
    }
}

impl Debouncer {
    /// Start debouncing `producer` on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] outside a runtime, or the producer's
    /// [`Error::SubscriptionFailed`] if the initial signal request fails.
    pub fn new<F>(producer: SignalProducer, quiet: Duration, callback: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Self::with_runtime(runtime, producer, quiet, callback)
    }

    /// Start debouncing `producer`, spawning timers on `runtime`.
    ///
    /// # Errors
    ///
    /// Returns the producer's error if the initial signal request fails.
    pub fn with_runtime<F>(
        runtime: Handle,
        producer: SignalProducer,
        quiet: Duration,
        callback: F,
    ) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new(Inner {
            producer,
            quiet,
            runtime,
            callback: Box::new(callback),
            timer: ArcSwapOption::empty(),
            registration: ArcSwapOption::empty(),
            next_timer: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        });
        Inner::listen(&inner, false)?;
        debug!(quiet_ms = quiet.as_millis(), "debouncer started");
        Ok(Self { inner })
    }

    /// The configured quiet window.
    #[must_use]
    pub fn quiet_window(&self) -> Duration {
        self.inner.quiet
    }

    /// Returns `true` while a trailing callback is scheduled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.timer.load().is_some()
    }

    /// Returns `true` once [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Cancel any pending callback and release the signal registration.
    ///
    /// Idempotent. No callback fires after this returns, except one that was
    /// already executing.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Inner {
    fn on_fire(self: &Arc<Self>) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        trace!("debounced signal fired");
        self.arm();
        if let Err(e) = Self::listen(self, true) {
            warn!(error = %e, "debouncer failed to re-register after signal");
        }
    }

    /// Restart the quiet window.
    fn arm(self: &Arc<Self>) {
        let id = self.next_timer.fetch_add(1, Ordering::Relaxed);
        let timer = Arc::new(Timer {
            id,
            abort: OnceLock::new(),
        });
        if let Some(previous) = self.timer.swap(Some(timer.clone())) {
            previous.cancel();
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let quiet = self.quiet;
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(quiet).await;
            if let Some(inner) = weak.upgrade() {
                inner.elapse(id);
            }
        });
        let _ = timer.abort.set(task.abort_handle());

        // Disposed while arming: the swap above may have raced the clear.
        if self.disposed.load(Ordering::Acquire) {
            timer.cancel();
        }
    }

    fn elapse(self: &Arc<Self>, id: u64) {
        let current = self.timer.load_full();
        let Some(timer) = current.as_ref().filter(|t| t.id == id) else {
            return;
        };
        let previous = self.timer.compare_and_swap(&current, None);
        let won = match &*previous {
            Some(p) => Arc::ptr_eq(p, timer),
            None => false,
        };
        if !won || self.disposed.load(Ordering::Acquire) {
            return;
        }

        trace!("debounce window elapsed");
        (self.callback)();

        if let Err(e) = Self::listen(self, false) {
            warn!(error = %e, "debouncer failed to re-register after callback");
        }
    }

    /// Register on a fresh signal.
    ///
    /// With `skip_if_changed`, a signal that has already fired is left alone:
    /// the pending timer's elapse registers again.
    fn listen(this: &Arc<Self>, skip_if_changed: bool) -> Result<()> {
        if this.disposed.load(Ordering::Acquire) {
            return Ok(());
        }
        let signal = this.producer.signal()?;
        if skip_if_changed && signal.has_changed() {
            return Ok(());
        }

        let weak = Arc::downgrade(this);
        let registration = signal.register(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_fire();
            }
        });

        // An already-fired signal ran on_fire inline; that nested listen owns the slot.
        if registration.is_active() {
            drop(this.registration.swap(Some(Arc::new(registration))));
            if this.disposed.load(Ordering::Acquire) {
                drop(this.registration.swap(None));
            }
        }
        Ok(())
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(timer) = self.timer.swap(None) {
            timer.cancel();
        }
        drop(self.registration.swap(None));
        debug!("debouncer disposed");
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("quiet", &self.inner.quiet)
            .field("pending", &self.is_pending())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
