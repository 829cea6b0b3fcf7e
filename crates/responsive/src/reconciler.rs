//! Start/stop reconciliation of a managed process.
//!
//! A [`Reconciler`] keeps a [`ManagedProcess`] running exactly while its
//! [`CompositeRequirement`] is satisfied. Each reconciliation compares the
//! desired state against the actual one and takes the minimal action:
//!
//! | State | Requirement | Action |
//! |-------|-------------|--------|
//! | `Stopped` | satisfied | start |
//! | `Running` | not satisfied | stop |
//! | otherwise | | none |
//!
//! Reconciliation runs when the host calls [`Reconciler::start`] and after every
//! debounced signal. Signal-driven runs are spawned as detached tasks whose
//! errors are logged. Every run, including host `start`/`stop`, is serialized
//! by one per-instance lock, and the requirement is evaluated while holding it.
//!
//! A requirement that faults is treated as not satisfied. A run whose
//! evaluation is cancelled, or whose reconciler is disposed mid-evaluation,
//! takes no action at all.
//!
//! After the host calls [`Reconciler::stop`], signals no longer reconcile until
//! the next [`Reconciler::start`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{self, BoxFuture, Either};
use futures::pin_mut;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::debounce::Debouncer;
use crate::error::{BoxError, Error, ProcessAction, Result};
use crate::requirement::CompositeRequirement;
use crate::signal::SignalProducer;

/// A process the reconciler can start and stop.
///
/// `start` and `stop` are never called concurrently for the same reconciler,
/// and are only called to change state: `start` on a stopped process, `stop`
/// on a running one.
pub trait ManagedProcess: Send + Sync + 'static {
    /// Start the process.
    fn start<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<(), BoxError>>;

    /// Stop the process.
    fn stop<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<(), BoxError>>;

    /// Release resources held by the process.
    ///
    /// Called on reconciler disposal when the reconciler owns the process.
    fn dispose(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Whether the managed process is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Not running.
    #[default]
    Stopped,
    /// Running.
    Running,
}

/// Drives a [`ManagedProcess`] from a requirement and a debounced signal.
///
/// Dropping the reconciler disposes it. Disposal does not stop a running
/// process; call [`stop`](Self::stop) first.
pub struct Reconciler<P: ManagedProcess> {
    core: Arc<Core<P>>,
    debouncer: Debouncer,
    producer: SignalProducer,
}

struct Core<P> {
    process: Arc<P>,
    requirement: CompositeRequirement,
    state: Mutex<ProcessState>,
    /// Mirror of `state` for lock-free reads.
    running: AtomicBool,
    /// Cleared by host stop; signal-driven runs are skipped while clear.
    host_active: AtomicBool,
    shutdown: CancellationToken,
    owns_process: bool,
    disposed: AtomicBool,
}

impl<P: ManagedProcess> Reconciler<P> {
    /// Create a reconciler on the current tokio runtime.
    ///
    /// The reconciler owns `process` and disposes it on disposal. Nothing is
    /// started until [`start`](Self::start) or [`reconcile`](Self::reconcile)
    /// is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] outside a runtime, or the producer's
    /// [`Error::SubscriptionFailed`].
    pub fn new(
        process: P,
        requirement: CompositeRequirement,
        producer: SignalProducer,
        quiet: Duration,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Self::with_options(runtime, Arc::new(process), requirement, producer, quiet, true)
    }

    pub(crate) fn with_options(
        runtime: Handle,
        process: Arc<P>,
        requirement: CompositeRequirement,
        producer: SignalProducer,
        quiet: Duration,
        owns_process: bool,
    ) -> Result<Self> {
        let core = Arc::new(Core {
            process,
            requirement,
            state: Mutex::new(ProcessState::Stopped),
            running: AtomicBool::new(false),
            host_active: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            owns_process,
            disposed: AtomicBool::new(false),
        });

        let weak: Weak<Core<P>> = Arc::downgrade(&core);
        let spawner = runtime.clone();
        let debouncer = Debouncer::with_runtime(runtime, producer.clone(), quiet, move || {
            let Some(core) = weak.upgrade() else {
                return;
            };
            spawner.spawn(async move {
                if let Err(e) = core.reconcile_from_signal().await {
                    warn!(error = %e, "signal-triggered reconcile failed");
                }
            });
        })?;

        Ok(Self {
            core,
            debouncer,
            producer,
        })
    }

    /// Host start: re-enable signal-driven reconciliation and reconcile now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProcessFailed`] if starting the process failed, or
    /// [`Error::Disposed`].
    pub async fn start(&self) -> Result<ProcessState> {
        self.start_with(&CancellationToken::new()).await
    }

    /// Host start bounded by the host's own cancellation token.
    ///
    /// `cancel` is linked to the reconciler's shutdown token and handed to
    /// the requirements and to [`ManagedProcess::start`]. If it fires before
    /// the requirement settles, nothing is started.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fired first, otherwise the
    /// same errors as [`start`](Self::start).
    pub async fn start_with(&self, cancel: &CancellationToken) -> Result<ProcessState> {
        self.core.ensure_live()?;
        let mut state = self.core.state.lock().await;
        self.core.host_active.store(true, Ordering::Release);
        debug!("host started reconciler");

        let scope = self.core.shutdown.child_token();
        let run = self.core.reconcile_locked(&mut state, &scope);
        let relay = async {
            cancel.cancelled().await;
            scope.cancel();
        };
        pin_mut!(relay, run);
        match future::select(relay, run).await {
            Either::Left(((), run)) => run.await,
            Either::Right((result, _)) => result,
        }
    }

    /// Host stop: stop the process if running and ignore signals until the
    /// next [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProcessFailed`] if stopping the process failed, or
    /// [`Error::Disposed`].
    pub async fn stop(&self) -> Result<()> {
        self.core.ensure_live()?;
        let mut state = self.core.state.lock().await;
        self.core.host_active.store(false, Ordering::Release);
        debug!("host stopped reconciler");
        self.core.ensure_live()?;
        if *state == ProcessState::Running {
            self.core
                .transition(&mut state, ProcessAction::Stop, &self.core.shutdown)
                .await?;
        }
        Ok(())
    }

    /// Evaluate the requirement and start or stop the process to match.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProcessFailed`] if the start or stop failed (the state
    /// is left unchanged), or [`Error::Disposed`].
    pub async fn reconcile(&self) -> Result<ProcessState> {
        self.core.ensure_live()?;
        let mut state = self.core.state.lock().await;
        self.core.reconcile_locked(&mut state, &self.core.shutdown).await
    }

    /// The process state after the last completed transition.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        if self.core.running.load(Ordering::Acquire) {
            ProcessState::Running
        } else {
            ProcessState::Stopped
        }
    }

    /// The managed process.
    #[must_use]
    pub fn process(&self) -> &Arc<P> {
        &self.core.process
    }

    /// The debounce window applied to signals.
    #[must_use]
    pub fn quiet_window(&self) -> Duration {
        self.debouncer.quiet_window()
    }

    /// Returns `true` once [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.core.disposed.load(Ordering::Acquire)
    }

    /// Release the debouncer, the signal subscription, the owned process and
    /// the requirements.
    ///
    /// Idempotent. Every resource is released even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DisposeFailed`] listing every release that failed.
    pub fn dispose(&self) -> Result<()> {
        if self.core.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.core.shutdown.cancel();
        self.debouncer.dispose();
        self.producer.close();

        let mut errors = Vec::new();
        if self.core.owns_process
            && let Err(e) = self.core.process.dispose()
        {
            errors.push(Error::release_failed("managed process", e));
        }
        match self.core.requirement.dispose_all() {
            Ok(()) => {}
            Err(Error::DisposeFailed { errors: nested }) => errors.extend(nested),
            Err(other) => errors.push(other),
        }

        debug!(failures = errors.len(), "reconciler disposed");
        Error::from_dispose_errors(errors)
    }
}

impl<P: ManagedProcess> Core<P> {
    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    async fn reconcile_from_signal(&self) -> Result<ProcessState> {
        self.ensure_live()?;
        let mut state = self.state.lock().await;
        if !self.host_active.load(Ordering::Acquire) {
            trace!("host stopped, ignoring signal");
            return Ok(*state);
        }
        self.reconcile_locked(&mut state, &self.shutdown).await
    }

    /// Evaluate and converge. Caller holds the state lock.
    ///
    /// Liveness is checked again after evaluation: a reconciler disposed (or a
    /// `cancel` fired) while the requirement ran takes no action.
    async fn reconcile_locked(
        &self,
        state: &mut ProcessState,
        cancel: &CancellationToken,
    ) -> Result<ProcessState> {
        self.ensure_live()?;
        let desired = match self.requirement.evaluate(cancel).await {
            Ok(desired) => desired,
            Err(Error::Cancelled) => false,
            Err(e) => {
                warn!(error = %e, "requirement check failed, treating as unsatisfied");
                false
            }
        };
        self.ensure_live()?;
        if cancel.is_cancelled() {
            debug!("reconcile cancelled, leaving process as is");
            return Err(Error::Cancelled);
        }
        debug!(desired, actual = ?*state, "reconciling");

        match (*state, desired) {
            (ProcessState::Running, false) => {
                self.transition(state, ProcessAction::Stop, cancel).await?;
            }
            (ProcessState::Stopped, true) => {
                self.transition(state, ProcessAction::Start, cancel).await?;
            }
            _ => trace!("process already in desired state"),
        }
        Ok(*state)
    }

    async fn transition(
        &self,
        state: &mut ProcessState,
        action: ProcessAction,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (result, next) = match action {
            ProcessAction::Start => (self.process.start(cancel).await, ProcessState::Running),
            ProcessAction::Stop => (self.process.stop(cancel).await, ProcessState::Stopped),
        };
        if let Err(e) = result {
            let error = Error::process_failed(action, e);
            warn!(error = %error, "managed process transition failed");
            return Err(error);
        }

        *state = next;
        self.running
            .store(next == ProcessState::Running, Ordering::Release);
        debug!(%action, "managed process transitioned");
        Ok(())
    }
}

impl<P: ManagedProcess> Drop for Reconciler<P> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            warn!(error = %e, "reconciler disposal failed");
        }
    }
}

impl<P: ManagedProcess> fmt::Debug for Reconciler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("state", &self.state())
            .field("requirements", &self.core.requirement)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
