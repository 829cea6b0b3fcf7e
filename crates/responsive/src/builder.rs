//! Fluent assembly of signals, requirements and debouncing.
//!
//! [`ResponsiveBuilder`] collects the three choices a host makes (what counts
//! as a change, what must hold for a process to run, how long to debounce)
//! and assembles either a [`Reloadable`] artifact or a [`Reconciler`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "watch")]
use std::path::{Path, PathBuf};

use tokio::runtime::Handle;
use tracing::debug;

use crate::config::ResponsiveConfig;
use crate::coordinator::{AsyncRebuildCoordinator, RebuildStrategy};
use crate::error::{BoxError, Error, Result};
use crate::reconciler::{ManagedProcess, Reconciler};
use crate::reloadable::Reloadable;
use crate::requirement::{self, CompositeRequirement, Requirement};
use crate::signal::SignalProducer;

/// Builder for [`Reloadable`] artifacts and [`Reconciler`]s.
///
/// # Example
///
/// ```rust,ignore
/// let (producer, trigger) = SignalProducer::manual();
///
/// let pipeline = ResponsiveBuilder::new()
///     .on_signal(producer)
///     .debounce(Duration::from_millis(200))
///     .strategy(RebuildStrategy::OnDemand)
///     .build_reloadable(|| async { Ok(Pipeline::from_config(load().await?)) })
///     .await?;
///
/// let worker = ResponsiveBuilder::new()
///     .on_signal(flags_producer)
///     .require_fn("enabled", move || flags.is_enabled("worker"))
///     .build_reconciler(Worker::new())?;
/// worker.start().await?;
/// ```
pub struct ResponsiveBuilder {
    /// Signal producers with their dispose-on-rearm flags.
    signals: Vec<(SignalProducer, bool)>,

    /// Files to watch, merged into the signals at build time.
    #[cfg(feature = "watch")]
    files: Vec<PathBuf>,

    requirements: CompositeRequirement,
    config: ResponsiveConfig,
    runtime: Option<Handle>,
    owns_process: bool,
}

impl ResponsiveBuilder {
    /// Create a builder with default settings.
    ///
    /// Default settings:
    /// - No signals (nothing triggers a rebuild)
    /// - No requirements (always satisfied)
    /// - 500ms debounce, on-invalidate strategy
    /// - The current tokio runtime
    #[must_use]
    pub fn new() -> Self {
        Self {
            signals: Vec::new(),
            #[cfg(feature = "watch")]
            files: Vec::new(),
            requirements: CompositeRequirement::new(),
            config: ResponsiveConfig::default(),
            runtime: None,
            owns_process: true,
        }
    }

    /// Replace the debounce window and strategy.
    #[must_use]
    pub const fn with_config(mut self, config: ResponsiveConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a signal producer. Its superseded signals are retired on re-arm.
    #[must_use]
    pub fn on_signal(self, producer: SignalProducer) -> Self {
        self.on_signal_with(producer, true)
    }

    /// Add a signal producer with an explicit dispose-on-rearm flag.
    #[must_use]
    pub fn on_signal_with(mut self, producer: SignalProducer, dispose_on_rearm: bool) -> Self {
        self.signals.push((producer, dispose_on_rearm));
        self
    }

    /// Add a file whose changes count as a signal.
    #[cfg(feature = "watch")]
    #[must_use]
    pub fn watch_file(mut self, path: impl AsRef<Path>) -> Self {
        self.files.push(path.as_ref().to_path_buf());
        self
    }

    /// Add a requirement. Requirements are evaluated in the order added.
    #[must_use]
    pub fn require<R: Requirement>(mut self, requirement: R) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Add a synchronous predicate as a requirement.
    #[must_use]
    pub fn require_fn<F>(self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.require(requirement::from_fn(name, predicate))
    }

    /// Set the debounce window.
    #[must_use]
    pub const fn debounce(mut self, duration: Duration) -> Self {
        self.config.debounce = duration;
        self
    }

    /// Set the rebuild strategy used by [`build_reloadable`](Self::build_reloadable).
    #[must_use]
    pub const fn strategy(mut self, strategy: RebuildStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Spawn timers and detached tasks on `runtime` instead of the current one.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Whether the reconciler disposes the process on disposal (default `true`).
    #[must_use]
    pub const fn owns_process(mut self, owns: bool) -> Self {
        self.owns_process = owns;
        self
    }

    /// Assemble a self-invalidating artifact.
    ///
    /// Requirements do not apply to reloadables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`], a producer's [`Error::SubscriptionFailed`],
    /// or [`Error::BuildFailed`] if an eager first build fails.
    pub async fn build_reloadable<T, F, Fut>(self, builder: F) -> Result<Reloadable<T>>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        let runtime = self.resolve_runtime()?;
        let config = self.config;
        let producer = self.producer()?;

        let coordinator = AsyncRebuildCoordinator::initialise(config.strategy, builder).await?;
        debug!(strategy = %config.strategy, debounce_ms = config.debounce.as_millis(), "assembled reloadable");
        Reloadable::assemble(runtime, coordinator, producer, config.debounce)
    }

    /// Assemble a reconciler that owns `process`.
    ///
    /// Nothing is started until the host calls [`Reconciler::start`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] or a producer's [`Error::SubscriptionFailed`].
    pub fn build_reconciler<P: ManagedProcess>(self, process: P) -> Result<Reconciler<P>> {
        self.build_shared_reconciler(Arc::new(process))
    }

    /// Assemble a reconciler for a process shared with the host.
    ///
    /// The process is still disposed with the reconciler unless
    /// [`owns_process(false)`](Self::owns_process) was set.
    ///
    /// # Errors
    ///
    /// Same as [`build_reconciler`](Self::build_reconciler).
    pub fn build_shared_reconciler<P: ManagedProcess>(
        self,
        process: Arc<P>,
    ) -> Result<Reconciler<P>> {
        let runtime = self.resolve_runtime()?;
        let debounce = self.config.debounce;
        let owns_process = self.owns_process;
        let requirements = self.requirements.clone();
        let producer = self.producer()?;

        debug!(
            requirements = requirements.len(),
            debounce_ms = debounce.as_millis(),
            owns_process,
            "assembled reconciler"
        );
        Reconciler::with_options(runtime, process, requirements, producer, debounce, owns_process)
    }

    fn resolve_runtime(&self) -> Result<Handle> {
        match &self.runtime {
            Some(runtime) => Ok(runtime.clone()),
            None => Handle::try_current().map_err(|_| Error::NoRuntime),
        }
    }

    /// Merge every configured signal into one producer.
    fn producer(self) -> Result<SignalProducer> {
        let signals = self.signals;

        #[cfg(feature = "watch")]
        let signals = {
            let mut signals = signals;
            if !self.files.is_empty() {
                signals.push((crate::signal::watch_files(&self.files)?, true));
            }
            signals
        };

        Ok(match signals.len() {
            0 => SignalProducer::never(),
            _ => SignalProducer::compose_with(signals),
        })
    }
}

impl Default for ResponsiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}
