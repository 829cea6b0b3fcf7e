//! Coordinator for synchronous builders.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::RebuildStrategy;
use crate::error::{BoxError, Error, Result};

type Builder<T> = Box<dyn Fn() -> Result<T, BoxError> + Send + Sync + 'static>;

/// Caches the artifact of a synchronous builder.
///
/// Reads of a populated cache never take a lock. Builds are serialized by an
/// internal mutex, so at most one build runs at a time.
///
/// # Example
///
/// ```rust,ignore
/// let coordinator = RebuildCoordinator::initialise(RebuildStrategy::OnDemand, || {
///     Ok(Pipeline::from_config(&load()?))
/// })?;
///
/// let pipeline = coordinator.get()?;
/// coordinator.invalidate()?;
/// ```
pub struct RebuildCoordinator<T> {
    builder: Builder<T>,
    strategy: RebuildStrategy,
    build_lock: Mutex<()>,
    /// Bumped by every invalidation. A cached entry from an older generation
    /// is stale.
    generation: AtomicU64,
    cached: ArcSwapOption<Cached<T>>,
    builds: AtomicU64,
}

struct Cached<T> {
    generation: u64,
    artifact: Arc<T>,
}

impl<T: Send + Sync + 'static> RebuildCoordinator<T> {
    /// Create a coordinator.
    ///
    /// With [`RebuildStrategy::OnInvalidate`] the builder runs once before this
    /// returns, so `get()` never finds the cache empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BuildFailed`] if the eager build fails.
    pub fn initialise<F>(strategy: RebuildStrategy, builder: F) -> Result<Self>
    where
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let coordinator = Self {
            builder: Box::new(builder),
            strategy,
            build_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            cached: ArcSwapOption::empty(),
            builds: AtomicU64::new(0),
        };
        if strategy == RebuildStrategy::OnInvalidate {
            let _guard = coordinator.build_lock.lock();
            coordinator.build_and_store(0)?;
        }
        Ok(coordinator)
    }

    /// Mark the artifact stale.
    ///
    /// On-demand drops the cache; on-invalidate rebuilds now and swaps the
    /// new artifact in. A failed eager rebuild keeps serving the previous
    /// artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BuildFailed`] if an eager rebuild fails.
    pub fn invalidate(&self) -> Result<()> {
        match self.strategy {
            RebuildStrategy::OnDemand => {
                self.generation.fetch_add(1, Ordering::AcqRel);
                self.cached.store(None);
                debug!("artifact invalidated");
                Ok(())
            }
            RebuildStrategy::OnInvalidate => {
                let _guard = self.build_lock.lock();
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                self.build_and_store(generation).map(drop)
            }
        }
    }

    /// The current artifact, building it first if the cache is empty.
    ///
    /// Concurrent callers on an empty cache wait for a single build and all
    /// receive the same artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BuildFailed`] if the build this call waited on failed.
    pub fn get(&self) -> Result<Arc<T>> {
        if let Some(artifact) = self.fresh() {
            return Ok(artifact);
        }

        let _guard = self.build_lock.lock();
        if let Some(artifact) = self.fresh() {
            return Ok(artifact);
        }
        let generation = self.generation.load(Ordering::Acquire);
        self.build_and_store(generation)
    }

    /// The cached artifact, without building.
    #[must_use]
    pub fn peek(&self) -> Option<Arc<T>> {
        self.fresh()
    }

    /// The configured strategy.
    #[must_use]
    pub const fn strategy(&self) -> RebuildStrategy {
        self.strategy
    }

    /// Number of invalidations so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of times the builder has run, successful or not.
    #[must_use]
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Acquire)
    }

    fn fresh(&self) -> Option<Arc<T>> {
        let cached = self.cached.load_full()?;
        let current = match self.strategy {
            RebuildStrategy::OnDemand => cached.generation == self.generation.load(Ordering::Acquire),
            RebuildStrategy::OnInvalidate => true,
        };
        current.then(|| cached.artifact.clone())
    }

    /// Run the builder and cache its artifact. Caller holds `build_lock`.
    fn build_and_store(&self, generation: u64) -> Result<Arc<T>> {
        let build = self.builds.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(build, strategy = %self.strategy, "building artifact");

        let artifact = match (self.builder)() {
            Ok(artifact) => Arc::new(artifact),
            Err(e) => {
                let error = Error::build_failed(e);
                warn!(build, error = %error, "artifact build failed");
                return Err(error);
            }
        };

        self.cached.store(Some(Arc::new(Cached {
            generation,
            artifact: artifact.clone(),
        })));
        debug!(build, "artifact built");
        Ok(artifact)
    }
}

impl<T> fmt::Debug for RebuildCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebuildCoordinator")
            .field("strategy", &self.strategy)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .field("builds", &self.builds.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
