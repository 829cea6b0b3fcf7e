//! Coordinator for async builders.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::RebuildStrategy;
use crate::error::{BoxError, Error, Result};

type AsyncBuilder<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;
type SharedBuild<T> = Shared<BoxFuture<'static, Result<Arc<T>>>>;

/// Caches the artifact of an async builder.
///
/// With [`RebuildStrategy::OnDemand`] the cache is a shared, not-yet-started
/// build future. Every caller of [`get`](Self::get) awaits the same future, so
/// the builder runs once per invalidation no matter how many callers race,
/// without an explicit lock.
///
/// With [`RebuildStrategy::OnInvalidate`] the artifact lives in an atomic slot;
/// `get` is a lock-free read and `invalidate` rebuilds under an async mutex.
///
/// # Example
///
/// ```rust,ignore
/// let coordinator = AsyncRebuildCoordinator::initialise(RebuildStrategy::OnDemand, || async {
///     Ok(Pipeline::connect(&settings()).await?)
/// })
/// .await?;
///
/// let pipeline = coordinator.get().await?;
/// ```
pub struct AsyncRebuildCoordinator<T> {
    builder: AsyncBuilder<T>,
    slot: Slot<T>,
    generation: AtomicU64,
    builds: Arc<AtomicU64>,
}

enum Slot<T> {
    OnDemand(ArcSwap<SharedBuild<T>>),
    OnInvalidate {
        current: ArcSwap<T>,
        lock: Mutex<()>,
    },
}

impl<T: Send + Sync + 'static> AsyncRebuildCoordinator<T> {
    /// Create a coordinator.
    ///
    /// With [`RebuildStrategy::OnInvalidate`] the builder runs once before this
    /// resolves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BuildFailed`] if the eager build fails.
    pub async fn initialise<F, Fut>(strategy: RebuildStrategy, builder: F) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        let builder: AsyncBuilder<T> = Arc::new(move || builder().boxed());
        let builds = Arc::new(AtomicU64::new(0));

        let slot = match strategy {
            RebuildStrategy::OnDemand => {
                Slot::OnDemand(ArcSwap::from_pointee(pending_build(&builder, &builds)))
            }
            RebuildStrategy::OnInvalidate => {
                let artifact = pending_build(&builder, &builds).await?;
                Slot::OnInvalidate {
                    current: ArcSwap::new(artifact),
                    lock: Mutex::new(()),
                }
            }
        };

        Ok(Self {
            builder,
            slot,
            generation: AtomicU64::new(0),
            builds,
        })
    }

    /// Mark the artifact stale.
    ///
    /// On-demand replaces the cached build with a fresh, unstarted one.
    /// On-invalidate rebuilds now; concurrent invalidations queue and each
    /// runs its own build after the previous finishes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BuildFailed`] if an eager rebuild fails. The previous
    /// artifact keeps being served.
    pub async fn invalidate(&self) -> Result<()> {
        match &self.slot {
            Slot::OnDemand(_) => {
                self.invalidate_deferred();
                Ok(())
            }
            Slot::OnInvalidate { current, lock } => {
                let _guard = lock.lock().await;
                self.generation.fetch_add(1, Ordering::AcqRel);
                let artifact = pending_build(&self.builder, &self.builds).await?;
                current.store(artifact);
                Ok(())
            }
        }
    }

    /// Invalidate without waiting, if the strategy allows it.
    ///
    /// Returns `true` for on-demand, where invalidation only swaps in a new
    /// unstarted build. Returns `false` and does nothing for on-invalidate,
    /// whose invalidation must await a build.
    pub fn invalidate_deferred(&self) -> bool {
        match &self.slot {
            Slot::OnDemand(slot) => {
                self.generation.fetch_add(1, Ordering::AcqRel);
                slot.store(Arc::new(pending_build(&self.builder, &self.builds)));
                debug!("artifact invalidated");
                true
            }
            Slot::OnInvalidate { .. } => false,
        }
    }

    /// The current artifact.
    ///
    /// On-demand awaits the shared build, starting it if nobody has. A failed
    /// build is reported to every caller that awaited it, then replaced so the
    /// next call retries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BuildFailed`] if the awaited build failed.
    pub async fn get(&self) -> Result<Arc<T>> {
        match &self.slot {
            Slot::OnDemand(slot) => {
                let build = slot.load_full();
                let result = (*build).clone().await;
                if result.is_err() {
                    let retry = Arc::new(pending_build(&self.builder, &self.builds));
                    slot.compare_and_swap(&build, retry);
                }
                result
            }
            Slot::OnInvalidate { current, .. } => Ok(current.load_full()),
        }
    }

    /// The artifact if one is ready, without building or waiting.
    #[must_use]
    pub fn peek(&self) -> Option<Arc<T>> {
        match &self.slot {
            Slot::OnDemand(slot) => slot.load().peek().and_then(|r| r.as_ref().ok().cloned()),
            Slot::OnInvalidate { current, .. } => Some(current.load_full()),
        }
    }

    /// The configured strategy.
    #[must_use]
    pub fn strategy(&self) -> RebuildStrategy {
        match &self.slot {
            Slot::OnDemand(_) => RebuildStrategy::OnDemand,
            Slot::OnInvalidate { .. } => RebuildStrategy::OnInvalidate,
        }
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
}

/// A shared build that runs `builder` the first time it is polled.
fn pending_build<T: Send + Sync + 'static>(
    builder: &AsyncBuilder<T>,
    builds: &Arc<AtomicU64>,
) -> SharedBuild<T> {
    let builder = builder.clone();
    let builds = builds.clone();
    async move {
        let build = builds.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(build, "building artifact");
        match builder().await {
            Ok(artifact) => {
                debug!(build, "artifact built");
                Ok(Arc::new(artifact))
            }
            Err(e) => {
                let error = Error::build_failed(e);
                warn!(build, error = %error, "artifact build failed");
                Err(error)
            }
        }
    }
    .boxed()
    .shared()
}

impl<T> fmt::Debug for AsyncRebuildCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategy = match &self.slot {
            Slot::OnDemand(_) => RebuildStrategy::OnDemand,
            Slot::OnInvalidate { .. } => RebuildStrategy::OnInvalidate,
        };
        f.debug_struct("AsyncRebuildCoordinator")
            .field("strategy", &strategy)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .field("builds", &self.builds.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    async fn counter(strategy: RebuildStrategy) -> AsyncRebuildCoordinator<u32> {
        let next = Arc::new(AtomicU32::new(0));
        AsyncRebuildCoordinator::initialise(strategy, move || {
            let next = next.clone();
            async move { Ok::<_, BoxError>(next.fetch_add(1, Ordering::SeqCst) + 1) }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_on_demand_is_lazy() {
        let c = counter(RebuildStrategy::OnDemand).await;
        assert_eq!(c.builds(), 0);
        assert!(c.peek().is_none());
        assert_eq!(*c.get().await.unwrap(), 1);
        assert_eq!(*c.peek().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deferred_invalidate_only_on_demand() {
        let c = counter(RebuildStrategy::OnDemand).await;
        c.get().await.unwrap();
        assert!(c.invalidate_deferred());
        assert!(c.peek().is_none());
        assert_eq!(*c.get().await.unwrap(), 2);

        let c = counter(RebuildStrategy::OnInvalidate).await;
        assert!(!c.invalidate_deferred());
        assert_eq!(c.generation(), 0);
        assert_eq!(*c.get().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_on_invalidate_rebuilds_in_invalidate() {
        let c = counter(RebuildStrategy::OnInvalidate).await;
        assert_eq!(c.builds(), 1);
        c.invalidate().await.unwrap();
        assert_eq!(c.builds(), 2);
        assert_eq!(*c.get().await.unwrap(), 2);
        assert_eq!(c.strategy(), RebuildStrategy::OnInvalidate);
    }
}
