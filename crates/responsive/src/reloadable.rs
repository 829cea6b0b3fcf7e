//! An artifact that rebuilds itself when its signal fires.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{trace, warn};

use crate::coordinator::AsyncRebuildCoordinator;
use crate::debounce::Debouncer;
use crate::error::Result;
use crate::signal::SignalProducer;

/// A cached artifact wired to a debounced signal.
///
/// Every debounced signal invalidates the underlying
/// [`AsyncRebuildCoordinator`]. With the on-demand strategy the next
/// [`get`](Self::get) rebuilds; with on-invalidate the rebuild runs in a
/// detached task and `get` keeps serving the previous artifact until it
/// completes.
///
/// Dropping the reloadable disposes it.
pub struct Reloadable<T> {
    coordinator: Arc<AsyncRebuildCoordinator<T>>,
    debouncer: Debouncer,
    producer: SignalProducer,
}

impl<T: Send + Sync + 'static> Reloadable<T> {
    pub(crate) fn assemble(
        runtime: Handle,
        coordinator: AsyncRebuildCoordinator<T>,
        producer: SignalProducer,
        quiet: Duration,
    ) -> Result<Self> {
        let coordinator = Arc::new(coordinator);
        let weak: Weak<AsyncRebuildCoordinator<T>> = Arc::downgrade(&coordinator);
        let spawner = runtime.clone();

        let debouncer = Debouncer::with_runtime(runtime, producer.clone(), quiet, move || {
            let Some(coordinator) = weak.upgrade() else {
                return;
            };
            if coordinator.invalidate_deferred() {
                trace!("artifact invalidated by signal");
                return;
            }
            spawner.spawn(async move {
                if let Err(e) = coordinator.invalidate().await {
                    warn!(error = %e, "signal-triggered rebuild failed");
                }
            });
        })?;

        Ok(Self {
            coordinator,
            debouncer,
            producer,
        })
    }

    /// The current artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BuildFailed`](crate::Error::BuildFailed) if the build
    /// this call awaited failed.
    pub async fn get(&self) -> Result<Arc<T>> {
        self.coordinator.get().await
    }

    /// Invalidate now, without waiting for a signal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BuildFailed`](crate::Error::BuildFailed) if an eager
    /// rebuild failed.
    pub async fn invalidate(&self) -> Result<()> {
        self.coordinator.invalidate().await
    }

    /// The underlying coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &AsyncRebuildCoordinator<T> {
        &self.coordinator
    }

    /// Returns `true` while a debounced invalidation is scheduled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }
}

impl<T> Reloadable<T> {
    /// Stop listening for signals and release the producer's subscription.
    ///
    /// The last artifact stays readable. Idempotent.
    pub fn dispose(&self) {
        self.debouncer.dispose();
        self.producer.close();
    }
}

impl<T> Drop for Reloadable<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T> fmt::Debug for Reloadable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reloadable")
            .field("coordinator", &self.coordinator)
            .field("debouncer", &self.debouncer)
            .finish_non_exhaustive()
    }
}
