//! Signals backed by cancellation tokens.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::latch::Latch;
use super::{Signal, SignalProducer, SignalSource, Subscription};
use crate::error::{Error, Result};

struct CancellationSource<F> {
    factory: F,
    runtime: Handle,
}

impl<F> SignalSource for CancellationSource<F>
where
    F: Fn() -> Option<CancellationToken> + Send + Sync + 'static,
{
    fn signal(&self) -> Result<Signal> {
        let Some(token) = (self.factory)() else {
            return Ok(Signal::never());
        };
        if token.is_cancelled() {
            return Ok(Signal::from_latch(Arc::new(Latch::fired())));
        }

        let latch = Arc::new(Latch::new());
        let weak = Arc::downgrade(&latch);
        let task = self.runtime.spawn(async move {
            token.cancelled().await;
            if let Some(latch) = weak.upgrade() {
                trace!("cancellation token fired signal");
                latch.fire();
            }
        });
        let abort = task.abort_handle();
        latch.attach(Subscription::new(move || abort.abort()));

        Ok(Signal::from_latch(latch))
    }
}

impl SignalProducer {
    /// A producer whose signals fire when a cancellation token is cancelled.
    ///
    /// `factory` is called for every signal request. A token that is already
    /// cancelled yields an already-changed signal; `None` yields a signal that
    /// never fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] if called outside a tokio runtime.
    pub fn from_cancellation<F>(factory: F) -> Result<Self>
    where
        F: Fn() -> Option<CancellationToken> + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Ok(Self::from_cancellation_with(runtime, factory))
    }

    /// Like [`from_cancellation`](Self::from_cancellation) with an explicit runtime.
    pub fn from_cancellation_with<F>(runtime: Handle, factory: F) -> Self
    where
        F: Fn() -> Option<CancellationToken> + Send + Sync + 'static,
    {
        Self::new(CancellationSource { factory, runtime })
    }
}
