//! Async preconditions for running a managed process.
//!
//! A [`Requirement`] is an async boolean check. A [`CompositeRequirement`] is
//! an ordered list of them evaluated with short-circuit AND: evaluation stops
//! at the first check that is not satisfied, so cheap checks belong first.
//!
//! ```rust,ignore
//! let requirements = CompositeRequirement::new()
//!     .with(requirement::from_fn("feature-enabled", || flags.enabled("worker")))
//!     .with(requirement::from_async("queue-reachable", |cancel| async move {
//!         queue.ping(&cancel).await.map(|_| true).map_err(Into::into)
//!     }));
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{BoxError, Error, Result};

/// An async boolean precondition.
pub trait Requirement: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &str {
        "requirement"
    }

    /// Evaluate the check.
    ///
    /// `cancel` is cancelled when the owning component is disposed; long
    /// checks should give up when it fires.
    fn is_satisfied<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<bool, BoxError>>;

    /// Release resources held by the check.
    fn dispose(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// A requirement backed by a synchronous predicate.
pub fn from_fn<F>(name: impl Into<String>, predicate: F) -> impl Requirement
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    FnRequirement {
        name: name.into(),
        predicate: Some(predicate),
    }
}

/// A requirement backed by an async predicate.
pub fn from_async<F, Fut>(name: impl Into<String>, predicate: F) -> impl Requirement
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
{
    AsyncRequirement {
        name: name.into(),
        predicate,
    }
}

/// A requirement that is always satisfied.
#[must_use]
pub fn always() -> impl Requirement {
    FnRequirement::<fn() -> bool> {
        name: "always".to_string(),
        predicate: None,
    }
}

struct FnRequirement<F> {
    name: String,
    predicate: Option<F>,
}

impl<F> Requirement for FnRequirement<F>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn is_satisfied<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<bool, BoxError>> {
        let satisfied = self.predicate.as_ref().is_none_or(|p| p());
        futures::future::ready(Ok(satisfied)).boxed()
    }
}

struct AsyncRequirement<F> {
    name: String,
    predicate: F,
}

impl<F, Fut> Requirement for AsyncRequirement<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn is_satisfied<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<bool, BoxError>> {
        (self.predicate)(cancel.clone()).boxed()
    }
}

/// Ordered short-circuit AND of requirements.
///
/// An empty composite is vacuously satisfied.
#[derive(Clone, Default)]
pub struct CompositeRequirement {
    children: Vec<Arc<dyn Requirement>>,
}

impl CompositeRequirement {
    /// An empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a requirement.
    #[must_use]
    pub fn with<R: Requirement>(mut self, requirement: R) -> Self {
        self.push(requirement);
        self
    }

    /// Append a requirement in place.
    pub fn push<R: Requirement>(&mut self, requirement: R) {
        self.children.push(Arc::new(requirement));
    }

    /// Append an already-shared requirement.
    pub fn push_shared(&mut self, requirement: Arc<dyn Requirement>) {
        self.children.push(requirement);
    }

    /// Number of child requirements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Returns `true` if there are no child requirements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Evaluate the children in order, stopping at the first unsatisfied one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires before every needed child
    /// has answered, or [`Error::RequirementFailed`] naming the first child
    /// whose check faulted. Later children are not evaluated.
    pub async fn evaluate(&self, cancel: &CancellationToken) -> Result<bool> {
        for child in &self.children {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let satisfied = child.is_satisfied(cancel).await.map_err(|e| {
                if cancel.is_cancelled() {
                    Error::Cancelled
                } else {
                    Error::requirement_failed(child.name(), e)
                }
            })?;
            trace!(requirement = child.name(), satisfied, "requirement evaluated");
            if !satisfied {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Dispose every child.
    ///
    /// A failing child does not stop the others from being disposed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DisposeFailed`] listing every child that failed.
    pub fn dispose_all(&self) -> Result<()> {
        let errors = self
            .children
            .iter()
            .filter_map(|child| {
                child
                    .dispose()
                    .err()
                    .map(|e| Error::release_failed(child.name(), e))
            })
            .collect();
        Error::from_dispose_errors(errors)
    }
}

impl Requirement for CompositeRequirement {
    fn name(&self) -> &str {
        "composite"
    }

    fn is_satisfied<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<bool, BoxError>> {
        async move { self.evaluate(cancel).await.map_err(Into::into) }.boxed()
    }

    fn dispose(&self) -> Result<(), BoxError> {
        self.dispose_all().map_err(Into::into)
    }
}

impl fmt::Debug for CompositeRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.children.iter().map(|c| c.name()).collect();
        f.debug_struct("CompositeRequirement")
            .field("children", &names)
            .finish()
    }
}
