//! Error types for signal, rebuild and reconciliation operations.
//!
//! This module contains the [`Error`] enum and related functionality for
//! reporting failures with rich diagnostics via [`miette`].
//!
//! # Error Variants
//!
//! | Variant | When It Occurs |
//! |---------|----------------|
//! | [`Error::BuildFailed`] | An artifact builder returned an error |
//! | [`Error::RequirementFailed`] | A requirement check faulted |
//! | [`Error::SubscriptionFailed`] | An external event-source registration failed |
//! | [`Error::ProcessFailed`] | A managed process failed to start or stop |
//! | [`Error::ReleaseFailed`] | A single owned resource failed to release |
//! | [`Error::DisposeFailed`] | One or more child resources failed to dispose |
//! | [`Error::NoRuntime`] | No tokio runtime was available at construction |
//! | [`Error::Disposed`] | The component was already disposed |
//! | [`Error::Cancelled`] | An evaluation was cancelled before it completed |
//! | [`Error::InvalidConfig`] | A configuration value could not be parsed |
//! | [`Error::Multiple`] | Several configuration values were rejected |
//!
//! # Sharing Failures
//!
//! `Error` is [`Clone`]. A single failed build is awaited by every caller
//! that joined it, so every underlying cause is held behind an [`Arc`]:
//!
//! ```rust,ignore
//! match pipeline.get().await {
//!     Ok(artifact) => serve(&artifact),
//!     Err(e) => eprintln!("{:?}", miette::Report::from(e)),
//! }
//! ```

use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error as ThisError;

/// Boxed error returned by user-supplied builders, checks and subscriptions.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared, cloneable cause attached to an [`Error`].
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The managed-process action that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessAction {
    /// Starting the inner process.
    Start,
    /// Stopping the inner process.
    Stop,
}

impl Display for ProcessAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::Stop => f.write_str("stop"),
        }
    }
}

/// Errors reported by signals, coordinators, requirements and reconcilers.
///
/// # Diagnostic Codes
///
/// | Code | Meaning |
/// |------|---------|
/// | `responsive::build_failed` | Builder returned an error, nothing was cached |
/// | `responsive::requirement_failed` | Requirement faulted, treated as unsatisfied |
/// | `responsive::subscription_failed` | Event-source registration failed |
/// | `responsive::process_failed` | Inner start/stop failed |
/// | `responsive::release_failed` | Owned resource failed to release |
/// | `responsive::dispose_failed` | Child disposal failed |
/// | `responsive::no_runtime` | Constructed outside a tokio runtime |
/// | `responsive::disposed` | Component already disposed |
/// | `responsive::cancelled` | Evaluation cancelled, nothing acted on |
/// | `responsive::invalid_config` | Bad configuration value |
/// | `responsive::multiple_errors` | Several configuration errors |
#[derive(Debug, Clone, ThisError, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    /// The builder failed to produce an artifact.
    ///
    /// The failure is delivered only to callers of the failed build; the next
    /// access retries the builder.
    #[error("artifact build failed: {source}")]
    #[diagnostic(
        code(responsive::build_failed),
        help("The failure was not cached. The next access runs the builder again.")
    )]
    BuildFailed {
        /// The builder's error.
        #[source]
        source: SharedError,
    },

    /// A requirement check faulted while being evaluated.
    #[error("requirement '{requirement}' could not be evaluated: {source}")]
    #[diagnostic(
        code(responsive::requirement_failed),
        help("Unverifiable requirements are treated as unsatisfied; the process will not be started.")
    )]
    RequirementFailed {
        /// Name of the faulting requirement.
        requirement: String,
        /// The check's error.
        #[source]
        source: SharedError,
    },

    /// Registering with an external event source failed.
    ///
    /// This is fatal to the producer that attempted the registration.
    #[error("failed to subscribe to change source: {source}")]
    #[diagnostic(
        code(responsive::subscription_failed),
        help("The signal producer is unusable. Create a new producer once the event source is available.")
    )]
    SubscriptionFailed {
        /// The registration error.
        #[source]
        source: SharedError,
    },

    /// The managed process failed to start or stop.
    #[error("managed process failed to {action}: {source}")]
    #[diagnostic(
        code(responsive::process_failed),
        help("The process state was left unchanged. The next reconcile will retry.")
    )]
    ProcessFailed {
        /// Which action failed.
        action: ProcessAction,
        /// The process error.
        #[source]
        source: SharedError,
    },

    /// An owned resource failed to release.
    #[error("failed to release {resource}: {source}")]
    #[diagnostic(code(responsive::release_failed))]
    ReleaseFailed {
        /// What was being released.
        resource: String,
        /// The release error.
        #[source]
        source: SharedError,
    },

    /// One or more children failed to dispose.
    ///
    /// Every child is disposed regardless; all failures are reported together.
    #[error("{} resource(s) failed to dispose", errors.len())]
    #[diagnostic(code(responsive::dispose_failed))]
    DisposeFailed {
        /// Every disposal failure.
        #[related]
        errors: Vec<Error>,
    },

    /// A tokio runtime was required but none was available.
    #[error("no tokio runtime available")]
    #[diagnostic(
        code(responsive::no_runtime),
        help("Construct inside a tokio runtime or pass a runtime handle explicitly")
    )]
    NoRuntime,

    /// The component has been disposed.
    #[error("component has been disposed")]
    #[diagnostic(
        code(responsive::disposed),
        help("Create a new instance if you need to continue")
    )]
    Disposed,

    /// An evaluation was cancelled before it completed.
    ///
    /// No action was taken on its behalf.
    #[error("evaluation was cancelled")]
    #[diagnostic(code(responsive::cancelled))]
    Cancelled,

    /// A configuration value could not be parsed.
    #[error("invalid configuration value for {key}: {message}")]
    #[diagnostic(code(responsive::invalid_config))]
    InvalidConfig {
        /// The configuration key.
        key: String,
        /// Why the value was rejected.
        message: String,
        /// Suggested fix.
        #[help]
        help: Option<String>,
    },

    /// Several configuration values were rejected.
    #[error("{} configuration error(s) occurred", errors.len())]
    #[diagnostic(
        code(responsive::multiple_errors),
        help("Fix each of the errors listed below")
    )]
    Multiple {
        /// Every configuration error.
        #[related]
        errors: Vec<Error>,
    },
}

impl Error {
    /// Create a new `BuildFailed` error.
    pub fn build_failed(source: impl Into<BoxError>) -> Self {
        Self::BuildFailed {
            source: Arc::from(source.into()),
        }
    }

    /// Create a new `RequirementFailed` error.
    pub fn requirement_failed(requirement: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::RequirementFailed {
            requirement: requirement.into(),
            source: Arc::from(source.into()),
        }
    }

    /// Create a new `SubscriptionFailed` error.
    pub fn subscription_failed(source: impl Into<BoxError>) -> Self {
        Self::SubscriptionFailed {
            source: Arc::from(source.into()),
        }
    }

    /// Create a new `ProcessFailed` error.
    pub fn process_failed(action: ProcessAction, source: impl Into<BoxError>) -> Self {
        Self::ProcessFailed {
            action,
            source: Arc::from(source.into()),
        }
    }

    /// Create a new `ReleaseFailed` error.
    pub fn release_failed(resource: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ReleaseFailed {
            resource: resource.into(),
            source: Arc::from(source.into()),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(
        key: impl Into<String>,
        message: impl Into<String>,
        help: Option<String>,
    ) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.into(),
            help,
        }
    }

    /// Collapse accumulated disposal errors into a result.
    ///
    /// Returns `Ok(())` when `errors` is empty.
    pub fn from_dispose_errors(errors: Vec<Self>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self::DisposeFailed { errors })
        }
    }

    /// Collapse accumulated configuration errors.
    ///
    /// A single error is returned as is.
    pub fn multiple(mut errors: Vec<Self>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple { errors }),
        }
    }

    /// Returns `true` if this error came from an artifact builder.
    #[must_use]
    pub const fn is_build_failure(&self) -> bool {
        matches!(self, Self::BuildFailed { .. })
    }
}
