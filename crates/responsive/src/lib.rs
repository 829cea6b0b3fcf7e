//! # responsive
//!
//! Keep a derived resource consistent with configuration that changes
//! asynchronously, without stopping the world on every change and without
//! rebuilding more than necessary.
//!
//! `responsive` is a single-process coordination core built from four pieces:
//!
//! - **Signals** - composable one-shot "something changed" latches, produced on
//!   demand by a [`SignalProducer`]
//! - **Debouncing** - a [`Debouncer`] coalesces a burst of signals into one
//!   trailing notification per quiet window
//! - **Rebuild coordination** - a [`RebuildCoordinator`] (or its async sibling
//!   [`AsyncRebuildCoordinator`]) caches a builder's artifact with at most one
//!   build in flight
//! - **Reconciliation** - a [`Reconciler`] starts and stops a [`ManagedProcess`]
//!   as a [`CompositeRequirement`] becomes satisfied or not
//!
//! Data flows one way:
//!
//! ```text
//! event source -> Signal -> Debouncer -> coordinator.invalidate() | reconciler.reconcile()
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use responsive::{ResponsiveBuilder, RebuildStrategy, SignalProducer};
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let (changed, trigger) = SignalProducer::manual();
//!
//!     let pipeline = ResponsiveBuilder::new()
//!         .on_signal(changed)
//!         .strategy(RebuildStrategy::OnDemand)
//!         .build_reloadable(|| async { Ok(Pipeline::from_config(load().await?)) })
//!         .await?;
//!
//!     let current = pipeline.get().await?;
//!     trigger.fire(); // rebuilt after the debounce window
//!     Ok(())
//! }
//! ```
//!
//! ## Rebuild Strategies
//!
//! | Strategy | Cost paid by | Wasted work |
//! |----------|--------------|-------------|
//! | [`RebuildStrategy::OnDemand`] | First reader after an invalidation | None |
//! | [`RebuildStrategy::OnInvalidate`] | The invalidation | Rebuilds nobody reads |
//!
//! ## Feature Flags
//!
//! | Feature | Description | Default |
//! |---------|-------------|---------|
//! | `serde` | `Serialize`/`Deserialize` for [`ResponsiveConfig`] | No |
//! | `watch` | File-change signals via `notify` | No |
//! | `full` | Enable all features | No |
//!
//! ## Error Handling
//!
//! All errors are reported through the [`Error`] type, which integrates with
//! [`miette`] for rich terminal diagnostics:
//!
//! ```rust,ignore
//! match reconciler.start().await {
//!     Ok(state) => tracing::info!(?state, "worker reconciled"),
//!     Err(e) => eprintln!("{:?}", miette::Report::from(e)),
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

// ============================================================================
// Re-exported Dependencies
// ============================================================================

/// Re-export miette for error handling.
pub use miette;

/// Boxed future returned by [`Requirement`] and [`ManagedProcess`] methods.
pub use futures::future::BoxFuture;

/// Re-export the cancellation token passed to requirements and processes.
pub use tokio_util::sync::CancellationToken;

// ============================================================================
// Core Modules
// ============================================================================

mod error;
pub use error::{BoxError, Error, ProcessAction, Result, SharedError};

pub mod config;
pub use config::ResponsiveConfig;

pub mod signal;
pub use signal::{Signal, SignalProducer, SignalSource, Subscription, Trigger};

pub mod debounce;
pub use debounce::Debouncer;

pub mod coordinator;
pub use coordinator::{AsyncRebuildCoordinator, RebuildCoordinator, RebuildStrategy};

pub mod requirement;
pub use requirement::{CompositeRequirement, Requirement};

pub mod reconciler;
pub use reconciler::{ManagedProcess, ProcessState, Reconciler};

// ============================================================================
// Assembly
// ============================================================================

mod builder;
pub use builder::ResponsiveBuilder;

mod reloadable;
pub use reloadable::Reloadable;
