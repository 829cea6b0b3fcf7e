//! Cached artifacts rebuilt on invalidation.
//!
//! A rebuild coordinator owns a builder function and the artifact it last
//! produced. Two strategies share one contract:
//!
//! | Strategy | `invalidate()` | `get()` |
//! |----------|----------------|---------|
//! | [`RebuildStrategy::OnDemand`] | Drops the cached artifact | Builds once if empty, then serves the cache |
//! | [`RebuildStrategy::OnInvalidate`] | Builds and swaps in the new artifact | Lock-free read |
//!
//! On-demand defers build cost to the first reader after an invalidation and
//! skips rebuilds nobody reads. On-invalidate keeps the read path free of
//! latency but may rebuild speculatively.
//!
//! [`RebuildCoordinator`] runs a synchronous builder; [`AsyncRebuildCoordinator`]
//! runs an async one and shares a single in-flight build between every caller
//! awaiting it.
//!
//! A failed build is never cached. Only the callers that joined it see the
//! error and the next access runs the builder again.

mod blocking;
mod shared;

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

pub use blocking::RebuildCoordinator;
pub use shared::AsyncRebuildCoordinator;

use crate::error::Error;

/// When a coordinator runs its builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum RebuildStrategy {
    /// Build lazily on the first `get()` after an invalidation.
    OnDemand,
    /// Build eagerly inside `invalidate()`.
    #[default]
    OnInvalidate,
}

impl RebuildStrategy {
    /// The strategy's configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OnDemand => "on-demand",
            Self::OnInvalidate => "on-invalidate",
        }
    }
}

impl Display for RebuildStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RebuildStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "on-demand" | "ondemand" | "lazy" => Ok(Self::OnDemand),
            "on-invalidate" | "oninvalidate" | "eager" => Ok(Self::OnInvalidate),
            other => Err(Error::invalid_config(
                "strategy",
                format!("unknown rebuild strategy '{other}'"),
                Some("Expected one of: on-demand, on-invalidate".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "on-demand".parse::<RebuildStrategy>().unwrap(),
            RebuildStrategy::OnDemand
        );
        assert_eq!(
            "On_Invalidate".parse::<RebuildStrategy>().unwrap(),
            RebuildStrategy::OnInvalidate
        );
        assert_eq!("lazy".parse::<RebuildStrategy>().unwrap(), RebuildStrategy::OnDemand);
    }

    #[test]
    fn test_strategy_parse_error() {
        let err = "sometimes".parse::<RebuildStrategy>().unwrap_err();
        assert!(err.to_string().contains("sometimes"));
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_strategy_display_round_trips() {
        for strategy in [RebuildStrategy::OnDemand, RebuildStrategy::OnInvalidate] {
            assert_eq!(strategy.to_string().parse::<RebuildStrategy>().unwrap(), strategy);
        }
        assert_eq!(RebuildStrategy::default(), RebuildStrategy::OnInvalidate);
    }
}
