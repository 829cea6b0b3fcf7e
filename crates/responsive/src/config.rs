//! Runtime configuration.
//!
//! [`ResponsiveConfig`] holds the two tuning knobs of the crate: the debounce
//! quiet window and the rebuild strategy. It can be built in code, loaded from
//! the environment, or (with the `serde` feature) deserialized from a file.
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `RESPONSIVE_DEBOUNCE_MS` | [`debounce`](ResponsiveConfig::debounce) | `500` |
//! | `RESPONSIVE_REBUILD_STRATEGY` | [`strategy`](ResponsiveConfig::strategy) | `on-invalidate` |
//!
//! ```rust,ignore
//! let config = ResponsiveConfig::from_env()?.with_debounce(Duration::from_millis(250));
//! ```

use std::time::Duration;

use crate::coordinator::RebuildStrategy;
use crate::error::{Error, Result};

/// Environment variable holding the debounce window in milliseconds.
pub const DEBOUNCE_ENV: &str = "RESPONSIVE_DEBOUNCE_MS";

/// Environment variable holding the rebuild strategy.
pub const STRATEGY_ENV: &str = "RESPONSIVE_REBUILD_STRATEGY";

/// Default debounce quiet window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Debounce window and rebuild strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResponsiveConfig {
    /// Quiet window a signal burst must settle for before acting.
    #[cfg_attr(feature = "serde", serde(rename = "debounce_ms", with = "duration_ms"))]
    pub debounce: Duration,

    /// When rebuilds run.
    pub strategy: RebuildStrategy,
}

impl Default for ResponsiveConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            strategy: RebuildStrategy::default(),
        }
    }
}

impl ResponsiveConfig {
    /// Set the debounce window.
    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the rebuild strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: RebuildStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Load from `RESPONSIVE_*` environment variables, defaulting unset ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a malformed value, or
    /// [`Error::Multiple`] if several are malformed.
    pub fn from_env() -> Result<Self> {
        Self::load(|key| match std::env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(Error::invalid_config(
                key,
                "environment variable contains invalid UTF-8",
                None,
            )),
        })
    }

    /// Load using `lookup` in place of the environment.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::load(|key| Ok(lookup(key)))
    }

    fn load<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Option<String>>,
    {
        let mut config = Self::default();
        let mut errors = Vec::new();

        match lookup(DEBOUNCE_ENV) {
            Ok(Some(raw)) => match raw.trim().parse::<u64>() {
                Ok(ms) => config.debounce = Duration::from_millis(ms),
                Err(e) => errors.push(Error::invalid_config(
                    DEBOUNCE_ENV,
                    format!("'{raw}' is not a whole number of milliseconds: {e}"),
                    Some("Use a non-negative integer, e.g. 500".to_string()),
                )),
            },
            Ok(None) => {}
            Err(e) => errors.push(e),
        }

        match lookup(STRATEGY_ENV) {
            Ok(Some(raw)) => match raw.parse::<RebuildStrategy>() {
                Ok(strategy) => config.strategy = strategy,
                Err(Error::InvalidConfig { message, help, .. }) => {
                    errors.push(Error::invalid_config(STRATEGY_ENV, message, help));
                }
                Err(e) => errors.push(e),
            },
            Ok(None) => {}
            Err(e) => errors.push(e),
        }

        Error::multiple(errors)?;
        Ok(config)
    }
}

#[cfg(feature = "serde")]
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ResponsiveConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ResponsiveConfig::default());
        assert_eq!(config.debounce, Duration::from_millis(500));
        assert_eq!(config.strategy, RebuildStrategy::OnInvalidate);
    }

    #[test]
    fn test_values_from_lookup() {
        let config = ResponsiveConfig::from_lookup(lookup(&[
            (DEBOUNCE_ENV, "250"),
            (STRATEGY_ENV, "on-demand"),
        ]))
        .unwrap();
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.strategy, RebuildStrategy::OnDemand);
    }

    #[test]
    fn test_errors_accumulate() {
        let err = ResponsiveConfig::from_lookup(lookup(&[
            (DEBOUNCE_ENV, "soon"),
            (STRATEGY_ENV, "whenever"),
        ]))
        .unwrap_err();
        match err {
            Error::Multiple { errors } => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].to_string().contains(DEBOUNCE_ENV));
                assert!(errors[1].to_string().contains(STRATEGY_ENV));
            }
            other => panic!("expected multiple errors, got {other}"),
        }
    }

    #[test]
    fn test_single_error_is_not_wrapped() {
        let err = ResponsiveConfig::from_lookup(lookup(&[(DEBOUNCE_ENV, "-1")])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref key, .. } if key == DEBOUNCE_ENV));
    }

    #[test]
    fn test_fluent_setters() {
        let config = ResponsiveConfig::default()
            .with_debounce(Duration::from_secs(2))
            .with_strategy(RebuildStrategy::OnDemand);
        assert_eq!(config.debounce, Duration::from_secs(2));
        assert_eq!(config.strategy, RebuildStrategy::OnDemand);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_milliseconds() {
        let config: ResponsiveConfig =
            toml::from_str("debounce_ms = 750\nstrategy = \"on-demand\"\n").unwrap();
        assert_eq!(config.debounce, Duration::from_millis(750));
        assert_eq!(config.strategy, RebuildStrategy::OnDemand);

        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["debounce_ms"], 750);

        let partial: ResponsiveConfig = toml::from_str("").unwrap();
        assert_eq!(partial, ResponsiveConfig::default());
    }
}
