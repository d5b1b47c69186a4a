//! Session configuration.
//!
//! ## Environment
//!
//! - `ELASTIC_MIGRATION_SPEED`: migration throughput in bytes/s; setting it
//!   counts as a manual override
//! - `ELASTIC_STRATEGY`: `exact`, `exact-conservative`, `exact-aggressive`,
//!   `migrate-all` or `recompute-all`
//! - `ELASTIC_ALPHA`: recomputation scaling factor, overriding the
//!   strategy's default

use serde::{Deserialize, Serialize};

use crate::cost::{CostError, CostModel};
use crate::fingerprint::FingerprintLimits;
use crate::optimizer::Strategy;

/// Default migration throughput in bytes per second.
pub const DEFAULT_MIGRATION_THROUGHPUT_BPS: f64 = 100_000.0;

/// Error type for configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A variable could not be parsed.
    #[error("Invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },
    /// Unrecognized strategy name.
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),
    /// Cost parameters out of range.
    #[error(transparent)]
    Cost(#[from] CostError),
}

/// Where the migration throughput came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThroughputSource {
    /// Built-in default.
    Default,
    /// Supplied by a profiler.
    Profiled,
    /// Set by the user; never replaced by profiling.
    Manual,
}

/// Configuration for a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Migration throughput in bytes per second.
    pub migration_throughput_bps: f64,
    /// Origin of `migration_throughput_bps`.
    pub throughput_source: ThroughputSource,
    /// Selection strategy.
    pub strategy: Strategy,
    /// Explicit α; `None` uses the strategy's default.
    pub alpha: Option<f64>,
    /// Fingerprint traversal bounds.
    pub fingerprint_limits: FingerprintLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            migration_throughput_bps: DEFAULT_MIGRATION_THROUGHPUT_BPS,
            throughput_source: ThroughputSource::Default,
            strategy: Strategy::Exact,
            alpha: None,
            fingerprint_limits: FingerprintLimits::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("ELASTIC_MIGRATION_SPEED") {
            let bps = parse_f64("ELASTIC_MIGRATION_SPEED", &raw)?;
            config.set_manual_throughput(bps)?;
        }
        if let Some(raw) = lookup("ELASTIC_STRATEGY") {
            config.strategy =
                Strategy::from_str(raw.trim()).ok_or(ConfigError::UnknownStrategy(raw))?;
        }
        if let Some(raw) = lookup("ELASTIC_ALPHA") {
            config.alpha = Some(parse_f64("ELASTIC_ALPHA", &raw)?);
        }

        config.cost_model()?;
        Ok(config)
    }

    /// Set the throughput manually; later profiled values are ignored.
    pub fn set_manual_throughput(&mut self, bps: f64) -> Result<(), ConfigError> {
        if !bps.is_finite() || bps <= 0.0 {
            return Err(CostError::InvalidThroughput(bps).into());
        }
        self.migration_throughput_bps = bps;
        self.throughput_source = ThroughputSource::Manual;
        Ok(())
    }

    /// Accept a profiled throughput unless one was set manually.
    ///
    /// Returns whether the value was applied.
    pub fn apply_profiled_throughput(&mut self, bps: f64) -> Result<bool, ConfigError> {
        if self.throughput_source == ThroughputSource::Manual {
            return Ok(false);
        }
        if !bps.is_finite() || bps <= 0.0 {
            return Err(CostError::InvalidThroughput(bps).into());
        }
        self.migration_throughput_bps = bps;
        self.throughput_source = ThroughputSource::Profiled;
        Ok(true)
    }

    /// α in effect.
    pub fn effective_alpha(&self) -> f64 {
        self.alpha.unwrap_or_else(|| self.strategy.default_alpha())
    }

    /// Cost model for the current settings.
    pub fn cost_model(&self) -> Result<CostModel, ConfigError> {
        Ok(CostModel::new(
            self.migration_throughput_bps,
            self.effective_alpha(),
        )?)
    }
}

fn parse_f64(key: &'static str, raw: &str) -> Result<f64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.effective_alpha(), 1.0);
    }

    #[test]
    fn test_env_overrides() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("ELASTIC_MIGRATION_SPEED", "2500"),
            ("ELASTIC_STRATEGY", "exact-conservative"),
        ]))
        .unwrap();
        assert_eq!(config.migration_throughput_bps, 2500.0);
        assert_eq!(config.throughput_source, ThroughputSource::Manual);
        assert_eq!(config.effective_alpha(), 20.0);
    }

    #[test]
    fn test_explicit_alpha_wins() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("ELASTIC_STRATEGY", "exact-aggressive"),
            ("ELASTIC_ALPHA", "3"),
        ]))
        .unwrap();
        assert_eq!(config.effective_alpha(), 3.0);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            SessionConfig::from_lookup(lookup(&[("ELASTIC_MIGRATION_SPEED", "fast")])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            SessionConfig::from_lookup(lookup(&[("ELASTIC_STRATEGY", "greedy")])),
            Err(ConfigError::UnknownStrategy(_))
        ));
        assert!(matches!(
            SessionConfig::from_lookup(lookup(&[("ELASTIC_ALPHA", "0")])),
            Err(ConfigError::Cost(CostError::InvalidAlpha(_)))
        ));
    }

    #[test]
    fn test_manual_throughput_not_replaced_by_profiling() {
        let mut config = SessionConfig::default();
        assert!(config.apply_profiled_throughput(5_000.0).unwrap());
        assert_eq!(config.throughput_source, ThroughputSource::Profiled);

        config.set_manual_throughput(42.0).unwrap();
        assert!(!config.apply_profiled_throughput(9_000.0).unwrap());
        assert_eq!(config.migration_throughput_bps, 42.0);
    }
}
