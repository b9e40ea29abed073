//! Monitor configuration and validation.

use std::time::Duration;

use thiserror::Error;

/// Default refresh interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
/// Default anomaly threshold (10%).
pub const DEFAULT_THRESHOLD: f64 = 0.10;
/// Default flag time-to-live.
pub const DEFAULT_FLAG_TTL: Duration = Duration::from_secs(10);
/// Default number of consecutive live failures before hybrid mode.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
/// Default bound on a single live fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(8);
/// Default bound on delivering one update to one output.
pub const DEFAULT_OUTPUT_TIMEOUT: Duration = Duration::from_secs(2);
/// Default chance per tick of retrying live while in hybrid mode.
pub const DEFAULT_HYBRID_RETRY_PROBABILITY: f64 = 0.10;
/// Default synthetic perturbation bounds (0.1% to 1.5%).
pub const DEFAULT_PERTURBATION: (f64, f64) = (0.001, 0.015);
/// Default number of values kept per key for trends.
pub const DEFAULT_HISTORY_LEN: usize = 60;

/// Errors reported when a configuration is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("at least one tracked key is required")]
    NoKeys,

    #[error("tracked key `{0}` is empty or listed twice")]
    InvalidKey(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("threshold must be a finite, non-negative fraction (got {0})")]
    InvalidThreshold(f64),

    #[error("max_consecutive_failures must be at least 1")]
    ZeroFailures,

    #[error("hybrid retry probability must be within [0, 1] (got {0})")]
    InvalidProbability(f64),

    #[error("perturbation bounds must satisfy 0 <= min <= max < 1 (got {min}..{max})")]
    InvalidPerturbation { min: f64, max: f64 },

    #[error("history length must be at least 2")]
    HistoryTooShort,

    #[error("a rate provider is required")]
    NoProvider,
}

/// Everything a monitor session needs to know, with named, typed fields.
///
/// Use [`MonitorConfig::default`] and override what you need, or go through
/// [`crate::Monitor::builder`], which validates on `build()`.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Currency or pair codes to track. Order is preserved for display.
    pub keys: Vec<String>,
    /// Time between ticks.
    pub interval: Duration,
    /// Anomaly threshold as a fraction; changes strictly above it are flagged.
    pub threshold: f64,
    /// How long a raised flag stays active.
    pub flag_ttl: Duration,
    /// Consecutive live failures before switching to hybrid mode.
    pub max_consecutive_failures: u32,
    /// Upper bound on one live fetch.
    pub fetch_timeout: Duration,
    /// Upper bound on delivering one update to one output.
    pub output_timeout: Duration,
    /// Probability per tick of retrying live while in hybrid mode.
    pub hybrid_retry_probability: f64,
    /// Lower bound of the synthetic perturbation magnitude (fraction).
    pub perturbation_min: f64,
    /// Upper bound of the synthetic perturbation magnitude (fraction).
    pub perturbation_max: f64,
    /// Number of values kept per key for trends and sparklines.
    pub history_len: usize,
    /// Fixed RNG seed for reproducible synthetic data. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            interval: DEFAULT_INTERVAL,
            threshold: DEFAULT_THRESHOLD,
            flag_ttl: DEFAULT_FLAG_TTL,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            output_timeout: DEFAULT_OUTPUT_TIMEOUT,
            hybrid_retry_probability: DEFAULT_HYBRID_RETRY_PROBABILITY,
            perturbation_min: DEFAULT_PERTURBATION.0,
            perturbation_max: DEFAULT_PERTURBATION.1,
            history_len: DEFAULT_HISTORY_LEN,
            seed: None,
        }
    }
}

impl MonitorConfig {
    /// Create a default configuration tracking `keys`.
    pub fn with_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Check every field, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keys.is_empty() {
            return Err(ConfigError::NoKeys);
        }
        for (i, key) in self.keys.iter().enumerate() {
            if key.trim().is_empty() || self.keys[..i].contains(key) {
                return Err(ConfigError::InvalidKey(key.clone()));
            }
        }

        if self.interval.is_zero() {
            return Err(ConfigError::ZeroDuration("interval"));
        }
        if self.flag_ttl.is_zero() {
            return Err(ConfigError::ZeroDuration("flag_ttl"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("fetch_timeout"));
        }
        if self.output_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("output_timeout"));
        }

        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::ZeroFailures);
        }
        if !(0.0..=1.0).contains(&self.hybrid_retry_probability) {
            return Err(ConfigError::InvalidProbability(
                self.hybrid_retry_probability,
            ));
        }

        let (min, max) = (self.perturbation_min, self.perturbation_max);
        if !(min.is_finite() && max.is_finite() && 0.0 <= min && min <= max && max < 1.0) {
            return Err(ConfigError::InvalidPerturbation { min, max });
        }

        if self.history_len < 2 {
            return Err(ConfigError::HistoryTooShort);
        }

        Ok(())
    }
}
