//! Layered configuration for the `ratewatch` binary.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML
//! file, `RATEWATCH_*` environment variables, then command-line flags.
//!
//! ```toml
//! url = "https://open.er-api.com/v6/latest/USD"
//! keys = ["EUR", "GBP", "JPY"]
//! interval = "30s"
//! threshold = 0.10
//! flag_ttl = "10s"
//!
//! [[alerts]]
//! key = "EUR"
//! condition = "above"
//! target = 0.95
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use ratewatch_adapters::http::DEFAULT_URL;
use ratewatch_monitor::{AlertRule, MonitorConfig};
use serde::Deserialize;

use crate::duration::parse_duration;

/// Prefix for environment overrides, e.g. `RATEWATCH_INTERVAL=5s`.
pub const ENV_PREFIX: &str = "RATEWATCH";

/// Raw settings as read from file and environment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub url: String,
    pub bearer_token: Option<String>,
    pub rates_field: String,
    pub keys: Vec<String>,
    pub interval: String,
    pub threshold: f64,
    pub flag_ttl: String,
    pub max_failures: u32,
    pub fetch_timeout: String,
    pub retry_probability: f64,
    pub history_len: usize,
    pub seed: Option<u64>,
    pub output: Option<PathBuf>,
    pub alerts: Vec<AlertRule>,
}

impl Default for Settings {
    fn default() -> Self {
        let defaults = MonitorConfig::default();
        Self {
            url: DEFAULT_URL.to_string(),
            bearer_token: None,
            rates_field: "rates".to_string(),
            keys: vec!["EUR".into(), "GBP".into(), "JPY".into()],
            interval: "30s".to_string(),
            threshold: defaults.threshold,
            flag_ttl: "10s".to_string(),
            max_failures: defaults.max_consecutive_failures,
            fetch_timeout: "8s".to_string(),
            retry_probability: defaults.hybrid_retry_probability,
            history_len: defaults.history_len,
            seed: None,
            output: None,
            alerts: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, Environment::with_prefix(ENV_PREFIX))
    }

    /// Load settings from an optional file plus the given environment source.
    pub fn load_with(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(
                env.try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("keys"),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Convert into a monitor configuration, parsing duration strings.
    pub fn monitor_config(&self) -> Result<MonitorConfig> {
        let keys = self
            .keys
            .iter()
            .map(|k| k.trim().to_uppercase())
            .filter(|k| !k.is_empty())
            .collect();

        let config = MonitorConfig {
            keys,
            interval: parse_duration(&self.interval).context("interval")?,
            threshold: self.threshold,
            flag_ttl: parse_duration(&self.flag_ttl).context("flag_ttl")?,
            max_consecutive_failures: self.max_failures,
            fetch_timeout: parse_duration(&self.fetch_timeout).context("fetch_timeout")?,
            hybrid_retry_probability: self.retry_probability,
            history_len: self.history_len,
            seed: self.seed,
            ..MonitorConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
