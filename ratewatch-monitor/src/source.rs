//! The snapshot source: live fetch with synthetic fallback.
//!
//! ```text
//!            live ok                         live ok (retry, p = hybrid_retry_probability)
//!   ┌──────────────────┐           ┌──────────────────────────────┐
//!   ▼                  │           │                              │
//! Normal ── failure ──▶ synthetic  │   failures >= max            ▼
//!   │     (this tick only)         │                           Normal
//!   └──────────────────────────────┴──▶ Hybrid ── synthetic every tick
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ratewatch_adapters::{FetchError, RateProvider};
use ratewatch_types::{Provenance, RateTable, Snapshot};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::synthetic::{seed_rate, Perturbation, Synthesizer, UNKNOWN_SEED_RATE};

/// Whether the source is currently trusting the live provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Every tick tries the live provider first.
    #[default]
    Normal,
    /// The provider failed repeatedly; ticks are synthetic with occasional
    /// live retries.
    Hybrid,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Normal => "normal",
            SourceMode::Hybrid => "hybrid",
        }
    }
}

/// Produces one snapshot per call, always.
///
/// Owns the failure counter, the mode, the RNG and the last live baseline.
pub struct SnapshotSource {
    provider: Arc<dyn RateProvider>,
    keys: Vec<String>,
    fetch_timeout: Duration,
    max_consecutive_failures: u32,
    hybrid_retry_probability: f64,
    synthesizer: Box<dyn Synthesizer>,
    rng: StdRng,
    mode: SourceMode,
    consecutive_failures: u32,
    baseline: Option<Snapshot>,
}

impl SnapshotSource {
    /// Create a source from a validated configuration.
    pub fn new(provider: Arc<dyn RateProvider>, config: &MonitorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            provider,
            keys: config.keys.clone(),
            fetch_timeout: config.fetch_timeout,
            max_consecutive_failures: config.max_consecutive_failures,
            hybrid_retry_probability: config.hybrid_retry_probability,
            synthesizer: Box::new(Perturbation::new(
                config.perturbation_min,
                config.perturbation_max,
            )),
            rng,
            mode: SourceMode::Normal,
            consecutive_failures: 0,
            baseline: None,
        }
    }

    /// Replace the synthetic generation strategy.
    pub fn with_synthesizer(mut self, synthesizer: Box<dyn Synthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    /// Current mode.
    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    /// Live failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// The provider's description.
    pub fn description(&self) -> &str {
        self.provider.description()
    }

    /// Produce the snapshot for one tick, applying the fallback policy.
    pub async fn next_snapshot(&mut self) -> Snapshot {
        match self.mode {
            SourceMode::Normal => match self.fetch_live().await {
                Ok(snapshot) => snapshot,
                Err(_) => self.fetch_synthetic(None),
            },
            SourceMode::Hybrid => {
                if self.rng.random_bool(self.hybrid_retry_probability) {
                    debug!(provider = self.provider.description(), "Retrying live provider");
                    if let Ok(snapshot) = self.fetch_live().await {
                        return snapshot;
                    }
                }
                self.fetch_synthetic(None)
            }
        }
    }

    /// One bounded call to the live provider.
    ///
    /// Updates the failure counter and mode, and on success remembers the
    /// snapshot as the synthetic baseline.
    pub async fn fetch_live(&mut self) -> Result<Snapshot, FetchError> {
        let result = match tokio::time::timeout(self.fetch_timeout, self.provider.fetch(&self.keys)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };

        match result.and_then(|quote| self.build_live(quote.base, quote.rates)) {
            Ok(snapshot) => {
                self.record_success();
                self.baseline = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Generate a synthetic snapshot around `baseline`.
    ///
    /// Without an explicit baseline, the last live snapshot is used, then the
    /// seed table.
    pub fn fetch_synthetic(&mut self, baseline: Option<&Snapshot>) -> Snapshot {
        let baseline = baseline.or(self.baseline.as_ref());
        let base = baseline.and_then(|b| b.base.clone());

        let mut rates = RateTable::new();
        for key in &self.keys {
            let reference = baseline
                .and_then(|b| b.get(key))
                .or_else(|| seed_rate(key))
                .unwrap_or(UNKNOWN_SEED_RATE);
            let value = self.synthesizer.synthesize(key, reference, &mut self.rng);
            rates.insert(key.clone(), value);
        }

        let mut builder = Snapshot::builder()
            .rates(rates)
            .provenance(Provenance::Synthetic);
        if let Some(base) = base {
            builder = builder.base(base);
        }
        builder.build()
    }

    fn build_live(&mut self, base: Option<String>, mut rates: RateTable) -> Result<Snapshot, FetchError> {
        rates.retain(|key, _| self.keys.contains(key));
        if rates.is_empty() {
            return Err(FetchError::Parse(
                "payload contains none of the tracked keys".to_string(),
            ));
        }

        let missing: Vec<String> = self
            .keys
            .iter()
            .filter(|key| !rates.contains_key(*key))
            .cloned()
            .collect();

        let provenance = if missing.is_empty() {
            Provenance::Live
        } else {
            debug!(missing = ?missing, "Live payload incomplete, filling synthetically");
            for key in missing {
                let reference = self
                    .baseline
                    .as_ref()
                    .and_then(|b| b.get(&key))
                    .or_else(|| seed_rate(&key))
                    .unwrap_or(UNKNOWN_SEED_RATE);
                let value = self.synthesizer.synthesize(&key, reference, &mut self.rng);
                rates.insert(key, value);
            }
            Provenance::Hybrid
        };

        let mut builder = Snapshot::builder().rates(rates).provenance(provenance);
        if let Some(base) = base {
            builder = builder.base(base);
        }
        Ok(builder.build())
    }

    fn record_success(&mut self) {
        if self.mode == SourceMode::Hybrid {
            info!(
                provider = self.provider.description(),
                failures = self.consecutive_failures,
                "Live provider recovered, leaving hybrid mode"
            );
        }
        self.consecutive_failures = 0;
        self.mode = SourceMode::Normal;
    }

    fn record_failure(&mut self, error: &FetchError) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        warn!(
            provider = self.provider.description(),
            kind = error.kind(),
            failures = self.consecutive_failures,
            error = %error,
            "Live fetch failed, using synthetic rates"
        );

        if self.mode == SourceMode::Normal
            && self.consecutive_failures >= self.max_consecutive_failures
        {
            warn!(
                provider = self.provider.description(),
                failures = self.consecutive_failures,
                "Too many consecutive failures, entering hybrid mode"
            );
            self.mode = SourceMode::Hybrid;
        }
    }
}

impl std::fmt::Debug for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotSource")
            .field("provider", &self.provider.description())
            .field("keys", &self.keys)
            .field("mode", &self.mode)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish()
    }
}
