//! Snapshot - a point-in-time view of exchange rates.

use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::SchemaVersion;

/// Rates keyed by currency (or currency-pair) code.
pub type RateTable = BTreeMap<String, f64>;

/// Where the rates in a snapshot came from.
///
/// Surfaces use this to decide whether to show a degraded-data indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Provenance {
    /// Every tracked rate came from the live provider.
    #[default]
    Live,
    /// Every rate was generated locally.
    Synthetic,
    /// The live payload was partial; missing rates were generated locally.
    Hybrid,
}

impl Provenance {
    /// Short lowercase label for display and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Live => "live",
            Provenance::Synthetic => "synthetic",
            Provenance::Hybrid => "hybrid",
        }
    }

    /// Returns true if at least one rate came from the live provider.
    pub fn has_live_data(&self) -> bool {
        matches!(self, Provenance::Live | Provenance::Hybrid)
    }
}

impl core::fmt::Display for Provenance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point-in-time snapshot of exchange rates.
///
/// Snapshots are produced once per monitor tick and never modified afterwards.
/// All rates are quoted against a common base currency (usually USD), which
/// is what makes [`Snapshot::convert`] possible.
///
/// # Example
///
/// ```rust
/// use ratewatch_types::{Provenance, Snapshot};
///
/// let snapshot = Snapshot::builder()
///     .timestamp_ms(1703160000000)
///     .rate("EUR", 0.90)
///     .rate("GBP", 0.80)
///     .provenance(Provenance::Synthetic)
///     .build();
///
/// assert_eq!(snapshot.get("EUR"), Some(0.90));
/// assert!(!snapshot.is_live());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Snapshot {
    /// Schema version for forward compatibility.
    pub version: SchemaVersion,

    /// Unix timestamp in milliseconds when this snapshot was taken.
    pub timestamp_ms: u64,

    /// Base currency all rates are quoted against, if known.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub base: Option<String>,

    /// Where the rates came from.
    pub provenance: Provenance,

    /// Rate per tracked key.
    pub rates: RateTable,
}

impl Snapshot {
    /// Create a builder for constructing snapshots.
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new()
    }

    /// Check if the snapshot carries no rates.
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Number of rates in the snapshot.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Get the rate for a key.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.rates.get(key).copied()
    }

    /// Check whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.rates.contains_key(key)
    }

    /// Iterate over all rates in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.rates.iter()
    }

    /// Returns true if every rate came from the live provider.
    pub fn is_live(&self) -> bool {
        self.provenance == Provenance::Live
    }

    /// Convert `amount` of `from` into `to` using the snapshot's common base.
    ///
    /// The base currency itself converts at 1.0 even when it is not listed.
    /// Returns `None` for unknown keys or a zero `from` rate.
    pub fn convert(&self, from: &str, to: &str, amount: f64) -> Option<f64> {
        let from_rate = self.quote(from)?;
        let to_rate = self.quote(to)?;
        if from_rate == 0.0 {
            return None;
        }
        Some(amount * to_rate / from_rate)
    }

    fn quote(&self, key: &str) -> Option<f64> {
        match self.rates.get(key) {
            Some(rate) => Some(*rate),
            None if self.base.as_deref() == Some(key) => Some(1.0),
            None => None,
        }
    }
}

/// Builder for constructing `Snapshot` instances.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    timestamp_ms: Option<u64>,
    base: Option<String>,
    provenance: Provenance,
    rates: RateTable,
}

impl SnapshotBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a specific timestamp (milliseconds since Unix epoch).
    pub fn timestamp_ms(mut self, ts: u64) -> Self {
        self.timestamp_ms = Some(ts);
        self
    }

    /// Set the base currency.
    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Set the provenance tag (defaults to [`Provenance::Live`]).
    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Add a single rate.
    pub fn rate(mut self, key: impl Into<String>, value: f64) -> Self {
        self.rates.insert(key.into(), value);
        self
    }

    /// Add many rates at once.
    pub fn rates<I, K>(mut self, rates: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        self.rates
            .extend(rates.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    /// Build the snapshot.
    #[cfg(feature = "std")]
    pub fn build(self) -> Snapshot {
        Snapshot {
            version: SchemaVersion::current(),
            timestamp_ms: self.timestamp_ms.unwrap_or_else(current_timestamp_ms),
            base: self.base,
            provenance: self.provenance,
            rates: self.rates,
        }
    }

    /// Build the snapshot with a specific timestamp (for no_std).
    #[cfg(not(feature = "std"))]
    pub fn build(self) -> Snapshot {
        Snapshot {
            version: SchemaVersion::current(),
            timestamp_ms: self.timestamp_ms.unwrap_or(0),
            base: self.base,
            provenance: self.provenance,
            rates: self.rates,
        }
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
#[cfg(feature = "std")]
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
