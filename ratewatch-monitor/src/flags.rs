//! Active flag tracking with per-flag expiry.

use std::collections::BTreeMap;
use std::time::Duration;

use ratewatch_types::Flag;
use tokio::time::Instant;

/// A raised flag together with its lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveFlag {
    pub flag: Flag,
    pub raised_at: Instant,
    pub expires_at: Instant,
}

impl ActiveFlag {
    /// Whether the flag is still live at `now`.
    pub fn is_active(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// The set of currently active flags, at most one per key.
///
/// Uses tokio's clock so paused-time tests control expiry.
#[derive(Debug, Clone)]
pub struct FlagSet {
    ttl: Duration,
    flags: BTreeMap<String, ActiveFlag>,
}

impl FlagSet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            flags: BTreeMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Add freshly raised flags. A flag for a key that already has one
    /// replaces it and restarts the TTL.
    pub fn merge(&mut self, flags: impl IntoIterator<Item = Flag>, now: Instant) {
        for flag in flags {
            self.flags.insert(
                flag.key.clone(),
                ActiveFlag {
                    flag,
                    raised_at: now,
                    expires_at: now + self.ttl,
                },
            );
        }
    }

    /// Drop expired flags, returning how many were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.flags.len();
        self.flags.retain(|_, active| active.is_active(now));
        before - self.flags.len()
    }

    /// Flags still active at `now`, ordered by key.
    pub fn active(&self, now: Instant) -> Vec<Flag> {
        self.flags
            .values()
            .filter(|active| active.is_active(now))
            .map(|active| active.flag.clone())
            .collect()
    }

    /// Earliest expiry among stored flags.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.flags.values().map(|active| active.expires_at).min()
    }

    pub fn get(&self, key: &str) -> Option<&ActiveFlag> {
        self.flags.get(key)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn clear(&mut self) {
        self.flags.clear();
    }
}
