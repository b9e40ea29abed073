//! Historical rate tracking for trends and sparklines.

use std::collections::{HashMap, VecDeque};

use ratewatch_types::Snapshot;
use serde::Serialize;

/// Direction of a key over the history window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

impl Trend {
    pub fn symbol(&self) -> &'static str {
        match self {
            Trend::Up => "↗",
            Trend::Down => "↘",
            Trend::Flat => "→",
        }
    }
}

/// Relative change below which a window counts as flat.
const FLAT_EPSILON: f64 = 1e-9;

/// Bounded window of recent values per key.
///
/// Records every snapshot the session produces so a dashboard can draw
/// trend charts without keeping its own buffers.
#[derive(Debug, Clone)]
pub struct History {
    capacity: usize,
    values: HashMap<String, VecDeque<f64>>,
    timestamps: VecDeque<u64>,
}

impl History {
    /// Create an empty history keeping at most `capacity` values per key.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            values: HashMap::new(),
            timestamps: VecDeque::new(),
        }
    }

    /// Record a new snapshot.
    pub fn record(&mut self, snapshot: &Snapshot) {
        for (key, &value) in snapshot.iter() {
            let values = self.values.entry(key.clone()).or_default();
            values.push_back(value);
            if values.len() > self.capacity {
                values.pop_front();
            }
        }

        self.timestamps.push_back(snapshot.timestamp_ms);
        if self.timestamps.len() > self.capacity {
            self.timestamps.pop_front();
        }
    }

    /// Recorded values for `key`, oldest first.
    pub fn values(&self, key: &str) -> Vec<f64> {
        self.values
            .get(key)
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Most recent value for `key`.
    pub fn latest(&self, key: &str) -> Option<f64> {
        self.values.get(key)?.back().copied()
    }

    /// Number of snapshots recorded (capped at capacity).
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fractional change between the oldest and newest value in the window.
    ///
    /// Returns None with fewer than two values or a zero starting value.
    pub fn change_over_window(&self, key: &str) -> Option<f64> {
        let values = self.values.get(key)?;
        if values.len() < 2 {
            return None;
        }
        let first = *values.front()?;
        let last = *values.back()?;
        if first == 0.0 || !first.is_finite() || !last.is_finite() {
            return None;
        }
        Some((last - first) / first)
    }

    /// Overall direction of `key` across the window.
    pub fn trend(&self, key: &str) -> Option<Trend> {
        let change = self.change_over_window(key)?;
        Some(if change > FLAT_EPSILON {
            Trend::Up
        } else if change < -FLAT_EPSILON {
            Trend::Down
        } else {
            Trend::Flat
        })
    }

    /// Sparkline levels (0-7 for 8 bar heights) for `key`.
    ///
    /// Returns an empty Vec if there's not enough history.
    pub fn sparkline(&self, key: &str) -> Vec<u8> {
        let Some(values) = self.values.get(key) else {
            return Vec::new();
        };
        if values.len() < 2 {
            return Vec::new();
        }

        let finite = values.iter().copied().filter(|v| v.is_finite());
        let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        let range = max - min;

        values
            .iter()
            .map(|&v| {
                if !v.is_finite() || range <= 0.0 {
                    return 0;
                }
                let normalized = ((v - min) / range * 7.0).round() as u8;
                normalized.min(7)
            })
            .collect()
    }

    /// Render a sparkline as block characters.
    pub fn sparkline_string(&self, key: &str) -> String {
        const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
        self.sparkline(key)
            .into_iter()
            .map(|level| BARS[level as usize])
            .collect()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_HISTORY_LEN)
    }
}
