//! Flags - the result of comparing one key across two snapshots.

use alloc::string::String;

/// The change of a single key between two consecutive snapshots.
///
/// Flags are produced by the delta evaluator. A flag with
/// `exceeds_threshold == true` marks an anomaly worth highlighting; flags
/// below the threshold are still useful for direction arrows in rate tables.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Flag {
    /// Tracked key (currency or pair code).
    pub key: String,

    /// Rate in the previous snapshot. Never zero.
    pub previous: f64,

    /// Rate in the current snapshot.
    pub current: f64,

    /// Signed change in percent (10.0 means +10%).
    pub change_percent: f64,

    /// True if `current > previous`.
    pub is_increase: bool,

    /// True if the absolute change is strictly above the evaluation threshold.
    pub exceeds_threshold: bool,
}

impl Flag {
    /// Absolute change as a fraction (0.10 means 10%).
    pub fn magnitude(&self) -> f64 {
        (self.change_percent / 100.0).abs()
    }

    /// Direction of the change.
    pub fn direction(&self) -> Direction {
        if self.current > self.previous {
            Direction::Up
        } else if self.current < self.previous {
            Direction::Down
        } else {
            Direction::Flat
        }
    }
}

/// Direction of a rate movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    /// Single-character arrow for compact displays.
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Up => "▲",
            Direction::Down => "▼",
            Direction::Flat => "=",
        }
    }
}
