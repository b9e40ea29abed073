//! Price alerts on tracked keys.

use ratewatch_types::Snapshot;
use serde::{Deserialize, Serialize};

/// Which side of the target triggers the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Above,
    Below,
}

impl Condition {
    fn holds(&self, value: f64, target: f64) -> bool {
        match self {
            Condition::Above => value > target,
            Condition::Below => value < target,
        }
    }
}

/// Alert when `key` moves above or below `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub key: String,
    pub condition: Condition,
    pub target: f64,
}

impl AlertRule {
    pub fn above(key: impl Into<String>, target: f64) -> Self {
        Self {
            key: key.into(),
            condition: Condition::Above,
            target,
        }
    }

    pub fn below(key: impl Into<String>, target: f64) -> Self {
        Self {
            key: key.into(),
            condition: Condition::Below,
            target,
        }
    }

    /// Check the rule against a tick.
    ///
    /// Fires when the condition starts to hold: false for `previous` and true
    /// for `current`. Without a previous value it fires if the condition
    /// already holds.
    pub fn check(&self, previous: Option<&Snapshot>, current: &Snapshot) -> Option<Alert> {
        let value = current.get(&self.key)?;
        if !value.is_finite() || !self.condition.holds(value, self.target) {
            return None;
        }

        let was_holding = previous
            .and_then(|p| p.get(&self.key))
            .is_some_and(|old| self.condition.holds(old, self.target));
        if was_holding {
            return None;
        }

        Some(Alert {
            rule: self.clone(),
            value,
        })
    }
}

/// A triggered alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub rule: AlertRule,
    pub value: f64,
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = match self.rule.condition {
            Condition::Above => "above",
            Condition::Below => "below",
        };
        write!(
            f,
            "{} is {} {} (now {})",
            self.rule.key, side, self.rule.target, self.value
        )
    }
}

/// Check every rule, returning the alerts that fired this tick.
pub fn check_all(rules: &[AlertRule], previous: Option<&Snapshot>, current: &Snapshot) -> Vec<Alert> {
    rules
        .iter()
        .filter_map(|rule| rule.check(previous, current))
        .collect()
}
