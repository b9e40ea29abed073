//! Delta evaluation between consecutive snapshots.
//!
//! Everything here is a pure function of its inputs: no clocks, no I/O, no
//! shared state. Flag expiry is the session's job.

use ratewatch_types::{Flag, Snapshot};

/// Compare `current` against `previous` and return the flags whose absolute
/// change is strictly above `threshold` (a fraction, 0.10 for 10%).
///
/// Returns an empty set on the first tick (`previous == None`). Keys missing
/// from either snapshot, keys whose previous rate is zero, and non-finite
/// values never produce a flag. Output is ordered by key.
///
/// # Example
///
/// ```rust
/// use ratewatch_monitor::evaluate;
/// use ratewatch_types::Snapshot;
///
/// let prev = Snapshot::builder().rate("EUR", 0.90).rate("GBP", 0.80).build();
/// let curr = Snapshot::builder().rate("EUR", 1.00).rate("GBP", 0.80).build();
///
/// let flags = evaluate(Some(&prev), &curr, 0.10);
/// assert_eq!(flags.len(), 1);
/// assert_eq!(flags[0].key, "EUR");
/// assert!(flags[0].is_increase);
/// ```
pub fn evaluate(previous: Option<&Snapshot>, current: &Snapshot, threshold: f64) -> Vec<Flag> {
    deltas(previous, current, threshold)
        .into_iter()
        .filter(|flag| flag.exceeds_threshold)
        .collect()
}

/// Like [`evaluate`], but keeps every comparable key.
///
/// Useful for rate tables that show a direction arrow on every row;
/// `exceeds_threshold` marks the ones [`evaluate`] would return.
pub fn deltas(previous: Option<&Snapshot>, current: &Snapshot, threshold: f64) -> Vec<Flag> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    current
        .iter()
        .filter_map(|(key, &new)| {
            let old = previous.get(key)?;
            compare(key, old, new, threshold)
        })
        .collect()
}

fn compare(key: &str, old: f64, new: f64, threshold: f64) -> Option<Flag> {
    if old == 0.0 || !old.is_finite() || !new.is_finite() {
        return None;
    }

    let change = (new - old) / old;
    Some(Flag {
        key: key.to_string(),
        previous: old,
        current: new,
        change_percent: change * 100.0,
        is_increase: new > old,
        exceeds_threshold: change.abs() > threshold,
    })
}
