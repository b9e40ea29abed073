use std::time::Duration;

use anyhow::{bail, Result};

/// Suffix to nanoseconds multiplier (order matters: longer suffixes first)
const UNITS: &[(&str, f64)] = &[
    ("ns", 1.0),
    ("µs", 1_000.0),
    ("us", 1_000.0),
    ("ms", 1_000_000.0),
    ("s", 1_000_000_000.0),
    ("m", 60_000_000_000.0),
    ("h", 3_600_000_000_000.0),
];

/// Parse duration strings like "500ms", "1s", "1.5s", "2m".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    for (suffix, multiplier) in UNITS {
        if let Some(val_str) = s.strip_suffix(suffix) {
            return scaled(val_str, *multiplier, s);
        }
    }

    if s.parse::<f64>().is_ok() {
        return scaled(s, 1_000_000_000.0, s);
    }

    bail!("Unknown duration format: {}", s)
}

fn scaled(value: &str, multiplier: f64, input: &str) -> Result<Duration> {
    let val: f64 = value.trim().parse()?;
    if !val.is_finite() || val < 0.0 {
        bail!("Duration must be a non-negative number: {}", input);
    }
    Ok(Duration::from_nanos((val * multiplier) as u64))
}

/// Format a duration for display
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        "0s".to_string()
    } else if nanos < 1_000_000 {
        format!("{}µs", nanos / 1_000)
    } else if nanos < 1_000_000_000 {
        format!("{}ms", d.as_millis())
    } else if nanos % 1_000_000_000 == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}
