//! Synthetic rate generation used when the live provider is unavailable.

use rand::rngs::StdRng;
use rand::Rng;

/// USD-based reference rates used when no live snapshot has been seen yet.
pub const SEED_RATES: &[(&str, f64)] = &[
    ("USD", 1.0),
    ("EUR", 0.92),
    ("GBP", 0.79),
    ("JPY", 149.50),
    ("CHF", 0.88),
    ("CAD", 1.36),
    ("AUD", 1.52),
    ("NZD", 1.64),
    ("CNY", 7.24),
    ("HKD", 7.82),
    ("SGD", 1.34),
    ("INR", 83.10),
    ("KRW", 1330.0),
    ("SEK", 10.45),
    ("NOK", 10.60),
    ("DKK", 6.87),
    ("MXN", 17.10),
    ("BRL", 4.97),
    ("ZAR", 18.60),
    ("TRY", 32.20),
];

/// Rate assumed for keys that appear in neither the baseline nor the seed table.
pub const UNKNOWN_SEED_RATE: f64 = 1.0;

/// Look up a key in the seed table.
pub fn seed_rate(key: &str) -> Option<f64> {
    SEED_RATES
        .iter()
        .find(|(code, _)| *code == key)
        .map(|(_, rate)| *rate)
}

/// Strategy for turning a baseline rate into a synthetic one.
///
/// The snapshot source owns the RNG so that seeding one value makes a whole
/// session reproducible. Closures of the form `FnMut(&str, f64) -> f64`
/// implement this trait and ignore the RNG, which is handy in tests.
pub trait Synthesizer: Send {
    /// Produce a synthetic rate for `key` from `baseline`.
    fn synthesize(&mut self, key: &str, baseline: f64, rng: &mut StdRng) -> f64;
}

impl<F> Synthesizer for F
where
    F: FnMut(&str, f64) -> f64 + Send,
{
    fn synthesize(&mut self, key: &str, baseline: f64, _rng: &mut StdRng) -> f64 {
        self(key, baseline)
    }
}

/// Default synthesizer: nudge the baseline up or down by a uniformly drawn
/// fraction within `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Perturbation {
    min: f64,
    max: f64,
}

impl Perturbation {
    /// Create a perturbation with magnitude bounds as fractions.
    ///
    /// Bounds are expected to be validated (`0 <= min <= max < 1`).
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Magnitude bounds as `(min, max)`.
    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }
}

impl Synthesizer for Perturbation {
    fn synthesize(&mut self, _key: &str, baseline: f64, rng: &mut StdRng) -> f64 {
        let magnitude = if self.max > self.min {
            rng.random_range(self.min..=self.max)
        } else {
            self.min
        };
        let sign = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
        baseline * (1.0 + sign * magnitude)
    }
}
