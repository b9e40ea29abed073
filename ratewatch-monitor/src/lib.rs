//! # ratewatch-monitor
//!
//! Polling exchange-rate monitor: periodic snapshots, delta flags with a
//! time-to-live, and a synthetic fallback when the live provider fails.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ratewatch_adapters::{FetchError, FnProvider, RateQuote};
//! use ratewatch_monitor::{Monitor, Output};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = FnProvider::new("static", |_keys: Vec<String>| async {
//!         Ok::<_, FetchError>(RateQuote::from_pairs([("EUR", 0.92), ("GBP", 0.79)]))
//!     });
//!
//!     // Poll every 30 seconds and flag moves above 10%
//!     let monitor = Monitor::builder()
//!         .keys(["EUR", "GBP"])
//!         .interval(Duration::from_secs(30))
//!         .threshold(0.10)
//!         .provider(Arc::new(provider))
//!         .output(Output::file("rates.json"))
//!         .build()?;
//!
//!     let handle = monitor.start(|snapshot, flags| {
//!         for flag in flags {
//!             println!("{} moved {:+.2}%", flag.key, flag.change_percent);
//!         }
//!         println!("{} rates ({})", snapshot.len(), snapshot.provenance);
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Typed configuration**: [`MonitorConfig`] validated on build
//! - **Graceful degradation**: failed fetches fall back to synthetic rates,
//!   and repeated failures switch the source to hybrid mode
//! - **Expiring flags**: each flag lives for `flag_ttl` from the tick that raised it
//! - **Non-overlapping ticks**: at most one fetch in flight per session
//! - **Fan-out**: [`SessionHandle::subscribe`] and [`Output`] sinks

mod alerts;
mod config;
mod evaluator;
mod flags;
mod handle;
mod history;
mod monitor;
mod output;
mod source;
mod state;
mod synthetic;

pub use alerts::{check_all, Alert, AlertRule, Condition};
pub use config::{
    ConfigError, MonitorConfig, DEFAULT_FETCH_TIMEOUT, DEFAULT_FLAG_TTL, DEFAULT_HISTORY_LEN,
    DEFAULT_HYBRID_RETRY_PROBABILITY, DEFAULT_INTERVAL, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    DEFAULT_OUTPUT_TIMEOUT, DEFAULT_PERTURBATION, DEFAULT_THRESHOLD,
};
pub use evaluator::{deltas, evaluate};
pub use flags::{ActiveFlag, FlagSet};
pub use handle::SessionHandle;
pub use history::{History, Trend};
pub use monitor::{Monitor, MonitorBuilder};
pub use output::Output;
pub use source::{SnapshotSource, SourceMode};
pub use state::MonitorState;
pub use synthetic::{seed_rate, Perturbation, Synthesizer, SEED_RATES, UNKNOWN_SEED_RATE};

// Re-export types for convenience
pub use ratewatch_types::{Flag, Provenance, Snapshot};
