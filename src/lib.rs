//! # ratewatch
//!
//! Terminal front end for the ratewatch monitor.
//!
//! The binary is a thin subscriber: all polling, flagging and fallback logic
//! lives in `ratewatch-monitor`. This crate only owns what a command-line
//! tool needs on top of that.
//!
//! - **[`settings`]**: layered configuration (TOML file, `RATEWATCH_*`
//!   environment, CLI flags) resolved into a `MonitorConfig`
//! - **[`render`]**: rate tables and JSON lines for each update
//! - **[`duration`]**: human duration strings such as `"500ms"` or `"1.5s"`
//!
//! ## Usage
//!
//! ```bash
//! # Poll every 30 seconds, flag moves above 10%
//! ratewatch --keys EUR,GBP,JPY
//!
//! # Faster polling, JSON output, stop after 10 updates
//! ratewatch --keys EUR,GBP --interval 1s --json --ticks 10
//! ```

pub mod duration;
pub mod render;
pub mod settings;

pub use render::Renderer;
pub use settings::Settings;
