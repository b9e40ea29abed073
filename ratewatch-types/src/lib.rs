//! # ratewatch-types
//!
//! Core types for exchange-rate monitoring. This crate defines the data model
//! shared by the ratewatch engine, its live-rate providers, and any surface
//! that renders rates (tables, charts, alert lists).
//!
//! ## Design Goals
//!
//! - **Zero required dependencies**: Core types work without any serialization framework
//! - **Optional serialization**: Enable `serde` as needed
//! - **Explicit provenance**: Every snapshot says whether its rates are live or generated
//! - **Immutable snapshots**: Built once through [`SnapshotBuilder`], read-only afterwards
//!
//! ## Features
//!
//! - `std` (default): Standard library support (wall-clock timestamps)
//! - `serde`: JSON/MessagePack/etc. serialization via serde
//!
//! ## Example
//!
//! ```rust
//! use ratewatch_types::{Provenance, Snapshot};
//!
//! let snapshot = Snapshot::builder()
//!     .base("USD")
//!     .rate("EUR", 0.92)
//!     .rate("GBP", 0.79)
//!     .provenance(Provenance::Live)
//!     .build();
//!
//! assert_eq!(snapshot.len(), 2);
//! assert!(snapshot.is_live());
//!
//! // 100 EUR in GBP, through the common USD base
//! let gbp = snapshot.convert("EUR", "GBP", 100.0).unwrap();
//! assert!((gbp - 85.869).abs() < 0.001);
//! ```
//!
//! ## Schema Version
//!
//! The current schema version is **1**. The version is included in serialized
//! snapshots to allow consumers to handle format evolution gracefully.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod flag;
mod snapshot;
mod version;

pub use flag::*;
pub use snapshot::*;
pub use version::*;

/// Current schema version.
///
/// Increment this when making breaking changes to the snapshot format.
pub const SCHEMA_VERSION: u32 = 1;
