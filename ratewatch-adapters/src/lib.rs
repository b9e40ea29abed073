//! # ratewatch-adapters
//!
//! Live exchange-rate providers for the ratewatch monitor.
//!
//! A provider answers one question: "what are the rates right now?". The
//! monitor decides when to ask, how long to wait, and what to do when the
//! answer does not come; providers only report typed [`FetchError`]s.
//!
//! ## Providers
//!
//! - [`FnProvider`] - wraps an async closure; the "function pointer" form used
//!   by tests and by callers that already own an HTTP client
//! - **HTTP** (`http` feature) - [`http::HttpProvider`] issues a single GET
//!   against a JSON endpoint and reads its `rates` map
//!
//! ## Quick Start (HTTP)
//!
//! ```rust,ignore
//! use ratewatch_adapters::{http::HttpProvider, RateProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = HttpProvider::builder()
//!         .url("https://open.er-api.com/v6/latest/USD")
//!         .build()?;
//!
//!     let quote = provider.fetch(&["EUR".to_string()]).await?;
//!     println!("EUR = {:?}", quote.rates.get("EUR"));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod payload;

#[cfg(feature = "http")]
pub mod http;

use std::fmt;
use std::future::Future;

use async_trait::async_trait;

pub use error::FetchError;
pub use payload::{parse_quote, RateQuote};

// Re-export types for convenience
pub use ratewatch_types::{Provenance, RateTable, Snapshot};

/// A source of live exchange rates.
///
/// Implementations perform at most one network round-trip per call and must
/// not retry internally; retry and fallback policy belongs to the monitor.
#[async_trait]
pub trait RateProvider: Send + Sync + fmt::Debug {
    /// Fetch current rates.
    ///
    /// `keys` lists the tracked codes. Providers may use it to narrow the
    /// request, but may also return extra rates; the caller filters.
    async fn fetch(&self, keys: &[String]) -> Result<RateQuote, FetchError>;

    /// Returns a human-readable description of the provider.
    ///
    /// Used in log lines and status output.
    fn description(&self) -> &str;
}

/// A provider backed by an async closure.
///
/// # Example
///
/// ```rust
/// use ratewatch_adapters::{FetchError, FnProvider, RateProvider, RateQuote};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let provider = FnProvider::new("fixed", |_keys: Vec<String>| async {
///     Ok::<_, FetchError>(RateQuote::from_pairs([("EUR", 0.92)]))
/// });
///
/// let quote = provider.fetch(&["EUR".to_string()]).await.unwrap();
/// assert_eq!(quote.rates.get("EUR"), Some(&0.92));
/// # });
/// ```
pub struct FnProvider<F> {
    fetch: F,
    description: String,
}

impl<F> FnProvider<F> {
    /// Wrap `fetch`, which receives an owned copy of the tracked keys.
    pub fn new(description: &str, fetch: F) -> Self {
        Self {
            fetch,
            description: format!("fn: {}", description),
        }
    }
}

#[async_trait]
impl<F, Fut> RateProvider for FnProvider<F>
where
    F: Fn(Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RateQuote, FetchError>> + Send + 'static,
{
    async fn fetch(&self, keys: &[String]) -> Result<RateQuote, FetchError> {
        (self.fetch)(keys.to_vec()).await
    }

    fn description(&self) -> &str {
        &self.description
    }
}

impl<F> fmt::Debug for FnProvider<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProvider")
            .field("description", &self.description)
            .finish()
    }
}
