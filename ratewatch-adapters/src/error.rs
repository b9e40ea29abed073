//! Error types for rate providers.

use thiserror::Error;

/// Errors that can occur when fetching live rates.
///
/// None of these are fatal to a monitor session: the snapshot source logs
/// them and falls back to synthetic data for the tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Timeout waiting for response.
    #[error("Request timed out")]
    Timeout,

    /// The endpoint answered with a non-2xx status.
    #[error("HTTP request failed with status {status}")]
    Http { status: u16 },

    /// The response was missing expected fields or was not valid JSON.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Connection failed before any response was received.
    #[error("Connection failed: {0}")]
    Connection(String),
}

impl FetchError {
    /// Short machine-friendly label, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::Http { .. } => "http",
            FetchError::Parse(_) => "parse",
            FetchError::Connection(_) => "connection",
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Http {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}
