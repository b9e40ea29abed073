//! HTTP adapter for JSON exchange-rate endpoints.
//!
//! This adapter issues one GET per fetch against an endpoint that returns a
//! rates map, such as the dashboard backend's `/api/rates` route or a public
//! provider like `https://open.er-api.com/v6/latest/USD`.
//!
//! ## Failure mapping
//!
//! - request timeout → [`FetchError::Timeout`]
//! - non-2xx status (including 429 rate limiting) → [`FetchError::Http`]
//! - body that is not JSON or lacks the rates field → [`FetchError::Parse`]
//! - DNS/TCP/TLS failures → [`FetchError::Connection`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use ratewatch_adapters::{http::HttpProvider, RateProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = HttpProvider::builder()
//!         .url("https://open.er-api.com/v6/latest/USD")
//!         .timeout(Duration::from_secs(8))
//!         .build()?;
//!
//!     let quote = provider.fetch(&["EUR".to_string(), "GBP".to_string()]).await?;
//!     for (code, rate) in &quote.rates {
//!         println!("{}: {}", code, rate);
//!     }
//!
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::payload::parse_quote;
use crate::{FetchError, RateProvider, RateQuote};

/// Default endpoint: a free, keyless USD-based provider.
pub const DEFAULT_URL: &str = "https://open.er-api.com/v6/latest/USD";

/// Provider that reads rates from a JSON HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    url: String,
    rates_field: String,
    bearer_token: Option<String>,
    description: String,
}

impl HttpProvider {
    /// Create a new builder for configuring the provider.
    pub fn builder() -> HttpProviderBuilder {
        HttpProviderBuilder::default()
    }

    /// The endpoint being queried.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get(&self) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Http {
                status: response.status().as_u16(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl RateProvider for HttpProvider {
    async fn fetch(&self, _keys: &[String]) -> Result<RateQuote, FetchError> {
        let body = self.get().await?;
        parse_quote(&body, &self.rates_field)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Builder for HttpProvider.
#[derive(Debug, Default)]
pub struct HttpProviderBuilder {
    url: Option<String>,
    rates_field: Option<String>,
    bearer_token: Option<String>,
    timeout: Option<Duration>,
}

impl HttpProviderBuilder {
    /// Set the endpoint URL (default: [`DEFAULT_URL`]).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the JSON field holding the rates map (default: `"rates"`).
    pub fn rates_field(mut self, field: impl Into<String>) -> Self {
        self.rates_field = Some(field.into());
        self
    }

    /// Send `Authorization: Bearer <token>` with every request.
    ///
    /// The token is opaque here; obtaining it is the caller's business.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Set the request timeout (default: 8 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the provider.
    pub fn build(self) -> Result<HttpProvider, FetchError> {
        let timeout = self.timeout.unwrap_or(Duration::from_secs(8));

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Connection(e.to_string()))?;

        let url = self.url.unwrap_or_else(|| DEFAULT_URL.to_string());
        let description = format!("http: {}", url);

        Ok(HttpProvider {
            client,
            url,
            rates_field: self.rates_field.unwrap_or_else(|| "rates".to_string()),
            bearer_token: self.bearer_token,
            description,
        })
    }
}
