//! Decoding of exchange-rate JSON payloads.
//!
//! The common public APIs (open.er-api.com, exchangerate.host, the
//! dashboard backend's `/api/rates`) all answer with an object holding a
//! base code and a `rates` map:
//!
//! ```json
//! { "base": "USD", "rates": { "EUR": 0.92, "GBP": 0.79 } }
//! ```
//!
//! Some use `base_code` instead of `base`, and some nest everything one
//! level down under `data`. Both variants are accepted.

use ratewatch_types::RateTable;
use serde_json::Value;

use crate::FetchError;

/// Rates returned by one provider call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateQuote {
    /// Base currency the rates are quoted against, if the payload says.
    pub base: Option<String>,
    /// Every rate the payload contained.
    pub rates: RateTable,
}

impl RateQuote {
    /// Create a quote from a base and rates.
    pub fn new(base: Option<String>, rates: RateTable) -> Self {
        Self { base, rates }
    }

    /// Build a quote from `(code, rate)` pairs without a base.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self {
            base: None,
            rates: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Parse a payload body, reading the rates map from `rates_field`.
pub fn parse_quote(body: &[u8], rates_field: &str) -> Result<RateQuote, FetchError> {
    let value: Value = serde_json::from_slice(body)?;
    quote_from_value(&value, rates_field)
}

/// Extract a quote from an already-decoded JSON value.
///
/// Non-numeric and non-finite entries inside the rates map are skipped;
/// a missing or non-object rates field is a parse error.
pub fn quote_from_value(value: &Value, rates_field: &str) -> Result<RateQuote, FetchError> {
    let root = match value.get(rates_field) {
        Some(_) => value,
        None => value
            .get("data")
            .filter(|data| data.get(rates_field).is_some())
            .ok_or_else(|| FetchError::Parse(format!("missing field `{}`", rates_field)))?,
    };

    let rates = root
        .get(rates_field)
        .and_then(Value::as_object)
        .ok_or_else(|| FetchError::Parse(format!("field `{}` is not an object", rates_field)))?
        .iter()
        .filter_map(|(code, rate)| {
            rate.as_f64()
                .filter(|r| r.is_finite())
                .map(|r| (code.clone(), r))
        })
        .collect();

    let base = root
        .get("base")
        .or_else(|| root.get("base_code"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(RateQuote { base, rates })
}
