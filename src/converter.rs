// 💱 Currency Converter
// Turns a rule threshold expressed in a foreign currency into satoshis
// by asking an external price-quote service. One request, no retries.

use crate::error::CurrencyConversionError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Default currency code: amounts are already in the base unit
pub const BASE_UNIT: &str = "satoshi";

/// Satoshis per bitcoin
pub const BASE_UNIT_SCALE: i64 = 100_000_000;

/// Default price-quote endpoint (answers with a plain BTC amount)
pub const DEFAULT_PRICE_URL: &str = "https://blockchain.info/tobtc";

// ============================================================================
// CONVERTER TRAIT
// ============================================================================

#[async_trait]
pub trait CurrencyConverter: Send + Sync {
    /// Base units for `amount` of `currency`, scaled by 10^8.
    async fn exchange_rate(
        &self,
        currency: &str,
        amount: i64,
    ) -> Result<i64, CurrencyConversionError>;
}

/// Parse a price-quote body into base units.
///
/// Accepts a plain or string-encoded decimal number. Anything non-finite or
/// outside the i64 range is rejected.
pub fn parse_rate(body: &str) -> Option<i64> {
    let text = body.trim().trim_matches('"').trim();
    let value: f64 = text.parse().ok()?;

    if !value.is_finite() {
        return None;
    }

    let scaled = (value * BASE_UNIT_SCALE as f64).trunc();
    if scaled < i64::MIN as f64 || scaled >= i64::MAX as f64 {
        return None;
    }

    Some(scaled as i64)
}

// ============================================================================
// HTTP CONVERTER
// ============================================================================

/// Converter backed by the blockchain.info style `tobtc` endpoint
pub struct HttpCurrencyConverter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCurrencyConverter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build price lookup client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Full quote URL for one lookup
    pub fn quote_url(&self, currency: &str, amount: i64) -> String {
        format!(
            "{}?currency={}&value={}",
            self.base_url,
            urlencoding::encode(currency),
            amount
        )
    }
}

#[async_trait]
impl CurrencyConverter for HttpCurrencyConverter {
    async fn exchange_rate(
        &self,
        currency: &str,
        amount: i64,
    ) -> Result<i64, CurrencyConversionError> {
        let url = self.quote_url(currency, amount);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CurrencyConversionError::new(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CurrencyConversionError::from_response(status, &e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(CurrencyConversionError::from_response(status, &body));
        }

        let rate =
            parse_rate(&body).ok_or_else(|| CurrencyConversionError::from_response(status, &body))?;

        debug!(%url, status, body = %body.trim(), "Successful price lookup");
        Ok(rate)
    }
}

// ============================================================================
// FIXED-RATE CONVERTER
// ============================================================================

/// Offline converter with a fixed table of rates. Unknown codes fail the
/// same way the price service does for a bad currency.
#[derive(Debug, Clone, Default)]
pub struct FixedRateConverter {
    rates: HashMap<String, i64>,
}

impl FixedRateConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, currency: &str, rate: i64) -> Self {
        self.rates.insert(currency.to_string(), rate);
        self
    }
}

#[async_trait]
impl CurrencyConverter for FixedRateConverter {
    async fn exchange_rate(
        &self,
        currency: &str,
        _amount: i64,
    ) -> Result<i64, CurrencyConversionError> {
        self.rates
            .get(currency)
            .copied()
            .ok_or_else(|| CurrencyConversionError::from_response(500, "Invalid Currency"))
    }
}

// ============================================================================
// TESTS
// ============================================================================
