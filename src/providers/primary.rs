// =============================================================================
// Primary REST quote API adapter
// =============================================================================
//
// Flat JSON payloads:
//   GET /v1/quote?symbol=AAPL
//     { "symbol": "AAPL", "timestamp": 1700000000000, "open": 174.1,
//       "high": 174.9, "low": 173.8, "close": 174.2, "volume": 1834000,
//       "bid": 174.18, "ask": 174.22 }
//   GET /v1/history?symbol=AAPL&days=30
//     { "quotes": [ { ...same shape... }, ... ] }  (oldest-first)

use async_trait::async_trait;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{FeedError, Result};
use crate::types::Quote;

use super::{build_http_client, json_f64, QuoteProvider};

/// HTTP-level timeout; the acquisition loop applies its own tighter bound.
const HTTP_TIMEOUT_SECS: u64 = 10;

pub struct RestProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl RestProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let client = build_http_client(&config.api_key, HTTP_TIMEOUT_SECS);
        Self { config, client }
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> FeedError {
        FeedError::ProviderUnavailable {
            provider: self.config.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn malformed(&self, detail: impl Into<String>) -> FeedError {
        FeedError::MalformedPayload {
            provider: self.config.name.clone(),
            detail: detail.into(),
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(self.unavailable(format!("HTTP {status}")));
        }

        resp.json().await.map_err(|e| self.malformed(e.to_string()))
    }

    /// Parse one flat quote object. Split out for testability.
    fn parse_quote(&self, symbol: &str, obj: &serde_json::Value) -> Result<Quote> {
        let field = |name: &str| -> Result<f64> {
            json_f64(&obj[name]).ok_or_else(|| self.malformed(format!("missing field {name}")))
        };

        let timestamp = obj["timestamp"]
            .as_i64()
            .ok_or_else(|| self.malformed("missing field timestamp"))?;

        let bid = json_f64(&obj["bid"]);
        let ask = json_f64(&obj["ask"]);
        let spread = match (bid, ask) {
            (Some(b), Some(a)) => Some(a - b),
            _ => None,
        };

        Ok(Quote {
            symbol: symbol.to_string(),
            timestamp,
            open: field("open")?,
            high: field("high")?,
            low: field("low")?,
            close: field("close")?,
            volume: field("volume")?,
            bid,
            ask,
            spread,
            asset_class: self.config.asset_class,
            source: self.config.name.clone(),
        })
    }
}

#[async_trait]
impl QuoteProvider for RestProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn connect(&self) -> Result<()> {
        let url = format!("{}/v1/health", self.config.base_url);
        self.get_json(&url).await?;
        debug!(provider = %self.config.name, "health probe ok");
        Ok(())
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote> {
        let url = format!("{}/v1/quote?symbol={symbol}", self.config.base_url);
        let body = self.get_json(&url).await?;
        let quote = self.parse_quote(symbol, &body)?;
        debug!(provider = %self.config.name, symbol, close = quote.close, "quote fetched");
        Ok(quote)
    }

    async fn fetch_history(&self, symbol: &str, days: u32) -> Result<Vec<Quote>> {
        let url = format!(
            "{}/v1/history?symbol={symbol}&days={days}",
            self.config.base_url
        );
        let body = self.get_json(&url).await?;

        let entries = body["quotes"]
            .as_array()
            .ok_or_else(|| self.malformed("history response missing 'quotes' array"))?;

        let mut quotes = Vec::with_capacity(entries.len());
        for entry in entries {
            quotes.push(self.parse_quote(symbol, entry)?);
        }
        quotes.sort_by_key(|q| q.timestamp);

        debug!(provider = %self.config.name, symbol, count = quotes.len(), "history fetched");
        Ok(quotes)
    }
}
