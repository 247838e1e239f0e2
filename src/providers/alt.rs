// =============================================================================
// Alternative-asset API adapter: 24/7 crypto-style feed
// =============================================================================
//
// This upstream has no market hours and no OHLC bars: it reports a spot
// price with a 24h range, which we shape into a Quote:
//   GET /v2/spot/BTC
//     { "symbol": "BTC", "price": 40123.5, "high_24h": 41000.0,
//       "low_24h": 39500.0, "open_24h": 39900.0, "volume_24h": 12345.6,
//       "updated_at": 1700000000000 }
//   GET /v2/spot/BTC/candles?days=30
//     { "candles": [ [ts, open, high, low, close, volume], ... ] }

use async_trait::async_trait;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{FeedError, Result};
use crate::types::Quote;

use super::{build_http_client, json_f64, QuoteProvider};

const HTTP_TIMEOUT_SECS: u64 = 10;

pub struct AltAssetProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AltAssetProvider {
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

    /// Shape a spot-price payload into a Quote.
    fn parse_spot(&self, symbol: &str, obj: &serde_json::Value) -> Result<Quote> {
        let price = json_f64(&obj["price"])
            .ok_or_else(|| self.malformed("missing field price"))?;
        let timestamp = obj["updated_at"]
            .as_i64()
            .ok_or_else(|| self.malformed("missing field updated_at"))?;

        // 24h range stands in for OHLC; fall back to spot when absent.
        let open = json_f64(&obj["open_24h"]).unwrap_or(price);
        let high = json_f64(&obj["high_24h"]).unwrap_or(price);
        let low = json_f64(&obj["low_24h"]).unwrap_or(price);
        let volume = json_f64(&obj["volume_24h"]).unwrap_or(0.0);

        Ok(Quote {
            symbol: symbol.to_string(),
            timestamp,
            open,
            high,
            low,
            close: price,
            volume,
            bid: None,
            ask: None,
            spread: None,
            asset_class: self.config.asset_class,
            source: self.config.name.clone(),
        })
    }

    /// Parse one `[ts, open, high, low, close, volume]` candle array.
    fn parse_candle(&self, symbol: &str, entry: &serde_json::Value) -> Result<Quote> {
        let arr = entry
            .as_array()
            .ok_or_else(|| self.malformed("candle entry is not an array"))?;
        if arr.len() < 6 {
            return Err(self.malformed(format!("candle entry has {} elements", arr.len())));
        }

        let timestamp = arr[0]
            .as_i64()
            .ok_or_else(|| self.malformed("candle timestamp not an integer"))?;
        let num = |idx: usize| -> Result<f64> {
            json_f64(&arr[idx]).ok_or_else(|| self.malformed(format!("candle field {idx}")))
        };

        Ok(Quote {
            symbol: symbol.to_string(),
            timestamp,
            open: num(1)?,
            high: num(2)?,
            low: num(3)?,
            close: num(4)?,
            volume: num(5)?,
            bid: None,
            ask: None,
            spread: None,
            asset_class: self.config.asset_class,
            source: self.config.name.clone(),
        })
    }
}

#[async_trait]
impl QuoteProvider for AltAssetProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn connect(&self) -> Result<()> {
        let url = format!("{}/v2/status", self.config.base_url);
        self.get_json(&url).await?;
        debug!(provider = %self.config.name, "health probe ok");
        Ok(())
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote> {
        let url = format!("{}/v2/spot/{symbol}", self.config.base_url);
        let body = self.get_json(&url).await?;
        let quote = self.parse_spot(symbol, &body)?;
        debug!(provider = %self.config.name, symbol, close = quote.close, "spot fetched");
        Ok(quote)
    }

    async fn fetch_history(&self, symbol: &str, days: u32) -> Result<Vec<Quote>> {
        let url = format!(
            "{}/v2/spot/{symbol}/candles?days={days}",
            self.config.base_url
        );
        let body = self.get_json(&url).await?;

        let entries = body["candles"]
            .as_array()
            .ok_or_else(|| self.malformed("history response missing 'candles' array"))?;

        let mut quotes = Vec::with_capacity(entries.len());
        for entry in entries {
            quotes.push(self.parse_candle(symbol, entry)?);
        }
        quotes.sort_by_key(|q| q.timestamp);

        debug!(provider = %self.config.name, symbol, count = quotes.len(), "candles fetched");
        Ok(quotes)
    }
}
