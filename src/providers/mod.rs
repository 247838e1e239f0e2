// =============================================================================
// Provider Adapters: uniform capability surface over upstream quote APIs
// =============================================================================
//
// Each upstream source implements `QuoteProvider`. Failures are always
// non-fatal: the acquisition loop treats any error as "try the next provider
// in priority order", with synthetic fallback as the terminal branch.

pub mod alt;
pub mod primary;
pub mod secondary;

pub use alt::AltAssetProvider;
pub use primary::RestProvider;
pub use secondary::SecondaryRestProvider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::Result;
use crate::types::Quote;

/// Capability surface every upstream market-data source provides.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Stable name used in quote source tags and log lines.
    fn name(&self) -> &str;

    /// Establish / verify upstream connectivity. Adapters over plain REST
    /// APIs treat this as a health probe.
    async fn connect(&self) -> Result<()>;

    /// Release upstream resources. REST adapters have nothing to tear down.
    async fn disconnect(&self) {}

    /// Fetch the latest quote for one symbol.
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote>;

    /// Fetch up to `days` days of daily history, oldest-first.
    async fn fetch_history(&self, symbol: &str, days: u32) -> Result<Vec<Quote>>;
}

/// Build the provider failover chain from configuration, in priority order.
pub fn build_providers(configs: &[ProviderConfig]) -> Vec<Arc<dyn QuoteProvider>> {
    configs
        .iter()
        .map(|cfg| -> Arc<dyn QuoteProvider> {
            match cfg.kind {
                ProviderKind::Primary => Arc::new(RestProvider::new(cfg.clone())),
                ProviderKind::Secondary => Arc::new(SecondaryRestProvider::new(cfg.clone())),
                ProviderKind::AltAsset => Arc::new(AltAssetProvider::new(cfg.clone())),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Shared parsing helpers
// ---------------------------------------------------------------------------

/// Parse a JSON value that may be either a string or a number into `f64`.
/// Several upstreams send numeric values as JSON strings.
pub(crate) fn json_f64(val: &serde_json::Value) -> Option<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>().ok()
    } else {
        val.as_f64()
    }
}

/// Shared reqwest client factory: per-provider API key header and a bounded
/// request timeout so a hung upstream cannot stall an acquisition tick.
pub(crate) fn build_http_client(api_key: &str, timeout_secs: u64) -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    if !api_key.is_empty() {
        if let Ok(val) = reqwest::header::HeaderValue::from_str(api_key) {
            headers.insert("X-API-KEY", val);
        }
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}
