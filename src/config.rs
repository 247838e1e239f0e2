// =============================================================================
// Engine Configuration: tunable parameters for the distribution engine
// =============================================================================
//
// Every empirically-chosen constant in the pipeline (signal confidence
// formulas, dedup window, expiry, rate-limit cap) lives here instead of being
// hard-coded, so deployments can tune them without a rebuild.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::AssetClass;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_history_capacity() -> usize {
    1000
}

fn default_quote_interval_secs() -> u64 {
    1
}

fn default_indicator_interval_secs() -> u64 {
    5
}

fn default_signal_interval_secs() -> u64 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_bucket_cleanup_interval_secs() -> u64 {
    30
}

fn default_heartbeat_timeout_secs() -> u64 {
    30
}

fn default_provider_timeout_secs() -> u64 {
    5
}

fn default_rate_limit_per_sec() -> u32 {
    100
}

fn default_outbound_queue_depth() -> usize {
    256
}

fn default_sma_period() -> usize {
    20
}

fn default_ema_period() -> usize {
    12
}

fn default_rsi_period() -> usize {
    14
}

fn default_bollinger_period() -> usize {
    20
}

fn default_bollinger_k() -> f64 {
    2.0
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_signal_ttl_secs() -> u64 {
    3600
}

fn default_rsi_oversold() -> f64 {
    30.0
}

fn default_rsi_overbought() -> f64 {
    70.0
}

fn default_base_confidence() -> f64 {
    0.75
}

fn default_max_confidence() -> f64 {
    0.95
}

fn default_bollinger_confidence() -> f64 {
    0.70
}

fn default_fallback_seed_price() -> f64 {
    100.0
}

fn default_fallback_max_drift() -> f64 {
    0.005
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "rest_primary".into(),
            kind: ProviderKind::Primary,
            base_url: "https://quotes.primary.example.com".into(),
            api_key: String::new(),
            asset_class: AssetClass::Stock,
        },
        ProviderConfig {
            name: "rest_secondary".into(),
            kind: ProviderKind::Secondary,
            base_url: "https://quotes.secondary.example.com".into(),
            api_key: String::new(),
            asset_class: AssetClass::Stock,
        },
        ProviderConfig {
            name: "altfeed".into(),
            kind: ProviderKind::AltAsset,
            base_url: "https://api.altfeed.example.com".into(),
            api_key: String::new(),
            asset_class: AssetClass::Crypto,
        },
    ]
}

// =============================================================================
// Provider configuration
// =============================================================================

/// Which concrete adapter to build for an upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Primary REST quote API (flat JSON payload).
    Primary,
    /// Secondary REST API (nested, string-encoded payload).
    Secondary,
    /// 24/7 alternative-asset API (crypto-style price + 24h range).
    AltAsset,
}

/// One upstream market-data source. Order in the provider list is failover
/// priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Filled from the environment when empty (see [`EngineConfig::apply_env`]).
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub asset_class: AssetClass,
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Complete engine configuration with serde defaults on every field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upstream providers, in failover priority order.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    // ── Cadences ────────────────────────────────────────────────────────
    #[serde(default = "default_quote_interval_secs")]
    pub quote_interval_secs: u64,
    #[serde(default = "default_indicator_interval_secs")]
    pub indicator_interval_secs: u64,
    #[serde(default = "default_signal_interval_secs")]
    pub signal_interval_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_bucket_cleanup_interval_secs")]
    pub bucket_cleanup_interval_secs: u64,

    // ── History ─────────────────────────────────────────────────────────
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    // ── Providers / acquisition ─────────────────────────────────────────
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    /// Static seed prices used by the fallback generator when a symbol has
    /// no history at all.
    #[serde(default)]
    pub fallback_seed_prices: HashMap<String, f64>,
    #[serde(default = "default_fallback_seed_price")]
    pub fallback_seed_price: f64,
    /// Maximum relative perturbation applied by the fallback generator.
    #[serde(default = "default_fallback_max_drift")]
    pub fallback_max_drift: f64,

    // ── Indicators ──────────────────────────────────────────────────────
    #[serde(default = "default_sma_period")]
    pub sma_period: usize,
    #[serde(default = "default_ema_period")]
    pub ema_period: usize,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_bollinger_period")]
    pub bollinger_period: usize,
    #[serde(default = "default_bollinger_k")]
    pub bollinger_k: f64,

    // ── Signals ─────────────────────────────────────────────────────────
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "default_base_confidence")]
    pub base_confidence: f64,
    #[serde(default = "default_max_confidence")]
    pub max_confidence: f64,
    #[serde(default = "default_bollinger_confidence")]
    pub bollinger_confidence: f64,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_signal_ttl_secs")]
    pub signal_ttl_secs: u64,

    // ── Distribution ────────────────────────────────────────────────────
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config deserialises from defaults")
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            providers = config.providers.len(),
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Fill empty provider API keys from the environment. The variable name
    /// is derived from the provider name: `PULSEFEED_<NAME>_API_KEY`.
    pub fn apply_env(&mut self) {
        for provider in &mut self.providers {
            if provider.api_key.is_empty() {
                let var = format!("PULSEFEED_{}_API_KEY", provider.name.to_uppercase());
                if let Ok(key) = std::env::var(&var) {
                    provider.api_key = key;
                }
            }
        }
    }

    /// Seed price for the fallback generator when a symbol has no history.
    pub fn seed_price(&self, symbol: &str) -> f64 {
        self.fallback_seed_prices
            .get(symbol)
            .copied()
            .unwrap_or(self.fallback_seed_price)
    }
}
