// =============================================================================
// Shared types used across the PulseFeed distribution engine
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSet;
use crate::signals::Signal;

/// Source tag attached to every quote so consumers can distinguish live data
/// from the synthetic fallback generator.
pub const SOURCE_SYNTHETIC: &str = "synthetic";

/// Broad asset classification carried on every quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Stock,
    Crypto,
}

impl Default for AssetClass {
    fn default() -> Self {
        Self::Stock
    }
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stock => write!(f, "stock"),
            Self::Crypto => write!(f, "crypto"),
        }
    }
}

/// A single OHLCV observation for one symbol at one point in time.
///
/// Immutable once constructed: the history store clones quotes out to
/// readers, so a quote is never observed half-written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    /// UNIX timestamp in milliseconds.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread: Option<f64>,
    #[serde(default)]
    pub asset_class: AssetClass,
    /// Name of the provider that produced this quote, or `"synthetic"`.
    pub source: String,
}

impl Quote {
    /// True when this quote came from the fallback generator rather than a
    /// live upstream provider.
    pub fn is_synthetic(&self) -> bool {
        self.source == SOURCE_SYNTHETIC
    }
}

// =============================================================================
// Wire envelope
// =============================================================================

/// Outbound message envelope pushed to subscriber connections.
///
/// Serialises as `{"type": "...", ...}` so the transport layer can route on
/// the tag without knowing the payload shape. Keeping this a tagged enum
/// (instead of loose JSON objects) makes serialisation exhaustive: adding a
/// message kind without wiring it up is a compile error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    MarketData {
        symbol: String,
        data: Quote,
        timestamp: i64,
    },
    Indicators {
        symbol: String,
        data: IndicatorSet,
        timestamp: i64,
    },
    Signals {
        symbol: String,
        data: Vec<Signal>,
        timestamp: i64,
    },
    SubscriptionConfirmed {
        symbols: Vec<String>,
        timestamp: i64,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
        message: String,
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
}

impl WireMessage {
    /// Short tag used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MarketData { .. } => "market_data",
            Self::Indicators { .. } => "indicators",
            Self::Signals { .. } => "signals",
            Self::SubscriptionConfirmed { .. } => "subscription_confirmed",
            Self::Error { .. } => "error",
            Self::Pong { .. } => "pong",
        }
    }
}

/// Current UNIX timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn sample_quote(symbol: &str, ts: i64, close: f64) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            timestamp: ts,
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 1000.0,
            bid: Some(close - 0.01),
            ask: Some(close + 0.01),
            spread: Some(0.02),
            asset_class: AssetClass::Stock,
            source: "rest_primary".to_string(),
        }
    }

    #[test]
    fn wire_envelope_carries_type_tag() {
        let msg = WireMessage::MarketData {
            symbol: "AAPL".into(),
            data: sample_quote("AAPL", 1_700_000_000_000, 174.2),
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "market_data");
        assert_eq!(json["symbol"], "AAPL");
        assert_eq!(json["data"]["close"], 174.2);
    }

    #[test]
    fn pong_round_trips() {
        let msg = WireMessage::Pong {
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: WireMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), "pong");
    }

    #[test]
    fn error_message_omits_missing_symbol() {
        let msg = WireMessage::Error {
            symbol: None,
            message: "rate limit exceeded".into(),
            timestamp: 0,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("symbol").is_none());
        assert_eq!(json["type"], "error");
    }

    #[test]
    fn synthetic_detection() {
        let mut q = sample_quote("BTC", 0, 40_000.0);
        assert!(!q.is_synthetic());
        q.source = SOURCE_SYNTHETIC.to_string();
        assert!(q.is_synthetic());
    }
}
