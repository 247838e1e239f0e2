// =============================================================================
// Indicator Engine
// =============================================================================
//
// Pure, side-effect-free implementations of the core technical indicators,
// plus the per-symbol snapshot cache the distribution layer reads from.
// Every calculation returns `Option<T>` so callers are forced to handle
// insufficient-data and numerical-edge-case scenarios: an absent indicator
// is absent from the snapshot, never a zero.

pub mod bollinger;
pub mod moving_average;
pub mod rsi;

pub use bollinger::{bollinger, BollingerBands};
pub use moving_average::{ema, sma};
pub use rsi::rsi;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// =============================================================================
// Snapshot types
// =============================================================================

/// Which indicator a value belongs to. One configured period per kind, so
/// the kind alone keys a symbol's snapshot map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
    BollingerUpper,
    BollingerMiddle,
    BollingerLower,
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Sma => "SMA",
            Self::Ema => "EMA",
            Self::Rsi => "RSI",
            Self::BollingerUpper => "BOLLINGER_UPPER",
            Self::BollingerMiddle => "BOLLINGER_MIDDLE",
            Self::BollingerLower => "BOLLINGER_LOWER",
        };
        write!(f, "{name}")
    }
}

/// One computed indicator value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Indicator {
    pub kind: IndicatorKind,
    pub value: f64,
    /// Look-back period the value was computed over.
    pub period: usize,
    /// UNIX timestamp (ms) of the computation.
    pub timestamp: i64,
}

/// All indicators computed for one symbol from one history window.
///
/// The `values` map only contains indicators whose preconditions held; an
/// indicator missing its minimum history is simply absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub symbol: String,
    pub timestamp: i64,
    pub values: HashMap<IndicatorKind, Indicator>,
}

impl IndicatorSet {
    pub fn get(&self, kind: IndicatorKind) -> Option<f64> {
        self.values.get(&kind).map(|i| i.value)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Periods the engine computes with, lifted from the runtime config.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorParams {
    pub sma_period: usize,
    pub ema_period: usize,
    pub rsi_period: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            sma_period: 20,
            ema_period: 12,
            rsi_period: 14,
            bollinger_period: 20,
            bollinger_k: 2.0,
        }
    }
}

/// Compute the full indicator snapshot for one symbol.
///
/// Each indicator degrades independently: insufficient history for one does
/// not affect the others.
pub fn compute_set(
    symbol: &str,
    closes: &[f64],
    params: &IndicatorParams,
    timestamp: i64,
) -> IndicatorSet {
    let mut values = HashMap::new();

    let mut put = |kind: IndicatorKind, value: f64, period: usize| {
        values.insert(
            kind,
            Indicator {
                kind,
                value,
                period,
                timestamp,
            },
        );
    };

    if let Some(v) = sma(closes, params.sma_period) {
        put(IndicatorKind::Sma, v, params.sma_period);
    }
    if let Some(v) = ema(closes, params.ema_period) {
        put(IndicatorKind::Ema, v, params.ema_period);
    }
    if let Some(v) = rsi(closes, params.rsi_period) {
        put(IndicatorKind::Rsi, v, params.rsi_period);
    }
    if let Some(bb) = bollinger(closes, params.bollinger_period, params.bollinger_k) {
        put(IndicatorKind::BollingerUpper, bb.upper, params.bollinger_period);
        put(IndicatorKind::BollingerMiddle, bb.middle, params.bollinger_period);
        put(IndicatorKind::BollingerLower, bb.lower, params.bollinger_period);
    }

    IndicatorSet {
        symbol: symbol.to_string(),
        timestamp,
        values,
    }
}

// =============================================================================
// IndicatorCache: publish-then-swap snapshot store
// =============================================================================

/// Latest indicator snapshot per symbol.
///
/// The indicator loop is the single writer; query handlers and the signal
/// loop read concurrently. A snapshot is built off to the side and swapped
/// in as one `Arc`, so readers always see a complete set: never a
/// half-updated one.
pub struct IndicatorCache {
    sets: RwLock<HashMap<String, Arc<IndicatorSet>>>,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self {
            sets: RwLock::new(HashMap::new()),
        }
    }

    /// Atomically replace the cached snapshot for the set's symbol.
    pub fn publish(&self, set: IndicatorSet) -> Arc<IndicatorSet> {
        let set = Arc::new(set);
        self.sets
            .write()
            .insert(set.symbol.clone(), Arc::clone(&set));
        set
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<IndicatorSet>> {
        self.sets.read().get(symbol).cloned()
    }

    pub fn remove(&self, symbol: &str) {
        self.sets.write().remove(symbol);
    }
}

impl Default for IndicatorCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_set_all_present_with_enough_history() {
        let closes: Vec<f64> = (1..=40).map(|x| 100.0 + x as f64).collect();
        let set = compute_set("AAPL", &closes, &IndicatorParams::default(), 0);
        assert_eq!(set.values.len(), 6);
        assert!(set.get(IndicatorKind::Sma).is_some());
        assert!(set.get(IndicatorKind::BollingerLower).is_some());
    }

    #[test]
    fn compute_set_degrades_per_indicator() {
        // 15 closes: RSI(14) and EMA(12) have enough history, SMA(20) and
        // Bollinger(20) do not.
        let closes: Vec<f64> = (1..=15).map(|x| x as f64).collect();
        let set = compute_set("AAPL", &closes, &IndicatorParams::default(), 0);
        assert!(set.get(IndicatorKind::Rsi).is_some());
        assert!(set.get(IndicatorKind::Ema).is_some());
        assert!(set.get(IndicatorKind::Sma).is_none());
        assert!(set.get(IndicatorKind::BollingerMiddle).is_none());
    }

    #[test]
    fn compute_set_empty_history() {
        let set = compute_set("AAPL", &[], &IndicatorParams::default(), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn cache_swap_replaces_whole_set() {
        let cache = IndicatorCache::new();
        let closes: Vec<f64> = (1..=40).map(|x| x as f64).collect();

        cache.publish(compute_set("AAPL", &closes, &IndicatorParams::default(), 100));
        let first = cache.get("AAPL").unwrap();
        assert_eq!(first.timestamp, 100);

        cache.publish(compute_set("AAPL", &closes, &IndicatorParams::default(), 200));
        let second = cache.get("AAPL").unwrap();
        assert_eq!(second.timestamp, 200);

        // The old Arc is still intact for any reader holding it.
        assert_eq!(first.timestamp, 100);
    }

    #[test]
    fn kind_serialises_as_screaming_snake() {
        let json = serde_json::to_string(&IndicatorKind::BollingerUpper).unwrap();
        assert_eq!(json, r#""BOLLINGER_UPPER""#);
    }

    #[test]
    fn set_serialises_with_kind_keys() {
        let closes: Vec<f64> = (1..=40).map(|x| x as f64).collect();
        let set = compute_set("AAPL", &closes, &IndicatorParams::default(), 0);
        let json = serde_json::to_value(&set).unwrap();
        assert!(json["values"].get("RSI").is_some());
        assert!(json["values"].get("SMA").is_some());
    }
}
