// =============================================================================
// Signal Generator: rule engine over the latest indicator snapshot
// =============================================================================
//
// Two rule families run independently each evaluation:
//   RSI rule       : oversold + rising close  => BUY
//                     overbought + falling close => SELL
//   Bollinger rule : close at/below lower band => BUY (target: middle band)
//                     close at/above upper band  => SELL (target: middle band)
//
// A symbol may emit both an RSI-triggered and a Bollinger-triggered signal in
// the same tick. Each candidate is independently checked against the dedup
// window (same symbol + action within the window is suppressed) before it
// enters the live set, and every signal expires `ttl` after creation.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::indicators::{IndicatorKind, IndicatorSet};

// =============================================================================
// Signal types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Coarse classification derived from confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalStrength {
    Weak,
    Moderate,
    Strong,
}

impl SignalStrength {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.85 {
            Self::Strong
        } else if confidence >= 0.75 {
            Self::Moderate
        } else {
            Self::Weak
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalCategory {
    Entry,
    Exit,
    Alert,
}

/// A derived trading recommendation pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    /// UNIX timestamp (ms) of generation.
    pub timestamp: i64,
    pub action: SignalAction,
    pub confidence: f64,
    pub price_target: f64,
    pub current_price: f64,
    /// Ordered, human-readable justification for the signal.
    pub reasoning: Vec<String>,
    pub strength: SignalStrength,
    pub category: SignalCategory,
    /// UNIX timestamp (ms) after which the signal is discarded.
    pub expires_at: i64,
}

// =============================================================================
// Rule parameters & evaluation
// =============================================================================

/// Tunable thresholds for the rule engine. The confidence formulas are
/// empirically chosen constants carried over from production, exposed as
/// configuration rather than hard-coded.
#[derive(Debug, Clone, Copy)]
pub struct SignalRuleParams {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub base_confidence: f64,
    pub max_confidence: f64,
    pub bollinger_confidence: f64,
    pub ttl_ms: i64,
}

impl Default for SignalRuleParams {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            base_confidence: 0.75,
            max_confidence: 0.95,
            bollinger_confidence: 0.70,
            ttl_ms: 3_600_000,
        }
    }
}

fn make_signal(
    symbol: &str,
    action: SignalAction,
    confidence: f64,
    price_target: f64,
    current_price: f64,
    reasoning: Vec<String>,
    now_ms: i64,
    ttl_ms: i64,
) -> Signal {
    Signal {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        timestamp: now_ms,
        action,
        confidence,
        price_target,
        current_price,
        reasoning,
        strength: SignalStrength::from_confidence(confidence),
        category: SignalCategory::Entry,
        expires_at: now_ms + ttl_ms,
    }
}

/// Evaluate the rule set for one symbol against its latest indicator
/// snapshot and the last two closes.
///
/// Returns zero, one, or two candidates (at most one RSI-triggered and one
/// Bollinger-triggered per evaluation). Candidates are *not* yet deduped -
/// the caller runs them through [`SignalBook::try_insert`].
pub fn evaluate_rules(
    symbol: &str,
    closes: &[f64],
    set: &IndicatorSet,
    params: &SignalRuleParams,
    now_ms: i64,
) -> Vec<Signal> {
    let mut candidates = Vec::new();

    if closes.len() < 2 {
        return candidates;
    }
    let last = closes[closes.len() - 1];
    let prev = closes[closes.len() - 2];

    // ── RSI rule ────────────────────────────────────────────────────────
    if let Some(rsi) = set.get(IndicatorKind::Rsi) {
        if rsi < params.rsi_oversold && last > prev {
            let confidence = (params.base_confidence
                + (params.rsi_oversold - rsi) / 100.0)
                .min(params.max_confidence);
            candidates.push(make_signal(
                symbol,
                SignalAction::Buy,
                confidence,
                last,
                last,
                vec![
                    format!("RSI {rsi:.1} below oversold threshold {}", params.rsi_oversold),
                    format!("price rising: {prev:.4} -> {last:.4}"),
                ],
                now_ms,
                params.ttl_ms,
            ));
        } else if rsi > params.rsi_overbought && last < prev {
            let confidence = (params.base_confidence
                + (rsi - params.rsi_overbought) / 100.0)
                .min(params.max_confidence);
            candidates.push(make_signal(
                symbol,
                SignalAction::Sell,
                confidence,
                last,
                last,
                vec![
                    format!(
                        "RSI {rsi:.1} above overbought threshold {}",
                        params.rsi_overbought
                    ),
                    format!("price falling: {prev:.4} -> {last:.4}"),
                ],
                now_ms,
                params.ttl_ms,
            ));
        }
    }

    // ── Bollinger rule ──────────────────────────────────────────────────
    if let (Some(upper), Some(middle), Some(lower)) = (
        set.get(IndicatorKind::BollingerUpper),
        set.get(IndicatorKind::BollingerMiddle),
        set.get(IndicatorKind::BollingerLower),
    ) {
        if last <= lower {
            candidates.push(make_signal(
                symbol,
                SignalAction::Buy,
                params.bollinger_confidence,
                middle,
                last,
                vec![format!(
                    "close {last:.4} at or below lower Bollinger band {lower:.4}"
                )],
                now_ms,
                params.ttl_ms,
            ));
        } else if last >= upper {
            candidates.push(make_signal(
                symbol,
                SignalAction::Sell,
                params.bollinger_confidence,
                middle,
                last,
                vec![format!(
                    "close {last:.4} at or above upper Bollinger band {upper:.4}"
                )],
                now_ms,
                params.ttl_ms,
            ));
        }
    }

    candidates
}

// =============================================================================
// SignalBook: live signal set with dedup and expiry
// =============================================================================

/// Per-symbol live signal set.
///
/// The signal loop is the single writer; query handlers read concurrently.
pub struct SignalBook {
    signals: RwLock<HashMap<String, Vec<Signal>>>,
    dedup_window_ms: i64,
}

impl SignalBook {
    pub fn new(dedup_window_ms: i64) -> Self {
        Self {
            signals: RwLock::new(HashMap::new()),
            dedup_window_ms,
        }
    }

    /// Accept a candidate unless an equivalent (same symbol + action) signal
    /// was emitted within the dedup window. Returns `true` when accepted.
    pub fn try_insert(&self, signal: Signal, now_ms: i64) -> bool {
        let mut map = self.signals.write();
        let entries = map.entry(signal.symbol.clone()).or_default();

        let duplicate = entries.iter().any(|s| {
            s.action == signal.action && now_ms - s.timestamp < self.dedup_window_ms
        });
        if duplicate {
            debug!(
                symbol = %signal.symbol,
                action = %signal.action,
                "signal suppressed by dedup window"
            );
            return false;
        }

        entries.push(signal);
        true
    }

    /// Drop every signal past its expiry.
    pub fn prune(&self, now_ms: i64) {
        let mut map = self.signals.write();
        for entries in map.values_mut() {
            entries.retain(|s| s.expires_at > now_ms);
        }
        map.retain(|_, entries| !entries.is_empty());
    }

    /// Live (non-expired) signals for a symbol, in generation order.
    pub fn active(&self, symbol: &str, now_ms: i64) -> Vec<Signal> {
        let map = self.signals.read();
        map.get(symbol)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|s| s.expires_at > now_ms)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
