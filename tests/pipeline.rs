// =============================================================================
// End-to-end pipeline tests: scripted providers, no network
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use pulsefeed::config::EngineConfig;
use pulsefeed::connection::Connection;
use pulsefeed::error::{FeedError, Result};
use pulsefeed::providers::QuoteProvider;
use pulsefeed::signals::SignalAction;
use pulsefeed::types::{AssetClass, Quote, WireMessage};
use pulsefeed::Engine;

/// Serves a pre-programmed sequence of closes, one per `fetch_quote` call,
/// with strictly increasing timestamps. Repeats the last close once the
/// script runs out.
struct SeqProvider {
    closes: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
    ts: AtomicI64,
}

impl SeqProvider {
    fn new(closes: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            closes: Mutex::new(closes.iter().copied().collect()),
            last: Mutex::new(closes.last().copied().unwrap_or(100.0)),
            ts: AtomicI64::new(1_700_000_000_000),
        })
    }
}

#[async_trait]
impl QuoteProvider for SeqProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote> {
        let close = match self.closes.lock().pop_front() {
            Some(c) => {
                *self.last.lock() = c;
                c
            }
            None => *self.last.lock(),
        };
        let ts = self.ts.fetch_add(1_000, Ordering::Relaxed);
        Ok(Quote {
            symbol: symbol.to_string(),
            timestamp: ts,
            open: close,
            high: close + 0.1,
            low: close - 0.1,
            close,
            volume: 1_000.0,
            bid: None,
            ask: None,
            spread: None,
            asset_class: AssetClass::Stock,
            source: "scripted".to_string(),
        })
    }

    async fn fetch_history(&self, _symbol: &str, _days: u32) -> Result<Vec<Quote>> {
        Ok(Vec::new())
    }
}

/// Always-failing provider for exercising the synthetic fallback.
struct DeadProvider;

#[async_trait]
impl QuoteProvider for DeadProvider {
    fn name(&self) -> &str {
        "dead"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_quote(&self, _symbol: &str) -> Result<Quote> {
        Err(FeedError::ProviderUnavailable {
            provider: "dead".into(),
            reason: "always down".into(),
        })
    }

    async fn fetch_history(&self, _symbol: &str, _days: u32) -> Result<Vec<Quote>> {
        Err(FeedError::ProviderUnavailable {
            provider: "dead".into(),
            reason: "always down".into(),
        })
    }
}

async fn subscribed_engine(
    config: EngineConfig,
    provider: Arc<dyn QuoteProvider>,
    symbol: &str,
) -> (Arc<Engine>, Arc<Connection>, mpsc::Receiver<WireMessage>) {
    let engine = Engine::with_providers(config, vec![provider]).unwrap();
    let (conn, mut rx) = engine.register_connection();
    engine
        .subscribe(conn.id, &[symbol.to_string()])
        .await
        .unwrap();

    // Consume the subscription ack so tests only see pipeline traffic.
    assert_eq!(rx.try_recv().unwrap().kind(), "subscription_confirmed");
    (engine, conn, rx)
}

fn drain(rx: &mut mpsc::Receiver<WireMessage>) -> Vec<WireMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

#[tokio::test]
async fn rsi_buy_signal_end_to_end() {
    // Steep downtrend, final up-tick: RSI deeply oversold and rising.
    let mut closes: Vec<f64> = (0..24).map(|i| 100.0 - i as f64 * 1.5).collect();
    closes.push(closes[23] + 0.5);

    let (engine, _conn, mut rx) =
        subscribed_engine(EngineConfig::default(), SeqProvider::new(&closes), "AAPL").await;

    for _ in 0..closes.len() {
        engine.acquisition_tick().await;
    }
    engine.indicator_tick();
    engine.signal_tick();

    let messages = drain(&mut rx);
    let market_data = messages.iter().filter(|m| m.kind() == "market_data").count();
    assert_eq!(market_data, closes.len());
    assert!(messages.iter().any(|m| m.kind() == "indicators"));

    let signals: Vec<_> = messages
        .into_iter()
        .filter_map(|m| match m {
            WireMessage::Signals { data, .. } => Some(data),
            _ => None,
        })
        .flatten()
        .collect();
    let buy = signals
        .iter()
        .find(|s| s.action == SignalAction::Buy)
        .expect("expected a BUY signal");
    assert!(buy.confidence >= 0.75 && buy.confidence <= 0.95);
    assert!(buy.expires_at > buy.timestamp);

    // Pull query agrees with the pushed signal.
    let live = engine.get_signals("AAPL");
    assert!(live.iter().any(|s| s.id == buy.id));
}

#[tokio::test]
async fn bollinger_sell_targets_middle_band() {
    // Mild variance so the bands have width, then a spike through the top.
    let mut closes: Vec<f64> = (0..24).map(|i| 100.0 + (i % 5) as f64 * 0.1).collect();
    closes.push(115.0);

    let (engine, _conn, mut rx) =
        subscribed_engine(EngineConfig::default(), SeqProvider::new(&closes), "TSLA").await;

    for _ in 0..closes.len() {
        engine.acquisition_tick().await;
    }
    engine.indicator_tick();
    engine.signal_tick();

    let sells: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|m| match m {
            WireMessage::Signals { data, .. } => Some(data),
            _ => None,
        })
        .flatten()
        .filter(|s| s.action == SignalAction::Sell)
        .collect();
    assert_eq!(sells.len(), 1);

    let set = engine.get_indicators("TSLA").unwrap();
    let middle = set
        .get(pulsefeed::indicators::IndicatorKind::BollingerMiddle)
        .unwrap();
    assert!((sells[0].price_target - middle).abs() < 1e-9);
    assert!((sells[0].confidence - 0.70).abs() < f64::EPSILON);
}

#[tokio::test]
async fn signal_dedup_across_ticks() {
    let mut closes: Vec<f64> = (0..24).map(|i| 100.0 - i as f64 * 1.5).collect();
    closes.push(closes[23] + 0.5);

    let (engine, _conn, mut rx) =
        subscribed_engine(EngineConfig::default(), SeqProvider::new(&closes), "AAPL").await;

    for _ in 0..closes.len() {
        engine.acquisition_tick().await;
    }
    engine.indicator_tick();
    engine.signal_tick();
    // Same state evaluated again well inside the dedup window.
    engine.signal_tick();
    engine.signal_tick();

    let signal_batches = drain(&mut rx)
        .into_iter()
        .filter(|m| m.kind() == "signals")
        .count();
    assert_eq!(signal_batches, 1);
}

#[tokio::test]
async fn rate_limit_drops_surplus_and_notifies_once() {
    let mut config = EngineConfig::default();
    config.rate_limit_per_sec = 5;

    let (engine, conn, mut rx) =
        subscribed_engine(config, SeqProvider::new(&[100.0]), "AAPL").await;

    // 10 acquisition ticks in one burst against a 5-token bucket.
    for _ in 0..10 {
        engine.acquisition_tick().await;
    }

    let messages = drain(&mut rx);
    let delivered = messages.iter().filter(|m| m.kind() == "market_data").count();
    let notices = messages.iter().filter(|m| m.kind() == "error").count();
    assert_eq!(delivered, 5);
    assert_eq!(notices, 1);
    assert_eq!(conn.bucket.dropped_total(), 5);

    // A rate-limited connection is throttled, not closed.
    assert!(conn.is_active());
}

#[tokio::test]
async fn all_providers_down_keeps_pipeline_alive() {
    let (engine, _conn, mut rx) =
        subscribed_engine(EngineConfig::default(), Arc::new(DeadProvider), "AAPL").await;

    for _ in 0..5 {
        engine.acquisition_tick().await;
    }

    let quotes = engine.history_window("AAPL", 10);
    assert_eq!(quotes.len(), 5);
    assert!(quotes.iter().all(|q| q.is_synthetic()));

    // Each synthetic step stays inside the configured drift bound.
    for pair in quotes.windows(2) {
        let rel = (pair[1].close - pair[0].close).abs() / pair[0].close;
        assert!(rel <= 0.005 + 1e-9);
    }

    let delivered = drain(&mut rx)
        .into_iter()
        .filter(|m| m.kind() == "market_data")
        .count();
    assert_eq!(delivered, 5);
}

/// Fails the first call, then serves quotes stamped with a fixed past
/// timestamp, the way daily-bar REST APIs do after an outage.
struct RecoveringProvider {
    calls: AtomicU32,
}

#[async_trait]
impl QuoteProvider for RecoveringProvider {
    fn name(&self) -> &str {
        "bar_feed"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote> {
        if self.calls.fetch_add(1, Ordering::Relaxed) == 0 {
            return Err(FeedError::ProviderUnavailable {
                provider: "bar_feed".into(),
                reason: "transient outage".into(),
            });
        }
        Ok(Quote {
            symbol: symbol.to_string(),
            // Yesterday's daily bar, re-served on every poll.
            timestamp: 1_700_000_000_000,
            open: 100.0,
            high: 100.5,
            low: 99.5,
            close: 100.0,
            volume: 1_000.0,
            bid: None,
            ask: None,
            spread: None,
            asset_class: AssetClass::Stock,
            source: "bar_feed".to_string(),
        })
    }

    async fn fetch_history(&self, _symbol: &str, _days: u32) -> Result<Vec<Quote>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn provider_recovery_after_fallback_resumes_appends() {
    let provider = Arc::new(RecoveringProvider {
        calls: AtomicU32::new(0),
    });
    let (engine, _conn, mut rx) =
        subscribed_engine(EngineConfig::default(), provider, "AAPL").await;

    // Tick 1 falls back to a synthetic quote stamped with the wall clock;
    // the recovered provider's bar timestamps are older than that forever.
    for _ in 0..6 {
        engine.acquisition_tick().await;
    }

    let quotes = engine.history_window("AAPL", 10);
    assert_eq!(quotes.len(), 6);
    assert!(quotes[0].is_synthetic());
    assert!(quotes[1..].iter().all(|q| q.source == "bar_feed"));
    for pair in quotes.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }

    let delivered = drain(&mut rx)
        .into_iter()
        .filter(|m| m.kind() == "market_data")
        .count();
    assert_eq!(delivered, 6);
}

/// Never resolves a quote for "SLOW"; serves everything else immediately.
struct SelectiveHangProvider;

#[async_trait]
impl QuoteProvider for SelectiveHangProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote> {
        if symbol == "SLOW" {
            std::future::pending::<()>().await;
        }
        Ok(Quote {
            symbol: symbol.to_string(),
            timestamp: 1_700_000_000_000,
            open: 100.0,
            high: 100.5,
            low: 99.5,
            close: 100.0,
            volume: 1_000.0,
            bid: None,
            ask: None,
            spread: None,
            asset_class: AssetClass::Stock,
            source: "flaky".to_string(),
        })
    }

    async fn fetch_history(&self, _symbol: &str, _days: u32) -> Result<Vec<Quote>> {
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn hung_symbol_does_not_block_other_polls() {
    let engine = Engine::with_providers(
        EngineConfig::default(),
        vec![Arc::new(SelectiveHangProvider)],
    )
    .unwrap();
    let (conn, mut rx) = engine.register_connection();
    engine
        .subscribe(conn.id, &["SLOW".to_string(), "FAST".to_string()])
        .await
        .unwrap();
    assert_eq!(rx.try_recv().unwrap().kind(), "subscription_confirmed");

    // Tick 1 detaches the hung poll once the period budget elapses; tick 2
    // skips the still-running symbol and polls the healthy one on schedule.
    engine.acquisition_tick().await;
    engine.acquisition_tick().await;

    assert_eq!(engine.history_window("FAST", 10).len(), 2);
    assert!(engine.history_window("SLOW", 10).is_empty());
}

#[tokio::test]
async fn last_unsubscribe_stops_polling() {
    let (engine, conn, mut rx) =
        subscribed_engine(EngineConfig::default(), SeqProvider::new(&[100.0]), "AAPL").await;

    engine.acquisition_tick().await;
    assert_eq!(engine.history_window("AAPL", 10).len(), 1);

    engine.unsubscribe(conn.id, &["AAPL".to_string()]).unwrap();
    engine.acquisition_tick().await;
    engine.indicator_tick();

    // No new quotes and no further pushes after the confirm.
    assert_eq!(engine.history_window("AAPL", 10).len(), 1);
    let kinds: Vec<_> = drain(&mut rx).iter().map(|m| m.kind()).collect();
    assert_eq!(
        kinds,
        vec!["market_data", "subscription_confirmed"]
    );
}

/// No live quotes, but 3 days of daily history.
struct HistoryOnlyProvider;

#[async_trait]
impl QuoteProvider for HistoryOnlyProvider {
    fn name(&self) -> &str {
        "archive"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_quote(&self, _symbol: &str) -> Result<Quote> {
        Err(FeedError::ProviderUnavailable {
            provider: "archive".into(),
            reason: "no live quotes".into(),
        })
    }

    async fn fetch_history(&self, symbol: &str, days: u32) -> Result<Vec<Quote>> {
        Ok((0..days.min(3) as i64)
            .map(|i| Quote {
                symbol: symbol.to_string(),
                timestamp: 1_700_000_000_000 + i * 86_400_000,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + i as f64,
                volume: 1_000.0,
                bid: None,
                ask: None,
                spread: None,
                asset_class: AssetClass::Stock,
                source: "archive".to_string(),
            })
            .collect())
    }
}

#[tokio::test]
async fn get_history_prefers_providers_over_memory() {
    // Dead primary, archive secondary: failover reaches the archive, and the
    // first subscribe back-fills the ring from it.
    let engine = Engine::with_providers(
        EngineConfig::default(),
        vec![Arc::new(DeadProvider), Arc::new(HistoryOnlyProvider)],
    )
    .unwrap();
    let (conn, _rx) = engine.register_connection();
    engine
        .subscribe(conn.id, &["AAPL".to_string()])
        .await
        .unwrap();

    let quotes = engine.get_history("AAPL", 30).await;
    assert_eq!(quotes.len(), 3);
    assert_eq!(quotes[0].source, "archive");

    assert_eq!(engine.history_window("AAPL", 10).len(), 3);
}

#[tokio::test]
async fn zero_timeout_sweep_evicts_and_releases_symbol() {
    let mut config = EngineConfig::default();
    config.heartbeat_timeout_secs = 0;

    let (engine, conn, _rx) =
        subscribed_engine(config, SeqProvider::new(&[100.0]), "AAPL").await;

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    engine.sweep_tick();

    assert_eq!(engine.connection_count(), 0);
    assert!(engine.heartbeat(conn.id).is_err());

    // Polling stopped with the last subscriber gone.
    engine.acquisition_tick().await;
    assert!(engine.history_window("AAPL", 10).is_empty());
}
