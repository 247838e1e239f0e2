// =============================================================================
// Engine: wires acquisition, indicators, signals and distribution together
// =============================================================================
//
// One `Engine` per process, shared as an `Arc`. Five periodic loops run the
// pipeline:
//
//   acquisition @ quote_interval      poll/synthesize quotes, push market_data
//   indicators  @ indicator_interval  recompute snapshots, push indicators
//   signals     @ signal_interval     evaluate rules, push fresh signals
//   sweep       @ sweep_interval      evict heartbeat-silent connections
//   cleanup     @ cleanup interval    reap externally-closed connections
//
// All loops stop on the shutdown watch channel. Everything here is also
// callable directly (the `*_tick` methods) so tests drive the pipeline
// deterministically without waiting on timers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::acquisition::{acquire, synthesize_fallback, AcquisitionResult, FallbackParams};
use crate::config::EngineConfig;
use crate::connection::{CloseReason, Connection, ConnState, ConnectionTable};
use crate::distribution::Distributor;
use crate::error::{FeedError, Result};
use crate::history::HistoryStore;
use crate::indicators::{compute_set, IndicatorCache, IndicatorParams, IndicatorSet};
use crate::providers::{build_providers, QuoteProvider};
use crate::registry::SubscriptionRegistry;
use crate::signals::{evaluate_rules, Signal, SignalBook, SignalRuleParams};
use crate::types::{now_ms, AssetClass, Quote, WireMessage};

pub struct Engine {
    config: EngineConfig,
    providers: Vec<Arc<dyn QuoteProvider>>,
    history: HistoryStore,
    indicators: IndicatorCache,
    signals: SignalBook,
    registry: Arc<SubscriptionRegistry>,
    connections: Arc<ConnectionTable>,
    distributor: Distributor,
    in_flight: Mutex<HashSet<String>>,
    shutdown: watch::Sender<bool>,
}

impl Engine {
    /// Build an engine from configuration, constructing one provider adapter
    /// per configured upstream.
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        let providers = build_providers(&config.providers);
        Self::with_providers(config, providers)
    }

    /// Build an engine around an explicit provider chain. Fails when the
    /// chain is empty: a feed with no upstream sources (even unhealthy ones)
    /// is a deployment mistake, not something to fall back from.
    pub fn with_providers(
        config: EngineConfig,
        providers: Vec<Arc<dyn QuoteProvider>>,
    ) -> Result<Arc<Self>> {
        if providers.is_empty() {
            return Err(FeedError::Config(
                "no providers configured".to_string(),
            ));
        }

        let registry = Arc::new(SubscriptionRegistry::new());
        let connections = Arc::new(ConnectionTable::new(
            config.outbound_queue_depth,
            config.rate_limit_per_sec,
        ));
        let distributor = Distributor::new(Arc::clone(&registry), Arc::clone(&connections));
        let (shutdown, _) = watch::channel(false);

        info!(
            providers = providers.len(),
            history_capacity = config.history_capacity,
            rate_limit_per_sec = config.rate_limit_per_sec,
            "engine initialised"
        );

        Ok(Arc::new(Self {
            history: HistoryStore::new(config.history_capacity),
            indicators: IndicatorCache::new(),
            signals: SignalBook::new(config.dedup_window_secs as i64 * 1000),
            registry,
            connections,
            distributor,
            in_flight: Mutex::new(HashSet::new()),
            shutdown,
            providers,
            config,
        }))
    }

    fn indicator_params(&self) -> IndicatorParams {
        IndicatorParams {
            sma_period: self.config.sma_period,
            ema_period: self.config.ema_period,
            rsi_period: self.config.rsi_period,
            bollinger_period: self.config.bollinger_period,
            bollinger_k: self.config.bollinger_k,
        }
    }

    fn rule_params(&self) -> SignalRuleParams {
        SignalRuleParams {
            rsi_oversold: self.config.rsi_oversold,
            rsi_overbought: self.config.rsi_overbought,
            base_confidence: self.config.base_confidence,
            max_confidence: self.config.max_confidence,
            bollinger_confidence: self.config.bollinger_confidence,
            ttl_ms: self.config.signal_ttl_secs as i64 * 1000,
        }
    }

    /// Longest history window any indicator needs.
    fn lookback(&self) -> usize {
        self.config
            .sma_period
            .max(self.config.ema_period)
            .max(self.config.rsi_period + 1)
            .max(self.config.bollinger_period)
    }

    // ────────────────────────────────────────────────────────────────────
    // Connection-facing API (called by the transport layer)
    // ────────────────────────────────────────────────────────────────────

    /// Register a new consumer and complete its handshake. Hands back the
    /// connection and the receiving half of its outbound queue.
    pub fn register_connection(&self) -> (Arc<Connection>, mpsc::Receiver<WireMessage>) {
        let (conn, rx) = self.connections.register();
        conn.activate();
        (conn, rx)
    }

    /// Subscribe a connection to a set of symbols.
    ///
    /// Symbols whose subscriber count transitions 0 -> 1 are back-filled from
    /// the provider chain so indicators have history to work with before the
    /// first poll lands. The connection receives a confirmation listing its
    /// full subscription set.
    pub async fn subscribe(&self, id: Uuid, symbols: &[String]) -> Result<()> {
        let conn = self
            .connections
            .get(id)
            .ok_or(FeedError::UnknownConnection(id))?;
        if !conn.is_active() {
            return Err(FeedError::Protocol(id, "subscribe on closed connection".into()));
        }

        for symbol in symbols {
            if self.registry.subscribe(symbol, id) {
                self.backfill(symbol).await;
            }
        }

        conn.push(WireMessage::SubscriptionConfirmed {
            symbols: self.registry.symbols_of(id),
            timestamp: now_ms(),
        });
        Ok(())
    }

    /// Unsubscribe a connection from a set of symbols. Unknown symbols are
    /// ignored. The confirmation lists the remaining subscription set.
    pub fn unsubscribe(&self, id: Uuid, symbols: &[String]) -> Result<()> {
        let conn = self
            .connections
            .get(id)
            .ok_or(FeedError::UnknownConnection(id))?;

        for symbol in symbols {
            if self.registry.unsubscribe(symbol, id) {
                self.symbol_idle(symbol);
            }
        }

        conn.push(WireMessage::SubscriptionConfirmed {
            symbols: self.registry.symbols_of(id),
            timestamp: now_ms(),
        });
        Ok(())
    }

    /// Record a heartbeat and answer with a pong.
    pub fn heartbeat(&self, id: Uuid) -> Result<()> {
        self.connections.heartbeat(id)?;
        if let Some(conn) = self.connections.get(id) {
            conn.push(WireMessage::Pong { timestamp: now_ms() });
        }
        Ok(())
    }

    /// Close a connection and release its subscriptions.
    pub fn close_connection(&self, id: Uuid, reason: CloseReason) {
        if self.connections.close(id, reason).is_some() {
            for symbol in self.registry.remove_connection(id) {
                self.symbol_idle(&symbol);
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Pull queries
    // ────────────────────────────────────────────────────────────────────

    /// Daily history for a symbol: providers in failover order first, the
    /// in-memory ring as the last resort.
    pub async fn get_history(&self, symbol: &str, days: u32) -> Vec<Quote> {
        if let Some(quotes) = self.provider_history(symbol, days).await {
            return quotes;
        }
        self.history.window(symbol, self.config.history_capacity)
    }

    /// Most recent `count` quotes from the in-memory ring only.
    pub fn history_window(&self, symbol: &str, count: usize) -> Vec<Quote> {
        self.history.window(symbol, count)
    }

    /// Latest indicator snapshot for a symbol, if one has been computed.
    pub fn get_indicators(&self, symbol: &str) -> Option<Arc<IndicatorSet>> {
        self.indicators.get(symbol)
    }

    /// Live (non-expired) signals for a symbol.
    pub fn get_signals(&self, symbol: &str) -> Vec<Signal> {
        self.signals.active(symbol, now_ms())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // ────────────────────────────────────────────────────────────────────
    // Pipeline ticks
    // ────────────────────────────────────────────────────────────────────

    /// One acquisition pass. Each subscribed symbol is polled in its own
    /// spawned task so a slow provider on one symbol cannot stall the rest.
    /// A symbol whose previous poll is still running is skipped, and the
    /// pass waits at most one polling period before detaching stragglers.
    pub async fn acquisition_tick(self: &Arc<Self>) {
        let mut tasks = tokio::task::JoinSet::new();
        for symbol in self.registry.subscribed_symbols() {
            if !self.in_flight.lock().insert(symbol.clone()) {
                debug!(symbol, "previous poll still in flight: skipping");
                continue;
            }
            let engine = Arc::clone(self);
            tasks.spawn(async move {
                engine.acquire_symbol(&symbol).await;
                engine.in_flight.lock().remove(&symbol);
            });
        }

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.quote_interval_secs.max(1));
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    warn!(pending = tasks.len(), "acquisition pass over budget: detaching slow polls");
                    tasks.detach_all();
                    break;
                }
            }
        }
    }

    /// Poll the provider chain for one symbol, fall back to synthesis on
    /// exhaustion, store and distribute the result.
    async fn acquire_symbol(&self, symbol: &str) {
        let timeout = Duration::from_secs(self.config.provider_timeout_secs);

        let mut quote = match acquire(&self.providers, symbol, timeout).await {
            AcquisitionResult::Acquired(q) => q,
            AcquisitionResult::Exhausted => {
                let fallback = FallbackParams {
                    seed_price: self.config.seed_price(symbol),
                    max_drift: self.config.fallback_max_drift,
                };
                let asset_class = self
                    .history
                    .latest(symbol)
                    .map(|q| q.asset_class)
                    .unwrap_or(AssetClass::Stock);
                let q = synthesize_fallback(
                    symbol,
                    self.history.last_close(symbol),
                    &fallback,
                    asset_class,
                );
                debug!(symbol, close = q.close, "all providers exhausted: synthetic quote");
                q
            }
        };

        // Bar-stamped feeds re-serve past timestamps after an outage bridged
        // by synthetic quotes. Restamp to the wall clock rather than dropping
        // live data.
        if let Some(latest) = self.history.latest(symbol) {
            if quote.timestamp < latest.timestamp {
                debug!(
                    symbol,
                    incoming = quote.timestamp,
                    newest = latest.timestamp,
                    "restamping past-stamped quote"
                );
                quote.timestamp = now_ms().max(latest.timestamp);
            }
        }

        let timestamp = quote.timestamp;
        if !self.history.append(quote.clone()) {
            return;
        }
        self.distributor.fan_out(
            symbol,
            &WireMessage::MarketData {
                symbol: symbol.to_string(),
                data: quote,
                timestamp,
            },
        );
    }

    /// Recompute and distribute indicator snapshots for every subscribed
    /// symbol. Symbols without enough history for any indicator are skipped.
    pub fn indicator_tick(&self) {
        let params = self.indicator_params();
        let lookback = self.lookback();

        for symbol in self.registry.subscribed_symbols() {
            let closes = self.history.closes(&symbol, lookback);
            let set = compute_set(&symbol, &closes, &params, now_ms());
            if set.is_empty() {
                continue;
            }
            let set = self.indicators.publish(set);
            self.distributor.fan_out(
                &symbol,
                &WireMessage::Indicators {
                    symbol: symbol.clone(),
                    data: (*set).clone(),
                    timestamp: set.timestamp,
                },
            );
        }
    }

    /// Run the rule engine over every subscribed symbol and distribute the
    /// signals that survive dedup. Also prunes expired signals.
    pub fn signal_tick(&self) {
        let params = self.rule_params();
        let now = now_ms();

        for symbol in self.registry.subscribed_symbols() {
            let Some(set) = self.indicators.get(&symbol) else {
                continue;
            };
            let closes = self.history.closes(&symbol, self.lookback());

            let mut accepted = Vec::new();
            for candidate in evaluate_rules(&symbol, &closes, &set, &params, now) {
                if self.signals.try_insert(candidate.clone(), now) {
                    info!(
                        symbol,
                        action = %candidate.action,
                        confidence = candidate.confidence,
                        "signal generated"
                    );
                    accepted.push(candidate);
                }
            }

            if !accepted.is_empty() {
                self.distributor.fan_out(
                    &symbol,
                    &WireMessage::Signals {
                        symbol: symbol.clone(),
                        data: accepted,
                        timestamp: now,
                    },
                );
            }
        }

        self.signals.prune(now);
    }

    /// Evict connections that have been heartbeat-silent for longer than the
    /// configured timeout, releasing their subscriptions.
    pub fn sweep_tick(&self) {
        let timeout = Duration::from_secs(self.config.heartbeat_timeout_secs);
        for conn in self.connections.sweep(timeout) {
            for symbol in self.registry.remove_connection(conn.id) {
                self.symbol_idle(&symbol);
            }
        }
    }

    /// Reap connections the transport closed directly (state `Closed` but
    /// still in the table) so their queues and buckets are released.
    pub fn cleanup_tick(&self) {
        for conn in self.connections.all() {
            if matches!(conn.state(), ConnState::Closed(_)) {
                self.close_connection(conn.id, CloseReason::Graceful);
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Internals
    // ────────────────────────────────────────────────────────────────────

    /// Daily history from the first provider able to serve it.
    async fn provider_history(&self, symbol: &str, days: u32) -> Option<Vec<Quote>> {
        for provider in &self.providers {
            match provider.fetch_history(symbol, days).await {
                Ok(quotes) if !quotes.is_empty() => return Some(quotes),
                Ok(_) => {
                    debug!(symbol, provider = provider.name(), "empty history response");
                }
                Err(e) => {
                    debug!(symbol, provider = provider.name(), error = %e, "history fetch failed");
                }
            }
        }
        None
    }

    /// Warm a freshly-subscribed symbol's ring from the provider chain.
    /// Failure is non-fatal: the poll loop fills history over time anyway.
    async fn backfill(&self, symbol: &str) {
        match self.provider_history(symbol, 30).await {
            Some(quotes) => {
                let mut stored = 0usize;
                for quote in quotes {
                    if self.history.append(quote) {
                        stored += 1;
                    }
                }
                info!(symbol, stored, "history back-filled");
            }
            None => warn!(symbol, "history backfill exhausted all providers"),
        }
    }

    /// A symbol just lost its last subscriber: drop derived state so a later
    /// resubscribe starts from a clean snapshot. History is kept: it is
    /// still valid data and bounded by the ring capacity.
    fn symbol_idle(&self, symbol: &str) {
        self.indicators.remove(symbol);
        debug!(symbol, "symbol idle: polling stops");
    }

    // ────────────────────────────────────────────────────────────────────
    // Task driver
    // ────────────────────────────────────────────────────────────────────

    /// Spawn the five pipeline loops. Each stops when `shutdown` fires.
    pub fn spawn_tasks(self: &Arc<Self>) {
        self.spawn_loop(self.config.quote_interval_secs, "acquisition", |e| async move {
            e.acquisition_tick().await;
        });
        self.spawn_loop(self.config.indicator_interval_secs, "indicators", |e| async move {
            e.indicator_tick();
        });
        self.spawn_loop(self.config.signal_interval_secs, "signals", |e| async move {
            e.signal_tick();
        });
        self.spawn_loop(self.config.sweep_interval_secs, "sweep", |e| async move {
            e.sweep_tick();
        });
        self.spawn_loop(self.config.bucket_cleanup_interval_secs, "cleanup", |e| async move {
            e.cleanup_tick();
        });
    }

    fn spawn_loop<F, Fut>(self: &Arc<Self>, period_secs: u64, name: &'static str, tick: F)
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let engine = Arc::clone(self);
        let mut stop = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(period_secs.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            debug!(task = name, period_secs, "pipeline task started");

            loop {
                tokio::select! {
                    _ = interval.tick() => tick(Arc::clone(&engine)).await,
                    _ = stop.changed() => {
                        info!(task = name, "pipeline task stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Stop the pipeline loops, close every connection and disconnect the
    /// providers.
    pub async fn shutdown(&self) {
        info!("engine shutting down");
        let _ = self.shutdown.send(true);

        for conn in self.connections.close_all() {
            self.registry.remove_connection(conn.id);
        }
        for provider in &self.providers {
            provider.disconnect().await;
        }
        info!("engine shut down");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Provider that always fails, so tests never touch the network and the
    /// synthetic fallback path is exercised.
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

    fn test_engine() -> Arc<Engine> {
        Engine::with_providers(EngineConfig::default(), vec![Arc::new(DeadProvider)]).unwrap()
    }

    #[test]
    fn engine_requires_at_least_one_provider() {
        assert!(matches!(
            Engine::with_providers(EngineConfig::default(), Vec::new()),
            Err(FeedError::Config(_))
        ));
    }

    #[tokio::test]
    async fn subscribe_requires_known_connection() {
        let engine = test_engine();
        let err = engine
            .subscribe(Uuid::new_v4(), &["AAPL".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::UnknownConnection(_)));
    }

    #[tokio::test]
    async fn subscribe_confirms_full_set() {
        let engine = test_engine();
        let (conn, mut rx) = engine.register_connection();

        engine
            .subscribe(conn.id, &["AAPL".to_string(), "BTC".to_string()])
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            WireMessage::SubscriptionConfirmed { mut symbols, .. } => {
                symbols.sort();
                assert_eq!(symbols, vec!["AAPL".to_string(), "BTC".to_string()]);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_releases_subscriptions() {
        let engine = test_engine();
        let (conn, _rx) = engine.register_connection();

        engine
            .subscribe(conn.id, &["AAPL".to_string()])
            .await
            .unwrap();
        engine.close_connection(conn.id, CloseReason::Graceful);

        assert_eq!(engine.connection_count(), 0);
        assert!(engine.heartbeat(conn.id).is_err());
    }

    #[tokio::test]
    async fn heartbeat_answers_with_pong() {
        let engine = test_engine();
        let (conn, mut rx) = engine.register_connection();

        engine.heartbeat(conn.id).unwrap();
        assert_eq!(rx.try_recv().unwrap().kind(), "pong");
    }

    #[tokio::test]
    async fn acquisition_falls_back_to_synthetic() {
        let engine = test_engine();
        let (conn, _rx) = engine.register_connection();
        engine
            .subscribe(conn.id, &["AAPL".to_string()])
            .await
            .unwrap();

        engine.acquisition_tick().await;

        let quotes = engine.history_window("AAPL", 10);
        assert_eq!(quotes.len(), 1);
        assert!(quotes[0].is_synthetic());
    }

    #[tokio::test]
    async fn cleanup_reaps_externally_closed_connections() {
        let engine = test_engine();
        let (conn, _rx) = engine.register_connection();
        engine
            .subscribe(conn.id, &["AAPL".to_string()])
            .await
            .unwrap();

        // Transport closes the connection object without telling the table.
        conn.close(CloseReason::Graceful);
        engine.cleanup_tick();

        assert_eq!(engine.connection_count(), 0);
    }

    #[tokio::test]
    async fn queries_on_unknown_symbol_are_empty() {
        let engine = test_engine();
        assert!(engine.get_history("NOPE", 10).await.is_empty());
        assert!(engine.history_window("NOPE", 10).is_empty());
        assert!(engine.get_indicators("NOPE").is_none());
        assert!(engine.get_signals("NOPE").is_empty());
    }
}
