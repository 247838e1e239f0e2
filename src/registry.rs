// =============================================================================
// Subscription Registry: reference-counted symbol subscriptions
// =============================================================================
//
// Tracks which connections want pushes for which symbols. Acquisition for a
// symbol starts when its subscriber count transitions 0 -> 1 and stops when
// it transitions 1 -> 0; the acquisition loop reads `subscribed_symbols()`
// every tick to decide what to poll.
//
// Both maps live behind a single RwLock so forward (symbol -> connections)
// and reverse (connection -> symbols) views can never disagree.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct RegistryInner {
    by_symbol: HashMap<String, HashSet<Uuid>>,
    by_connection: HashMap<Uuid, HashSet<String>>,
}

pub struct SubscriptionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Subscribe a connection to a symbol. Returns `true` when this was the
    /// symbol's first subscriber (0 -> 1 transition: polling should start).
    pub fn subscribe(&self, symbol: &str, connection: Uuid) -> bool {
        let mut inner = self.inner.write();

        let subscribers = inner.by_symbol.entry(symbol.to_string()).or_default();
        let was_empty = subscribers.is_empty();
        subscribers.insert(connection);

        inner
            .by_connection
            .entry(connection)
            .or_default()
            .insert(symbol.to_string());

        if was_empty {
            debug!(symbol, %connection, "first subscriber: symbol goes live");
        }
        was_empty
    }

    /// Unsubscribe a connection from a symbol. Returns `true` when this was
    /// the symbol's last subscriber (1 -> 0 transition: polling stops).
    pub fn unsubscribe(&self, symbol: &str, connection: Uuid) -> bool {
        let mut inner = self.inner.write();

        let now_empty = match inner.by_symbol.get_mut(symbol) {
            Some(subscribers) => {
                subscribers.remove(&connection);
                subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.by_symbol.remove(symbol);
        }

        if let Some(symbols) = inner.by_connection.get_mut(&connection) {
            symbols.remove(symbol);
            if symbols.is_empty() {
                inner.by_connection.remove(&connection);
            }
        }

        if now_empty {
            debug!(symbol, "last subscriber gone: symbol goes idle");
        }
        now_empty
    }

    /// Current subscribers of a symbol, captured at call time.
    pub fn subscribers_of(&self, symbol: &str) -> Vec<Uuid> {
        let inner = self.inner.read();
        inner
            .by_symbol
            .get(symbol)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Symbols a single connection is subscribed to.
    pub fn symbols_of(&self, connection: Uuid) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .by_connection
            .get(&connection)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All symbols with at least one subscriber.
    pub fn subscribed_symbols(&self) -> Vec<String> {
        let inner = self.inner.read();
        inner.by_symbol.keys().cloned().collect()
    }

    pub fn is_subscribed(&self, symbol: &str) -> bool {
        let inner = self.inner.read();
        inner
            .by_symbol
            .get(symbol)
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    /// Remove every subscription held by a connection (eviction cascade).
    /// Returns the symbols whose subscriber count dropped to zero.
    pub fn remove_connection(&self, connection: Uuid) -> Vec<String> {
        let mut inner = self.inner.write();

        let symbols = match inner.by_connection.remove(&connection) {
            Some(s) => s,
            None => return Vec::new(),
        };

        let mut went_idle = Vec::new();
        for symbol in symbols {
            if let Some(subscribers) = inner.by_symbol.get_mut(&symbol) {
                subscribers.remove(&connection);
                if subscribers.is_empty() {
                    inner.by_symbol.remove(&symbol);
                    went_idle.push(symbol);
                }
            }
        }
        went_idle
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
