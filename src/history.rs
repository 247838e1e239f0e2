// =============================================================================
// HistoryStore -- bounded, time-ordered quote ring per symbol
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use tracing::warn;

use crate::types::Quote;

/// Thread-safe ring-buffer that stores the most recent quotes per symbol.
///
/// The acquisition loop is the single writer for a given symbol; the
/// indicator engine and pull-query handlers read concurrently. Quotes are
/// immutable and cloned out, so readers never observe a torn quote.
///
/// Invariants:
///   - at most `capacity` quotes per symbol (oldest evicted first),
///   - timestamps within a series are strictly non-decreasing.
pub struct HistoryStore {
    series: RwLock<HashMap<String, VecDeque<Quote>>>,
    capacity: usize,
}

impl HistoryStore {
    /// Create a store that retains at most `capacity` quotes per symbol.
    pub fn new(capacity: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Append a quote to its symbol's series, evicting the oldest entry when
    /// the ring is full.
    ///
    /// Returns `false` (and drops the quote) if its timestamp is older than
    /// the newest stored quote -- appending it would break the ordering
    /// invariant. Equal timestamps are accepted.
    pub fn append(&self, quote: Quote) -> bool {
        let mut map = self.series.write();
        let ring = map
            .entry(quote.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        if let Some(last) = ring.back() {
            if quote.timestamp < last.timestamp {
                warn!(
                    symbol = %quote.symbol,
                    incoming = quote.timestamp,
                    newest = last.timestamp,
                    "rejecting out-of-order quote"
                );
                return false;
            }
        }

        ring.push_back(quote);
        while ring.len() > self.capacity {
            ring.pop_front();
        }
        true
    }

    /// Return the most recent `count` quotes (oldest-first order).
    pub fn window(&self, symbol: &str, count: usize) -> Vec<Quote> {
        let map = self.series.read();
        match map.get(symbol) {
            Some(ring) => {
                let start = ring.len().saturating_sub(count);
                ring.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Return the most recent `count` close prices (oldest-first order).
    pub fn closes(&self, symbol: &str, count: usize) -> Vec<f64> {
        let map = self.series.read();
        match map.get(symbol) {
            Some(ring) => {
                let start = ring.len().saturating_sub(count);
                ring.iter().skip(start).map(|q| q.close).collect()
            }
            None => Vec::new(),
        }
    }

    /// The most recent quote for a symbol, if any.
    pub fn latest(&self, symbol: &str) -> Option<Quote> {
        let map = self.series.read();
        map.get(symbol).and_then(|ring| ring.back().cloned())
    }

    /// The most recent close price for a symbol, if any.
    pub fn last_close(&self, symbol: &str) -> Option<f64> {
        let map = self.series.read();
        map.get(symbol).and_then(|ring| ring.back().map(|q| q.close))
    }

    /// Number of quotes stored for a symbol.
    pub fn len(&self, symbol: &str) -> usize {
        let map = self.series.read();
        map.get(symbol).map_or(0, VecDeque::len)
    }
}

// =============================================================================
// Tests
// =============================================================================
