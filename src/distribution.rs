// =============================================================================
// Distributor: fans messages out to every subscriber of a symbol
// =============================================================================
//
// Delivery path per (symbol, message):
//
//   subscribers_of(symbol) -> for each connection:
//       skip if not Active
//       bucket.try_acquire()  -> deliver via push (bounded queue, try_send)
//                             -> or drop, count it, and send a throttled
//                                rate-limit notice
//
// The subscriber set is resolved at delivery time, never cached: a consumer
// that unsubscribes between two ticks receives nothing from the second.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::connection::ConnectionTable;
use crate::registry::SubscriptionRegistry;
use crate::types::{now_ms, WireMessage};

pub struct Distributor {
    registry: Arc<SubscriptionRegistry>,
    connections: Arc<ConnectionTable>,
}

/// Per-fan-out delivery accounting, mostly for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutStats {
    pub delivered: usize,
    pub rate_limited: usize,
    pub queue_full: usize,
}

impl Distributor {
    pub fn new(registry: Arc<SubscriptionRegistry>, connections: Arc<ConnectionTable>) -> Self {
        Self {
            registry,
            connections,
        }
    }

    /// Deliver `msg` to every active subscriber of `symbol`.
    ///
    /// Rate-limited connections are skipped, not closed: the limiter protects
    /// everyone else from a hot symbol, it is not a protocol violation by the
    /// consumer.
    pub fn fan_out(&self, symbol: &str, msg: &WireMessage) -> FanOutStats {
        let mut stats = FanOutStats::default();

        for id in self.registry.subscribers_of(symbol) {
            let Some(conn) = self.connections.get(id) else {
                continue;
            };
            if !conn.is_active() {
                continue;
            }

            if !conn.bucket.try_acquire() {
                stats.rate_limited += 1;
                let total = conn.bucket.record_drop();
                trace!(conn = %id, symbol, dropped_total = total, "message dropped by rate limiter");
                if conn.bucket.notice_due() {
                    conn.push(WireMessage::Error {
                        symbol: Some(symbol.to_string()),
                        message: "rate limit exceeded, messages dropped".to_string(),
                        timestamp: now_ms(),
                    });
                }
                continue;
            }

            if conn.push(msg.clone()) {
                stats.delivered += 1;
            } else {
                stats.queue_full += 1;
            }
        }

        if stats.rate_limited > 0 || stats.queue_full > 0 {
            debug!(
                symbol,
                kind = msg.kind(),
                delivered = stats.delivered,
                rate_limited = stats.rate_limited,
                queue_full = stats.queue_full,
                "fan-out complete with drops"
            );
        }
        stats
    }
}
