// =============================================================================
// Connection table: subscriber lifecycle, liveness, outbound queues
// =============================================================================
//
// State machine per connection:
//
//   Connecting -> Active -> Closed(Graceful | Timeout | Protocol)
//
// There are no transitions out of Closed. Each connection owns a *bounded*
// tokio mpsc queue that the (out-of-scope) transport layer drains; pushes go
// through `try_send` so a slow consumer can never block the broadcast loop,
// and overflow drops the new message rather than buffering without bound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FeedError, Result};
use crate::rate_limit::TokenBucket;
use crate::types::WireMessage;

/// Why a connection reached `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Graceful,
    Timeout,
    Protocol,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graceful => write!(f, "graceful"),
            Self::Timeout => write!(f, "timeout"),
            Self::Protocol => write!(f, "protocol"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Active,
    Closed(CloseReason),
}

/// One subscriber connection.
pub struct Connection {
    pub id: Uuid,
    pub created_at: Instant,
    state: RwLock<ConnState>,
    last_heartbeat: RwLock<Instant>,
    outbound: mpsc::Sender<WireMessage>,
    pub bucket: TokenBucket,
}

impl Connection {
    pub fn state(&self) -> ConnState {
        *self.state.read()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state(), ConnState::Active)
    }

    /// Handshake complete: only valid from `Connecting`.
    pub fn activate(&self) -> bool {
        let mut state = self.state.write();
        if *state == ConnState::Connecting {
            *state = ConnState::Active;
            true
        } else {
            false
        }
    }

    /// Transition to `Closed`. Idempotent: returns `false` when already
    /// closed (the original close reason is preserved).
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut state = self.state.write();
        if matches!(*state, ConnState::Closed(_)) {
            return false;
        }
        *state = ConnState::Closed(reason);
        true
    }

    /// Record a liveness signal.
    pub fn touch(&self) {
        *self.last_heartbeat.write() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_heartbeat.read().elapsed()
    }

    /// Non-blocking push into the outbound queue. Drop-new on overflow.
    ///
    /// Returns `false` when the message was dropped (queue full or receiver
    /// gone). Rate limiting happens *before* this call, in the distributor.
    pub fn push(&self, msg: WireMessage) -> bool {
        match self.outbound.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(m)) => {
                warn!(connection = %self.id, kind = m.kind(), "outbound queue full: dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection = %self.id, "outbound receiver dropped");
                false
            }
        }
    }
}

/// Registry of every live connection, keyed by id.
pub struct ConnectionTable {
    connections: RwLock<HashMap<Uuid, Arc<Connection>>>,
    queue_depth: usize,
    rate_limit_per_sec: u32,
}

impl ConnectionTable {
    pub fn new(queue_depth: usize, rate_limit_per_sec: u32) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            queue_depth,
            rate_limit_per_sec,
        }
    }

    /// Create a new connection in the `Connecting` state and hand back the
    /// receiving half of its outbound queue for the transport to drain.
    pub fn register(&self) -> (Arc<Connection>, mpsc::Receiver<WireMessage>) {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let conn = Arc::new(Connection {
            id: Uuid::new_v4(),
            created_at: Instant::now(),
            state: RwLock::new(ConnState::Connecting),
            last_heartbeat: RwLock::new(Instant::now()),
            outbound: tx,
            bucket: TokenBucket::new(self.rate_limit_per_sec, self.rate_limit_per_sec),
        });

        self.connections
            .write()
            .insert(conn.id, Arc::clone(&conn));
        info!(connection = %conn.id, "connection registered");
        (conn, rx)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Record a liveness signal for a connection.
    pub fn heartbeat(&self, id: Uuid) -> Result<()> {
        let conn = self.get(id).ok_or(FeedError::UnknownConnection(id))?;
        if !conn.is_active() {
            return Err(FeedError::Protocol(id, "heartbeat on closed connection".into()));
        }
        conn.touch();
        Ok(())
    }

    /// Close a connection and drop it from the table. Returns the entry so
    /// the caller can cascade subscription removal.
    pub fn close(&self, id: Uuid, reason: CloseReason) -> Option<Arc<Connection>> {
        let conn = self.connections.write().remove(&id)?;
        if conn.close(reason) {
            info!(connection = %id, %reason, "connection closed");
        }
        Some(conn)
    }

    /// Evict every connection silent for longer than `timeout`, including
    /// connections stuck in `Connecting` whose handshake never completed.
    /// Returns the evicted entries for subscription cascade.
    pub fn sweep(&self, timeout: Duration) -> Vec<Arc<Connection>> {
        let stale: Vec<Uuid> = {
            let map = self.connections.read();
            map.values()
                .filter(|c| !matches!(c.state(), ConnState::Closed(_)) && c.idle_for() > timeout)
                .map(|c| c.id)
                .collect()
        };

        let mut evicted = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(conn) = self.close(id, CloseReason::Timeout) {
                warn!(
                    connection = %id,
                    idle_secs = conn.idle_for().as_secs(),
                    "connection evicted: heartbeat timeout"
                );
                evicted.push(conn);
            }
        }
        evicted
    }

    /// Close every connection (engine shutdown).
    pub fn close_all(&self) -> Vec<Arc<Connection>> {
        let ids: Vec<Uuid> = self.connections.read().keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.close(id, CloseReason::Graceful))
            .collect()
    }
}
