// =============================================================================
// Token Bucket: per-connection outbound rate limiting
// =============================================================================
//
// Each connection owns one bucket. Delivery costs one token; tokens refill
// continuously at `rate` per second up to `capacity`. When the bucket is
// empty the message is dropped (bounded latency beats completeness for a
// single slow consumer) and the connection is told via a rate-limit notice,
// throttled to at most one notice per second so the notice itself cannot
// flood the connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct BucketInner {
    tokens: f64,
    last_refill: Instant,
    last_notice: Option<Instant>,
}

pub struct TokenBucket {
    inner: Mutex<BucketInner>,
    capacity: f64,
    /// Tokens replenished per second.
    rate: f64,
    dropped: AtomicU64,
}

impl TokenBucket {
    /// Create a full bucket with the given capacity and refill rate
    /// (tokens per second).
    pub fn new(capacity: u32, rate_per_sec: u32) -> Self {
        Self {
            inner: Mutex::new(BucketInner {
                tokens: capacity as f64,
                last_refill: Instant::now(),
                last_notice: None,
            }),
            capacity: capacity as f64,
            rate: rate_per_sec as f64,
            dropped: AtomicU64::new(0),
        }
    }

    /// Try to spend one token. Returns `false` when the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();

        let elapsed = now.saturating_duration_since(inner.last_refill);
        inner.tokens = (inner.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        inner.last_refill = now;

        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Count a dropped message. Returns the running total.
    pub fn record_drop(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// True when a rate-limit notice should be sent now (at most one per
    /// second per connection).
    pub fn notice_due(&self) -> bool {
        self.notice_due_at(Instant::now())
    }

    fn notice_due_at(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        match inner.last_notice {
            Some(last) if now.saturating_duration_since(last) < Duration::from_secs(1) => false,
            _ => {
                inner.last_notice = Some(now);
                true
            }
        }
    }
}
