//! Byte-rate limiting shared by every proxy pair
//!
//! One limiter instance bounds the aggregate throughput of the whole
//! process, not of a single session. The bucket accumulates an outstanding
//! amount on every send and leaks it at `capacity / window` bytes per
//! second. Leaking is computed lazily on each call, so an idle proxy never
//! needs a background timer.
//!
//! Everything here runs on the single browser thread. The interior state is
//! a `Cell`, which keeps the read-decay-write sequence in `age()` atomic with
//! respect to other pairs without any locking.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runtime::time::Clock;

/// Smallest accepted byte-rate limit (bytes per second)
pub const MIN_RATE_LIMIT: u64 = 10 * 1024;

/// Default accounting window
pub const DEFAULT_RATE_LIMIT_HISTORY: Duration = Duration::from_secs(5);

/// Rate limiting capability shared by all pairs of one orchestrator
pub trait RateLimit {
    /// Charge `n` bytes to the bucket. Returns whether the bucket is still
    /// within capacity; callers must still consult [`RateLimit::is_limited`].
    fn update(&self, n: usize) -> bool;

    /// True when the outstanding amount exceeds capacity
    fn is_limited(&self) -> bool;

    /// Seconds until the bucket is back within capacity (<= 0 when it is)
    fn seconds_until_available(&self) -> f64;

    fn stats(&self) -> RateLimiterStats;
}

/// Handle to the limiter shared between the orchestrator and its pairs
pub type SharedRateLimit = Rc<dyn RateLimit>;

/// Rate limiter configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    /// Sustained bytes per second
    pub bytes_per_second: u64,
    /// Window over which bursts are averaged
    pub window: Duration,
}

impl RateLimiterConfig {
    /// Bucket capacity in bytes
    pub fn capacity(&self) -> f64 {
        self.bytes_per_second as f64 * self.window.as_secs_f64()
    }
}

/// Build the limiter selected by the configuration
///
/// No configured rate means no limiting at all.
pub fn from_config(config: Option<RateLimiterConfig>, clock: Rc<dyn Clock>) -> SharedRateLimit {
    match config {
        Some(cfg) => {
            log::info!(
                "Rate limiting to {} bytes/s over {:?}",
                cfg.bytes_per_second,
                cfg.window
            );
            Rc::new(BucketRateLimit::new(cfg.capacity(), cfg.window, clock))
        }
        None => Rc::new(DummyRateLimit),
    }
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    /// Outstanding bytes, never negative
    amount: f64,
    /// Timestamp of the last accounting (ms)
    last_update: f64,
}

/// Leaky token bucket
pub struct BucketRateLimit {
    capacity: f64,
    window_secs: f64,
    state: Cell<BucketState>,
    clock: Rc<dyn Clock>,
}

impl BucketRateLimit {
    /// `capacity` bytes may be outstanding; they drain over `window`
    pub fn new(capacity: f64, window: Duration, clock: Rc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            capacity,
            window_secs: window.as_secs_f64(),
            state: Cell::new(BucketState {
                amount: 0.0,
                last_update: now,
            }),
            clock,
        }
    }

    fn leak_rate(&self) -> f64 {
        self.capacity / self.window_secs
    }

    /// Decay the outstanding amount by the time elapsed since the last call
    fn age(&self) -> BucketState {
        let now = self.clock.now_ms();
        let mut st = self.state.get();
        let elapsed = (now - st.last_update).max(0.0) / 1000.0;
        st.last_update = now;
        st.amount = (st.amount - elapsed * self.leak_rate()).max(0.0);
        self.state.set(st);
        st
    }
}

impl RateLimit for BucketRateLimit {
    fn update(&self, n: usize) -> bool {
        let mut st = self.age();
        st.amount += n as f64;
        self.state.set(st);
        st.amount <= self.capacity
    }

    fn is_limited(&self) -> bool {
        self.age().amount > self.capacity
    }

    fn seconds_until_available(&self) -> f64 {
        let st = self.age();
        (st.amount - self.capacity) / self.leak_rate()
    }

    fn stats(&self) -> RateLimiterStats {
        let st = self.age();
        RateLimiterStats {
            outstanding_bytes: st.amount,
            capacity_bytes: Some(self.capacity),
        }
    }
}

impl std::fmt::Debug for BucketRateLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketRateLimit")
            .field("capacity", &self.capacity)
            .field("window_secs", &self.window_secs)
            .field("amount", &self.state.get().amount)
            .finish()
    }
}

/// Limiter used when no byte rate is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyRateLimit;

impl RateLimit for DummyRateLimit {
    fn update(&self, _n: usize) -> bool {
        true
    }

    fn is_limited(&self) -> bool {
        false
    }

    fn seconds_until_available(&self) -> f64 {
        0.0
    }

    fn stats(&self) -> RateLimiterStats {
        RateLimiterStats::default()
    }
}

/// Statistics about rate limiting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub outstanding_bytes: f64,
    /// `None` when limiting is disabled
    pub capacity_bytes: Option<f64>,
}
