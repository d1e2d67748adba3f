//! Time sources for the cooperative core
//!
//! All deadlines in the crate are expressed in milliseconds since an
//! arbitrary origin, the same unit `js_sys::Date::now()` returns. The core
//! never sleeps; it only compares deadlines against a [`Clock`].

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// A source of the current time in milliseconds
pub trait Clock {
    fn now_ms(&self) -> f64;
}

/// Wall clock (WASM-compatible)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        #[cfg(target_arch = "wasm32")]
        {
            js_sys::Date::now()
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64()
                * 1000.0
        }
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can hand one clone to the
/// orchestrator and keep another to advance it.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by.as_secs_f64() * 1000.0);
    }

    pub fn set_ms(&self, ms: f64) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

/// Convert a duration to the crate's millisecond unit
pub fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
