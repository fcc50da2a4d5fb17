//! Minimum-interval rate limiter.
//!
//! Sits after the backpressure gate: the gate decides *which* frame runs next,
//! the limiter decides whether it runs *at all*. A rejected frame is simply
//! dropped by the caller, which releases it.

use std::time::Duration;

/// Pure interval check: has at least `interval_ms` passed since `last_ms`?
///
/// `None` means nothing has been processed yet, which always passes.
pub fn interval_elapsed(now_ms: u64, last_ms: Option<u64>, interval_ms: u64) -> bool {
    match last_ms {
        None => true,
        Some(last) => now_ms.saturating_sub(last) >= interval_ms,
    }
}

/// Stateful limiter: one timestamp of mutable state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval_ms: u64,
    last_processed_at: Option<u64>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_processed_at: None,
        }
    }

    /// A limiter that lets every frame through.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn last_processed_at(&self) -> Option<u64> {
        self.last_processed_at
    }

    /// Decide whether a frame may be processed at `now_ms`.
    ///
    /// On `true` the limiter records `now_ms` as the last processing start.
    pub fn should_process(&mut self, now_ms: u64) -> bool {
        if interval_elapsed(now_ms, self.last_processed_at, self.interval_ms) {
            self.last_processed_at = Some(now_ms);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.last_processed_at = None;
    }
}
