//! Token bucket
//!
//! Tokens refill continuously at `refill_rate` per second up to `capacity`.
//! On each check: tokens = min(capacity, tokens + elapsed * refill_rate).

use std::time::Duration;

use tokio::time::Instant;

use crate::config::KeyLimit;
use crate::ratelimit::{Admission, RateLimitInfo};

#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum number of tokens (burst capacity)
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// Current (fractional) token count
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(limit: KeyLimit, now: Instant) -> Self {
        let capacity = limit.capacity as f64;
        Self {
            capacity,
            refill_rate: limit.refill_rate,
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn secs_until(&self, target: f64) -> Duration {
        let missing = (target - self.tokens).max(0.0);
        if self.refill_rate > 0.0 {
            Duration::try_from_secs_f64(missing / self.refill_rate).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }
}

impl Admission for TokenBucket {
    fn try_acquire(&mut self, now: Instant, tokens: u32) -> bool {
        self.refill(now);

        let wanted = tokens as f64;
        if self.tokens >= wanted {
            self.tokens -= wanted;
            true
        } else {
            false
        }
    }

    fn info(&mut self, now: Instant) -> RateLimitInfo {
        self.refill(now);

        let retry_after = (self.tokens < 1.0).then(|| self.secs_until(1.0));
        RateLimitInfo::new(
            self.capacity as u32,
            self.tokens.floor() as u32,
            self.secs_until(self.capacity),
            retry_after,
        )
    }

    fn is_full(&self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens + elapsed * self.refill_rate >= self.capacity
    }

    fn reset(&mut self, now: Instant) {
        self.tokens = self.capacity;
        self.last_refill = now;
    }

    fn last_activity(&self) -> Instant {
        self.last_refill
    }
}
