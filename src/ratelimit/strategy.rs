//! Admission strategies
//!
//! The [`Admission`] trait is the seam between the keyed [`RateLimiter`]
//! and the per-key algorithm. New strategies implement it and get a variant
//! in [`RateLimitStrategy`].
//!
//! [`RateLimiter`]: crate::ratelimit::RateLimiter

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::KeyLimit;
use crate::error::GovernorError;
use crate::ratelimit::{SlidingWindow, TokenBucket};

// == Admission ==
/// Per-key admission state. Implementations are driven under the
/// limiter's per-key lock, so `&mut self` methods run atomically.
pub trait Admission: Send {
    /// Consumes `tokens` permits if available.
    fn try_acquire(&mut self, now: Instant, tokens: u32) -> bool;

    /// Current status without consuming anything.
    fn info(&mut self, now: Instant) -> RateLimitInfo;

    /// True once the state would have recovered its whole capacity at `now`,
    /// making it indistinguishable from freshly built state. Never mutates.
    fn is_full(&self, now: Instant) -> bool;

    /// Restores full capacity.
    fn reset(&mut self, now: Instant);

    /// Last time the state was refilled, consumed or reset.
    fn last_activity(&self) -> Instant;
}

// == Rate Limit Info ==
/// Snapshot of one key's rate limit status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitInfo {
    /// Configured capacity
    pub limit: u32,
    /// Whole permits available right now
    pub remaining: u32,
    /// When the key will be back at full capacity
    pub reset_at: DateTime<Utc>,
    /// How long until the next permit, when none is available
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    pub(crate) fn new(
        limit: u32,
        remaining: u32,
        reset_after: Duration,
        retry_after: Option<Duration>,
    ) -> Self {
        let now = Utc::now();
        let reset_at = chrono::Duration::from_std(reset_after)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(now);
        Self {
            limit,
            remaining,
            reset_at,
            retry_after,
        }
    }
}

// == Strategy ==
/// Which algorithm backs each key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Continuous refill at `refill_rate` up to `capacity`
    #[default]
    TokenBucket,
    /// At most `capacity` requests in any trailing window
    SlidingWindow,
}

impl RateLimitStrategy {
    /// Builds fresh, full per-key state for this strategy.
    pub fn build(self, limit: KeyLimit, window: Duration, now: Instant) -> Box<dyn Admission> {
        match self {
            RateLimitStrategy::TokenBucket => Box::new(TokenBucket::new(limit, now)),
            RateLimitStrategy::SlidingWindow => {
                Box::new(SlidingWindow::new(limit.capacity, window, now))
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitStrategy::TokenBucket => "token_bucket",
            RateLimitStrategy::SlidingWindow => "sliding_window",
        }
    }
}

impl fmt::Display for RateLimitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateLimitStrategy {
    type Err = GovernorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token_bucket" => Ok(RateLimitStrategy::TokenBucket),
            "sliding_window" => Ok(RateLimitStrategy::SlidingWindow),
            other => Err(GovernorError::UnknownStrategy(other.to_string())),
        }
    }
}
