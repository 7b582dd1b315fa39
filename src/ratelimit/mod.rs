//! Rate Limiting Module
//!
//! Per-key admission control. [`RateLimiter`] owns the bucket table and
//! delegates each key to an [`Admission`] strategy: a token bucket by
//! default, or a sliding window.

mod bucket;
mod limiter;
mod strategy;
mod window;

pub use bucket::TokenBucket;
pub use limiter::RateLimiter;
pub use strategy::{Admission, RateLimitInfo, RateLimitStrategy};
pub use window::SlidingWindow;
