//! Error types for the governance layer
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

// == Governor Error Enum ==
/// Unified error type for the cache and the rate limiter.
#[derive(Error, Debug, Clone)]
pub enum GovernorError {
    /// Cache capacity is zero or cannot hold one entry per shard
    #[error("Invalid capacity: {0}")]
    CapacityConfig(String),

    /// Any other invalid construction parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A caller-supplied compute function failed.
    ///
    /// The cause is shared so every waiter of the same in-flight compute
    /// receives the identical error.
    #[error("Compute failed for key '{key}': {cause}")]
    Compute {
        key: String,
        cause: Arc<anyhow::Error>,
    },

    /// Admission was refused by the rate limiter
    #[error("Rate limit exceeded for '{key}' (limit {limit})")]
    RateLimitExceeded {
        key: String,
        limit: u32,
        retry_after: Option<Duration>,
    },

    /// Waiting on another caller's in-flight compute took too long
    #[error("Timed out after {waited:?} waiting on in-flight compute for key '{key}'")]
    LockTimeout { key: String, waited: Duration },

    /// Malformed glob passed to pattern invalidation
    #[error("Invalid key pattern: {0}")]
    InvalidPattern(String),

    /// Strategy name did not match any known rate-limit strategy
    #[error("Unknown rate limiting strategy: {0}")]
    UnknownStrategy(String),
}

impl GovernorError {
    /// Returns true if the error signals throttling rather than a failure.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GovernorError::RateLimitExceeded { .. })
    }

    /// Returns the wrapped compute failure, if this is one.
    pub fn compute_cause(&self) -> Option<&anyhow::Error> {
        match self {
            GovernorError::Compute { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the governance layer.
pub type Result<T> = std::result::Result<T, GovernorError>;
