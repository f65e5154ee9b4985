//! Source rate limiting defaults.

use crate::registry::RateLimitConfig;

/// Rate limiting configuration advertised by a quote source.
///
/// These are the defaults the registry configures its token buckets with;
/// per-source overrides from configuration replace them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum requests allowed per minute.
    pub requests_per_minute: u32,

    /// Requests that may be made back to back before the refill rate applies.
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst: 10,
        }
    }
}

impl From<RateLimit> for RateLimitConfig {
    fn from(limit: RateLimit) -> Self {
        Self {
            requests_per_minute: limit.requests_per_minute,
            burst_capacity: limit.burst as f64,
        }
    }
}
