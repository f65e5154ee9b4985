//! Token bucket rate limiter for quote sources.
//!
//! Implements per-source rate limiting using the token bucket algorithm.
//! Each source gets its own bucket with configurable capacity and refill rate.
//! The limiter never waits: a request either gets a token now or is told how
//! long until one would be available, so the registry can fall through to the
//! next source instead of stalling the caller.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::errors::MarketDataError;
use crate::models::ProviderId;

/// Default rate limit: 60 requests per minute.
const DEFAULT_REQUESTS_PER_MINUTE: f64 = 60.0;

/// Default bucket capacity (allows bursting).
const DEFAULT_BUCKET_CAPACITY: f64 = 10.0;

/// Token bucket for a single source.
#[derive(Debug)]
struct TokenBucket {
    /// Current number of available tokens.
    tokens: f64,
    /// Last time the bucket was updated.
    last_update: Instant,
    /// Token refill rate (tokens per second).
    rate: f64,
    /// Maximum bucket capacity.
    capacity: f64,
    /// Set when the upstream itself rate limited us; no tokens until then.
    blocked_until: Option<Instant>,
}

impl TokenBucket {
    /// Create a new token bucket with default settings.
    fn new() -> Self {
        Self::with_config(DEFAULT_REQUESTS_PER_MINUTE as u32, DEFAULT_BUCKET_CAPACITY)
    }

    /// Create a token bucket with custom settings.
    fn with_config(requests_per_minute: u32, capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
            rate: requests_per_minute as f64 / 60.0, // Convert to per-second
            capacity,
            blocked_until: None,
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self) {
        let now = Instant::now();
        if let Some(until) = self.blocked_until {
            if now < until {
                self.last_update = now;
                return;
            }
            // Refill starts from the end of the block, not from the penalty
            self.blocked_until = None;
            self.last_update = until;
        }

        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    /// Try to take a token. On failure returns the wait until one is available.
    fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if let Some(until) = self.blocked_until {
            return Err(until.saturating_duration_since(Instant::now()));
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(self.time_until_available())
        }
    }

    /// Calculate the wait time until a token becomes available.
    fn time_until_available(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if self.rate <= 0.0 {
            return Duration::MAX;
        }
        let tokens_needed = 1.0 - self.tokens;
        Duration::from_secs_f64(tokens_needed / self.rate)
    }

    fn block_for(&mut self, retry_after: Duration) {
        self.tokens = 0.0;
        let until = Instant::now() + retry_after;
        self.blocked_until = Some(match self.blocked_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }
}

/// Rate limiter configuration for a source.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum requests per minute.
    pub requests_per_minute: u32,
    /// Maximum burst capacity.
    pub burst_capacity: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE as u32,
            burst_capacity: DEFAULT_BUCKET_CAPACITY,
        }
    }
}

/// Proof that a token was taken for one upstream request.
#[derive(Debug)]
#[must_use = "a permit stands for one upstream request"]
pub struct Permit {
    provider: ProviderId,
}

impl Permit {
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }
}

/// Token bucket rate limiter for multiple sources.
///
/// Thread-safe rate limiter that maintains per-source token buckets.
/// Buckets are created on-demand with default settings, or can be
/// pre-configured with custom limits.
pub struct RateLimiter {
    /// Per-source token buckets.
    buckets: Mutex<HashMap<String, TokenBucket>>,
    /// Per-source configuration overrides.
    configs: Mutex<HashMap<String, RateLimitConfig>>,
}

impl RateLimiter {
    /// Create a new rate limiter with default settings.
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            configs: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the buckets mutex, recovering from poison if necessary.
    fn lock_buckets(&self) -> MutexGuard<'_, HashMap<String, TokenBucket>> {
        self.buckets.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter buckets mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Lock the configs mutex, recovering from poison if necessary.
    fn lock_configs(&self) -> MutexGuard<'_, HashMap<String, RateLimitConfig>> {
        self.configs.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter configs mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Configure rate limits for a specific source.
    pub fn configure(&self, provider: &ProviderId, config: RateLimitConfig) {
        let mut configs = self.lock_configs();
        configs.insert(provider.to_string(), config);
        drop(configs); // Release configs lock before acquiring buckets lock

        // Reset the bucket if it already exists
        let mut buckets = self.lock_buckets();
        buckets.remove(provider.as_ref());
    }

    /// Take a token for the given source without waiting.
    ///
    /// If the source doesn't have a bucket yet, one is created from its
    /// configuration (or the defaults).
    ///
    /// # Errors
    ///
    /// `RateLimited` with the estimated wait until the next token.
    pub fn acquire(&self, provider: &ProviderId) -> Result<Permit, MarketDataError> {
        let outcome = {
            let mut buckets = self.lock_buckets();
            let bucket = buckets
                .entry(provider.to_string())
                .or_insert_with(|| self.create_bucket(provider));
            bucket.try_acquire()
        };

        match outcome {
            Ok(()) => {
                debug!("Rate limiter: acquired token for '{}'", provider);
                Ok(Permit {
                    provider: provider.clone(),
                })
            }
            Err(retry_after) => {
                debug!(
                    "Rate limiter: '{}' out of budget, next token in {:?}",
                    provider, retry_after
                );
                Err(MarketDataError::RateLimited {
                    provider: provider.to_string(),
                    retry_after,
                })
            }
        }
    }

    /// Block a source after the upstream reported rate limiting.
    ///
    /// Empties the bucket and refuses tokens until `retry_after` has elapsed.
    pub fn penalize(&self, provider: &ProviderId, retry_after: Duration) {
        let mut buckets = self.lock_buckets();
        buckets
            .entry(provider.to_string())
            .or_insert_with(|| self.create_bucket(provider))
            .block_for(retry_after);
        warn!(
            "Rate limiter: '{}' rate limited upstream, blocked for {:?}",
            provider, retry_after
        );
    }

    /// Get the remaining tokens for a source.
    pub fn remaining_tokens(&self, provider: &ProviderId) -> f64 {
        let mut buckets = self.lock_buckets();

        if let Some(bucket) = buckets.get_mut(provider.as_ref()) {
            bucket.refill();
            if bucket.blocked_until.is_some() {
                0.0
            } else {
                bucket.tokens
            }
        } else {
            self.lock_configs()
                .get(provider.as_ref())
                .map(|c| c.burst_capacity)
                .unwrap_or(DEFAULT_BUCKET_CAPACITY)
        }
    }

    /// Reset the rate limiter for a source.
    pub fn reset(&self, provider: &ProviderId) {
        let mut buckets = self.lock_buckets();
        buckets.remove(provider.as_ref());
    }

    /// Create a bucket for a source, using custom config if available.
    fn create_bucket(&self, provider: &ProviderId) -> TokenBucket {
        let configs = self.lock_configs();

        if let Some(config) = configs.get(provider.as_ref()) {
            TokenBucket::with_config(config.requests_per_minute, config.burst_capacity)
        } else {
            TokenBucket::new()
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_token_bucket_acquire() {
        let mut bucket = TokenBucket::new();

        // Should be able to acquire up to capacity tokens immediately
        for _ in 0..DEFAULT_BUCKET_CAPACITY as usize {
            assert!(bucket.try_acquire().is_ok());
        }

        // Next acquire should fail (no tokens left)
        assert!(bucket.try_acquire().is_err());
    }

    #[test]
    fn test_token_bucket_refill() {
        let mut bucket = TokenBucket::with_config(60, 1.0); // 1 token/second

        // Drain the bucket
        assert!(bucket.try_acquire().is_ok());
        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_secs(1));

        // Manually advance time by simulating elapsed time
        bucket.last_update = Instant::now() - Duration::from_secs(2);

        // Should have refilled
        assert!(bucket.try_acquire().is_ok());
    }

    #[test]
    fn test_rate_limiter_default_config() {
        let limiter = RateLimiter::new();
        let provider: ProviderId = Cow::Borrowed("TEST_PROVIDER");

        for _ in 0..DEFAULT_BUCKET_CAPACITY as usize {
            assert!(limiter.acquire(&provider).is_ok());
        }

        // Should fail after exhausting burst capacity, without waiting
        match limiter.acquire(&provider) {
            Err(MarketDataError::RateLimited {
                provider,
                retry_after,
            }) => {
                assert_eq!(provider, "TEST_PROVIDER");
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_secs(1));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_rate_limiter_custom_config() {
        let limiter = RateLimiter::new();
        let provider: ProviderId = Cow::Borrowed("CUSTOM_PROVIDER");

        limiter.configure(
            &provider,
            RateLimitConfig {
                requests_per_minute: 120,
                burst_capacity: 5.0,
            },
        );

        // Should respect custom burst capacity
        for _ in 0..5 {
            assert!(limiter.acquire(&provider).is_ok());
        }
        assert!(limiter.acquire(&provider).is_err());
    }

    #[test]
    fn test_rate_limiter_per_provider_isolation() {
        let limiter = RateLimiter::new();
        let provider_a: ProviderId = Cow::Borrowed("PROVIDER_A");
        let provider_b: ProviderId = Cow::Borrowed("PROVIDER_B");

        // Exhaust provider A
        for _ in 0..DEFAULT_BUCKET_CAPACITY as usize {
            let _ = limiter.acquire(&provider_a);
        }
        assert!(limiter.acquire(&provider_a).is_err());

        // Provider B should still have tokens
        assert!(limiter.acquire(&provider_b).is_ok());
    }

    #[test]
    fn test_rate_limiter_reset() {
        let limiter = RateLimiter::new();
        let provider: ProviderId = Cow::Borrowed("RESET_PROVIDER");

        for _ in 0..DEFAULT_BUCKET_CAPACITY as usize {
            let _ = limiter.acquire(&provider);
        }
        assert!(limiter.acquire(&provider).is_err());

        // Reset should restore capacity
        limiter.reset(&provider);
        assert!(limiter.acquire(&provider).is_ok());
    }

    #[test]
    fn test_remaining_tokens() {
        let limiter = RateLimiter::new();
        let provider: ProviderId = Cow::Borrowed("REMAINING_PROVIDER");

        // Initially should have default capacity
        let initial = limiter.remaining_tokens(&provider);
        assert!((initial - DEFAULT_BUCKET_CAPACITY).abs() < 0.01);

        let _ = limiter.acquire(&provider);
        let _ = limiter.acquire(&provider);

        let remaining = limiter.remaining_tokens(&provider);
        assert!((remaining - (DEFAULT_BUCKET_CAPACITY - 2.0)).abs() < 0.01);
    }

    #[test]
    fn test_penalize_blocks_until_retry_after() {
        let limiter = RateLimiter::new();
        let provider: ProviderId = Cow::Borrowed("PENALIZED");

        limiter.penalize(&provider, Duration::from_secs(30));
        assert_eq!(limiter.remaining_tokens(&provider), 0.0);

        match limiter.acquire(&provider) {
            Err(MarketDataError::RateLimited { retry_after, .. }) => {
                assert!(retry_after > Duration::from_secs(25));
                assert!(retry_after <= Duration::from_secs(30));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_penalty_expires() {
        let mut bucket = TokenBucket::with_config(60, 2.0);
        bucket.block_for(Duration::from_secs(5));
        assert!(bucket.try_acquire().is_err());

        // Pretend the block ended two seconds ago
        bucket.blocked_until = Some(Instant::now() - Duration::from_secs(2));
        assert!(bucket.try_acquire().is_ok());
    }
}
