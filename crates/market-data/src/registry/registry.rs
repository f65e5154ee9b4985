//! Provider registry for orchestrating quote sources.
//!
//! The registry owns the cache and the fallback chain, handling:
//! - Cache lookups with single-flight fetches per `(symbol, period)`
//! - Priority ordering of sources
//! - Rate limiting, with upstream 429s feeding back into the limiter
//! - Per-fetch timeouts
//! - Series validation

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{FetchDiagnostics, RateLimitConfig, RateLimiter, SeriesValidator, SkipReason, ValidatorConfig};
use crate::cache::QuoteCache;
use crate::config::{MarketDataConfig, TtlPolicy};
use crate::errors::{MarketDataError, RetryClass};
use crate::models::{Period, ProviderId, QuoteResult, Series, Symbol};
use crate::provider::{QuoteSource, SourceAdapter};

/// Registry tuning. Maps are keyed by source id.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    pub fetch_timeout: Duration,
    pub ttl: TtlPolicy,
    pub validator: ValidatorConfig,
    /// Replaces a source's advertised rate limit
    pub rate_limits: HashMap<String, RateLimitConfig>,
    /// Replaces a source's advertised priority
    pub priorities: HashMap<String, u8>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            ttl: TtlPolicy::default(),
            validator: ValidatorConfig::default(),
            rate_limits: HashMap::new(),
            priorities: HashMap::new(),
        }
    }
}

/// Outcome of querying one source directly.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceProbe {
    pub source: ProviderId,
    pub ok: bool,
    pub points: usize,
    pub latest_close: Option<Decimal>,
    pub stale: bool,
    pub error_code: Option<&'static str>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Ordered sources plus everything needed to query them. Shared with the
/// cache's fetch tasks, so it lives behind an `Arc`.
struct SourceChain<S> {
    sources: Vec<S>,
    rate_limiter: RateLimiter,
    validator: SeriesValidator,
    fetch_timeout: Duration,
}

impl<S: QuoteSource> SourceChain<S> {
    /// Call one source with the fetch timeout applied.
    async fn fetch_bounded(
        &self,
        source: &S,
        symbol: &Symbol,
        period: Period,
    ) -> Result<Series, MarketDataError> {
        match tokio::time::timeout(self.fetch_timeout, source.fetch(symbol, period)).await {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::Timeout {
                provider: source.id().to_string(),
                timeout: self.fetch_timeout,
            }),
        }
    }

    /// Walk the chain until one source yields a valid series.
    async fn fetch_from_sources(
        &self,
        symbol: &Symbol,
        period: Period,
    ) -> Result<QuoteResult, MarketDataError> {
        let mut diagnostics = FetchDiagnostics::new();

        for source in &self.sources {
            let provider_id: ProviderId = Cow::Borrowed(source.id());

            let _permit = match self.rate_limiter.acquire(&provider_id) {
                Ok(permit) => permit,
                Err(MarketDataError::RateLimited { retry_after, .. }) => {
                    info!(
                        "Source '{}' rate limited locally for {} (retry after {:?}), skipping",
                        provider_id, symbol, retry_after
                    );
                    diagnostics.record_skip(provider_id, SkipReason::RateLimited { retry_after });
                    continue;
                }
                Err(e) => {
                    diagnostics.record_error(provider_id, e);
                    continue;
                }
            };

            debug!("Fetching {} {} from '{}'", symbol, period, provider_id);

            let raw = match self.fetch_bounded(source, symbol, period).await {
                Ok(series) => series,
                Err(e) => {
                    match e.retry_class() {
                        RetryClass::Never => {
                            info!(
                                "Terminal error from '{}' for {}: {}, not retrying",
                                provider_id, symbol, e
                            );
                            return Err(e);
                        }
                        RetryClass::FailoverWithPenalty => {
                            if let MarketDataError::RateLimited { retry_after, .. } = &e {
                                self.rate_limiter.penalize(&provider_id, *retry_after);
                            }
                            warn!(
                                "Source '{}' rejected {} with {}, backing off and trying next source",
                                provider_id, symbol, e
                            );
                        }
                        RetryClass::NextProvider => {
                            info!(
                                "Source '{}' failed for {}: {}, trying next source",
                                provider_id, symbol, e
                            );
                        }
                    }
                    diagnostics.record_error(provider_id, e);
                    continue;
                }
            };

            let validated = match self.validator.validate(symbol, period, raw, Utc::now()) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        "Series from '{}' for {} failed validation: {}",
                        provider_id, symbol, e
                    );
                    diagnostics.record_error(provider_id, e);
                    continue;
                }
            };

            info!(
                "Fetched {} bars for {} {} from '{}'",
                validated.series.len(),
                symbol,
                period,
                provider_id
            );
            diagnostics.record_success(provider_id.clone());

            return Ok(QuoteResult {
                symbol: symbol.clone(),
                period,
                series: validated.series,
                source: provider_id,
                fetched_at: Utc::now(),
                stale: validated.stale,
                diagnostics,
            });
        }

        warn!(
            "All sources exhausted for {} {}: {}",
            symbol,
            period,
            diagnostics.summary()
        );
        Err(MarketDataError::AllSourcesExhausted {
            symbol: symbol.to_string(),
            diagnostics,
        })
    }
}

/// Provider registry for orchestrating quote fetching.
///
/// Generic over the source type so tests can plug scripted sources; the
/// production registry uses [`SourceAdapter`].
pub struct ProviderRegistry<S = SourceAdapter> {
    chain: Arc<SourceChain<S>>,
    cache: QuoteCache,
    ttl: TtlPolicy,
}

impl<S> ProviderRegistry<S>
where
    S: QuoteSource + 'static,
{
    /// Create a registry with default tuning.
    pub fn new(sources: Vec<S>) -> Self {
        Self::with_config(sources, RegistryConfig::default())
    }

    /// Create a registry with custom tuning.
    ///
    /// Sources are ordered by priority, ascending; ties keep the given order.
    pub fn with_config(sources: Vec<S>, config: RegistryConfig) -> Self {
        let priority_of = |source: &S| {
            config
                .priorities
                .get(source.id())
                .copied()
                .unwrap_or_else(|| source.priority())
        };
        let mut sources = sources;
        sources.sort_by_key(priority_of);

        let rate_limiter = RateLimiter::new();
        for source in &sources {
            let provider_id: ProviderId = Cow::Borrowed(source.id());
            let limit = config
                .rate_limits
                .get(source.id())
                .cloned()
                .unwrap_or_else(|| source.rate_limit().into());
            rate_limiter.configure(&provider_id, limit);
        }

        debug!(
            "Registry sources in order: {:?}",
            sources.iter().map(|s| s.id()).collect::<Vec<_>>()
        );

        Self {
            chain: Arc::new(SourceChain {
                sources,
                rate_limiter,
                validator: SeriesValidator::with_config(config.validator),
                fetch_timeout: config.fetch_timeout,
            }),
            cache: QuoteCache::new(),
            ttl: config.ttl,
        }
    }

    /// Validated series for `symbol` over `period`, from cache when live.
    ///
    /// Concurrent calls for the same key share one upstream fetch and
    /// receive the same `Arc`.
    pub async fn get_series(
        &self,
        symbol: &Symbol,
        period: Period,
    ) -> Result<Arc<QuoteResult>, MarketDataError> {
        let chain = Arc::clone(&self.chain);
        let owned = symbol.clone();
        self.cache
            .get_or_fetch(symbol, period, self.ttl.ttl_for(period), move || async move {
                chain.fetch_from_sources(&owned, period).await
            })
            .await
    }

    /// Walk the fallback chain without touching the cache.
    pub async fn fetch_from_sources(
        &self,
        symbol: &Symbol,
        period: Period,
    ) -> Result<QuoteResult, MarketDataError> {
        self.chain.fetch_from_sources(symbol, period).await
    }

    /// Query every source directly for `symbol`, bypassing the cache.
    ///
    /// Each probe still spends a rate-limit token, so a limited source
    /// reports `rate_limited` instead of being called.
    pub async fn probe(&self, symbol: &Symbol, period: Period) -> Vec<SourceProbe> {
        let chain = &self.chain;
        let mut probes = Vec::with_capacity(chain.sources.len());

        for source in &chain.sources {
            let provider_id: ProviderId = Cow::Borrowed(source.id());
            let started = Instant::now();

            let outcome = match chain.rate_limiter.acquire(&provider_id) {
                Ok(_permit) => chain
                    .fetch_bounded(source, symbol, period)
                    .await
                    .and_then(|raw| chain.validator.validate(symbol, period, raw, Utc::now())),
                Err(e) => Err(e),
            };
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let probe = match outcome {
                Ok(validated) => SourceProbe {
                    source: provider_id,
                    ok: true,
                    points: validated.series.len(),
                    latest_close: validated.series.last().map(|p| p.close),
                    stale: validated.stale,
                    error_code: None,
                    error: None,
                    elapsed_ms,
                },
                Err(e) => {
                    debug!("Probe of '{}' for {} failed: {}", provider_id, symbol, e);
                    SourceProbe {
                        source: provider_id,
                        ok: false,
                        points: 0,
                        latest_close: None,
                        stale: false,
                        error_code: Some(e.code()),
                        error: Some(e.to_string()),
                        elapsed_ms,
                    }
                }
            };
            probes.push(probe);
        }

        probes
    }

    /// Market capitalization of `symbol` from the first source that
    /// publishes one. Failures are logged and the next source is asked;
    /// nothing is cached.
    pub async fn market_cap(&self, symbol: &Symbol) -> Option<Decimal> {
        let chain = &self.chain;

        for source in &chain.sources {
            let provider_id: ProviderId = Cow::Borrowed(source.id());
            let _permit = match chain.rate_limiter.acquire(&provider_id) {
                Ok(permit) => permit,
                Err(e) => {
                    debug!("Skipping '{}' for market cap of {}: {}", provider_id, symbol, e);
                    continue;
                }
            };

            match tokio::time::timeout(chain.fetch_timeout, source.market_cap(symbol)).await {
                Ok(Ok(Some(cap))) => {
                    debug!("Market cap for {} from '{}'", symbol, provider_id);
                    return Some(cap);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    if let MarketDataError::RateLimited { retry_after, .. } = &e {
                        chain.rate_limiter.penalize(&provider_id, *retry_after);
                    }
                    info!(
                        "Market cap lookup on '{}' failed for {}: {}",
                        provider_id, symbol, e
                    );
                }
                Err(_) => {
                    info!(
                        "Market cap lookup on '{}' timed out for {} after {:?}",
                        provider_id, symbol, chain.fetch_timeout
                    );
                }
            }
        }

        None
    }

    /// Source ids in the order they are tried.
    pub fn source_ids(&self) -> Vec<&'static str> {
        self.chain.sources.iter().map(|s| s.id()).collect()
    }

    pub fn cache(&self) -> &QuoteCache {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.chain.rate_limiter
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        self.ttl
    }
}

impl ProviderRegistry<SourceAdapter> {
    /// Build the production registry from configuration.
    ///
    /// Source order follows the configured list; per-source rate limit
    /// overrides replace the adapters' defaults.
    pub fn from_config(config: &MarketDataConfig) -> Result<Self, MarketDataError> {
        let built = config.build_sources()?;

        let mut registry_config = RegistryConfig {
            fetch_timeout: config.fetch_timeout(),
            ttl: config.ttl_policy(),
            validator: config.validator_config(),
            ..RegistryConfig::default()
        };

        let mut sources = Vec::with_capacity(built.len());
        for (position, (kind, source)) in built.into_iter().enumerate() {
            let id = source.id().to_string();
            let limit = config.rate_limit_for(kind, source.rate_limit().into());
            registry_config.rate_limits.insert(id.clone(), limit);
            registry_config
                .priorities
                .insert(id, u8::try_from(position).unwrap_or(u8::MAX));
            sources.push(source);
        }

        info!(
            "Market data registry configured with {} source(s)",
            sources.len()
        );
        Ok(Self::with_config(sources, registry_config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PricePoint;
    use crate::provider::RateLimit;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        NotFound,
        Upstream429,
        Hang,
        Garbage,
    }

    struct MockSource {
        id: &'static str,
        priority: u8,
        behavior: Behavior,
        call_count: Arc<AtomicUsize>,
    }

    impl MockSource {
        fn new(id: &'static str, priority: u8, behavior: Behavior) -> Self {
            Self {
                id,
                priority,
                behavior,
                call_count: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn calls(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.call_count)
        }
    }

    fn fresh_series() -> Series {
        let now = Utc::now();
        let points = (0..5)
            .map(|i| {
                let close = dec!(100) + Decimal::from(i);
                PricePoint::ohlcv(
                    now - chrono::Duration::days(4 - i),
                    close,
                    close + dec!(1),
                    close - dec!(1),
                    close,
                    dec!(1000),
                )
            })
            .collect();
        Series::new(points)
    }

    #[async_trait]
    impl QuoteSource for MockSource {
        fn id(&self) -> &'static str {
            self.id
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn rate_limit(&self) -> RateLimit {
            RateLimit {
                requests_per_minute: 600,
                burst: 10,
            }
        }

        async fn fetch(&self, symbol: &Symbol, _period: Period) -> Result<Series, MarketDataError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(fresh_series()),
                Behavior::Fail => Err(MarketDataError::UpstreamError {
                    provider: self.id.to_string(),
                    message: "Mock failure".to_string(),
                }),
                Behavior::NotFound => Err(MarketDataError::NotFound {
                    provider: self.id.to_string(),
                    symbol: symbol.to_string(),
                }),
                Behavior::Upstream429 => Err(MarketDataError::RateLimited {
                    provider: self.id.to_string(),
                    retry_after: Duration::from_secs(30),
                }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(fresh_series())
                }
                Behavior::Garbage => {
                    let mut points = fresh_series().into_points();
                    points[2].high = dec!(1);
                    Ok(Series::new(points))
                }
            }
        }

        async fn market_cap(&self, _symbol: &Symbol) -> Result<Option<Decimal>, MarketDataError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(Some(dec!(2500000000))),
                Behavior::Fail => Err(MarketDataError::UpstreamError {
                    provider: self.id.to_string(),
                    message: "Mock failure".to_string(),
                }),
                Behavior::Upstream429 => Err(MarketDataError::RateLimited {
                    provider: self.id.to_string(),
                    retry_after: Duration::from_secs(30),
                }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(None)
                }
                Behavior::NotFound | Behavior::Garbage => Ok(None),
            }
        }
    }

    fn aapl() -> Symbol {
        Symbol::parse("AAPL").unwrap()
    }

    #[test]
    fn test_source_ordering_by_priority() {
        let registry = ProviderRegistry::new(vec![
            MockSource::new("LOW_PRIORITY", 20, Behavior::Succeed),
            MockSource::new("HIGH_PRIORITY", 5, Behavior::Succeed),
            MockSource::new("MED_PRIORITY", 10, Behavior::Succeed),
            MockSource::new("MED_PRIORITY_2", 10, Behavior::Succeed),
        ]);

        assert_eq!(
            registry.source_ids(),
            vec!["HIGH_PRIORITY", "MED_PRIORITY", "MED_PRIORITY_2", "LOW_PRIORITY"]
        );
    }

    #[test]
    fn test_priority_overrides_win() {
        let mut config = RegistryConfig::default();
        config.priorities.insert("B".to_string(), 0);
        let registry = ProviderRegistry::with_config(
            vec![
                MockSource::new("A", 1, Behavior::Succeed),
                MockSource::new("B", 2, Behavior::Succeed),
            ],
            config,
        );
        assert_eq!(registry.source_ids(), vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_fallback_records_trail() {
        let registry = ProviderRegistry::new(vec![
            MockSource::new("PRIMARY", 1, Behavior::Fail),
            MockSource::new("SECONDARY", 2, Behavior::Succeed),
        ]);

        let result = registry.fetch_from_sources(&aapl(), Period::OneMonth).await.unwrap();
        assert_eq!(result.source, "SECONDARY");
        assert_eq!(result.diagnostics.attempts.len(), 2);
        assert_eq!(result.diagnostics.errors()[0].0, "PRIMARY");
        assert!(result.diagnostics.has_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_source_times_out() {
        let config = RegistryConfig {
            fetch_timeout: Duration::from_millis(200),
            ..RegistryConfig::default()
        };
        let registry = ProviderRegistry::with_config(
            vec![
                MockSource::new("SLOW", 1, Behavior::Hang),
                MockSource::new("FAST", 2, Behavior::Succeed),
            ],
            config,
        );

        let result = registry.fetch_from_sources(&aapl(), Period::OneMonth).await.unwrap();
        assert_eq!(result.source, "FAST");
        let errors = result.diagnostics.errors();
        assert!(matches!(errors[0].1, MarketDataError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_invalid_series_falls_through() {
        let registry = ProviderRegistry::new(vec![
            MockSource::new("BAD", 1, Behavior::Garbage),
            MockSource::new("GOOD", 2, Behavior::Succeed),
        ]);

        let result = registry.fetch_from_sources(&aapl(), Period::OneMonth).await.unwrap();
        assert_eq!(result.source, "GOOD");
        assert!(matches!(
            result.diagnostics.errors()[0].1,
            MarketDataError::InvalidData { .. }
        ));
    }

    #[tokio::test]
    async fn test_all_not_found_is_reported() {
        let registry = ProviderRegistry::new(vec![
            MockSource::new("A", 1, Behavior::NotFound),
            MockSource::new("B", 2, Behavior::NotFound),
        ]);

        let err = registry
            .fetch_from_sources(&aapl(), Period::OneMonth)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::AllSourcesExhausted { .. }));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_upstream_rate_limit_penalizes_source() {
        let limited = MockSource::new("LIMITED", 1, Behavior::Upstream429);
        let limited_calls = limited.calls();
        let registry = ProviderRegistry::new(vec![
            limited,
            MockSource::new("BACKUP", 2, Behavior::Succeed),
        ]);

        let first = registry.fetch_from_sources(&aapl(), Period::OneMonth).await.unwrap();
        assert_eq!(first.source, "BACKUP");
        assert_eq!(
            registry.rate_limiter().remaining_tokens(&Cow::Borrowed("LIMITED")),
            0.0
        );

        // Second walk skips the penalized source without calling it
        let second = registry.fetch_from_sources(&aapl(), Period::OneMonth).await.unwrap();
        assert_eq!(second.source, "BACKUP");
        assert_eq!(limited_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.diagnostics.skip_reasons().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_registry_is_exhausted() {
        let registry: ProviderRegistry<MockSource> = ProviderRegistry::new(Vec::new());
        let err = registry.get_series(&aapl(), Period::OneMonth).await.unwrap_err();
        assert!(matches!(err, MarketDataError::AllSourcesExhausted { .. }));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_series_uses_cache() {
        let source = MockSource::new("ONLY", 1, Behavior::Succeed);
        let calls = source.calls();
        let registry = ProviderRegistry::new(vec![source]);

        let first = registry.get_series(&aapl(), Period::OneMonth).await.unwrap();
        let second = registry.get_series(&aapl(), Period::OneMonth).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Other period is a different key
        registry.get_series(&aapl(), Period::ThreeMonths).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_probe_reports_every_source() {
        let registry = ProviderRegistry::new(vec![
            MockSource::new("UP", 1, Behavior::Succeed),
            MockSource::new("DOWN", 2, Behavior::NotFound),
        ]);

        let probes = registry.probe(&aapl(), Period::OneMonth).await;
        assert_eq!(probes.len(), 2);
        assert!(probes[0].ok);
        assert_eq!(probes[0].points, 5);
        assert_eq!(probes[0].latest_close, Some(dec!(104)));
        assert!(!probes[1].ok);
        assert_eq!(probes[1].error_code, Some("not_found"));
        assert!(registry.cache().is_empty());
    }

    #[tokio::test]
    async fn test_market_cap_walks_chain_until_a_figure() {
        let failing = MockSource::new("A", 1, Behavior::Fail);
        let silent = MockSource::new("B", 2, Behavior::NotFound);
        let serving = MockSource::new("C", 3, Behavior::Succeed);
        let calls = [failing.calls(), silent.calls(), serving.calls()];
        let registry = ProviderRegistry::new(vec![failing, silent, serving]);

        assert_eq!(registry.market_cap(&aapl()).await, Some(dec!(2500000000)));
        for count in &calls {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
        assert!(registry.cache().is_empty());
    }

    #[tokio::test]
    async fn test_market_cap_none_when_no_source_has_it() {
        let registry = ProviderRegistry::new(vec![
            MockSource::new("A", 1, Behavior::NotFound),
            MockSource::new("B", 2, Behavior::Upstream429),
        ]);
        assert_eq!(registry.market_cap(&aapl()).await, None);

        // The upstream 429 blocks B's bucket
        let b: ProviderId = Cow::Borrowed("B");
        assert!(registry.rate_limiter().acquire(&b).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_market_cap_lookup_is_bounded_by_fetch_timeout() {
        let config = RegistryConfig {
            fetch_timeout: Duration::from_millis(200),
            ..RegistryConfig::default()
        };
        let registry = ProviderRegistry::with_config(
            vec![
                MockSource::new("SLOW", 1, Behavior::Hang),
                MockSource::new("FAST", 2, Behavior::Succeed),
            ],
            config,
        );
        assert_eq!(registry.market_cap(&aapl()).await, Some(dec!(2500000000)));
    }
}
