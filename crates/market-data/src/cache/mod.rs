//! In-memory quote cache with TTL and single-flight fetches.
//!
//! Entries are keyed by `(Symbol, Period)`. A key is either `Ready` with a
//! result and an expiry, or `InFlight` with a shared handle to the fetch that
//! will fill it. Concurrent misses on one key all await the same fetch, so the
//! upstream sees exactly one request per key per expiry.
//!
//! The fetch runs on its own tokio task and writes the cache itself. A caller
//! that drops its future does not cancel the fetch for everyone else.
//!
//! Expiry is passive: entries are checked on read. [`QuoteCache::spawn_sweeper`]
//! optionally removes expired entries in the background to bound memory.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::errors::MarketDataError;
use crate::models::{Period, QuoteResult, Symbol};

type FetchOutcome = Result<Arc<QuoteResult>, MarketDataError>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: Symbol,
    pub period: Period,
}

impl CacheKey {
    pub fn new(symbol: Symbol, period: Period) -> Self {
        Self { symbol, period }
    }
}

enum Slot {
    Ready {
        result: Arc<QuoteResult>,
        inserted_at: Instant,
        expires_at: Instant,
    },
    InFlight {
        fetch: SharedFetch,
        generation: u64,
    },
}

impl Slot {
    fn ready(result: Arc<QuoteResult>, ttl: Duration) -> Self {
        let inserted_at = Instant::now();
        Slot::Ready {
            result,
            inserted_at,
            // Saturates instead of panicking on absurd TTLs
            expires_at: inserted_at.checked_add(ttl).unwrap_or(inserted_at + MAX_TTL),
        }
    }

    fn live(&self, now: Instant) -> Option<&Arc<QuoteResult>> {
        match self {
            Slot::Ready {
                result, expires_at, ..
            } if now < *expires_at => Some(result),
            _ => None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self, Slot::Ready { expires_at, .. } if now >= *expires_at)
    }
}

/// Upper bound applied when `Instant + ttl` would overflow.
const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

struct Inner {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    generation: AtomicU64,
}

/// Shared handle to the quote cache. Cloning is cheap and every clone sees
/// the same entries.
#[derive(Clone)]
pub struct QuoteCache {
    inner: Arc<Inner>,
}

impl QuoteCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Lock the slot map, recovering from poison if necessary.
    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        lock_slots(&self.inner)
    }

    /// Live entry for the key, if any. Never triggers a fetch.
    pub fn get(&self, symbol: &Symbol, period: Period) -> Option<Arc<QuoteResult>> {
        let key = CacheKey::new(symbol.clone(), period);
        self.lock().get(&key).and_then(|slot| slot.live(Instant::now()).cloned())
    }

    /// Store a result, replacing whatever the key held.
    pub fn put(&self, symbol: Symbol, period: Period, result: Arc<QuoteResult>, ttl: Duration) {
        let key = CacheKey::new(symbol, period);
        self.lock().insert(key, Slot::ready(result, ttl));
    }

    /// Return the live entry for the key, or run `fetch_fn` to produce one.
    ///
    /// At most one `fetch_fn` runs per key at a time; concurrent callers for
    /// the same key await the same outcome and receive the same `Arc`.
    /// Successful results are stored with `ttl`. Failures reach every waiter
    /// and are not stored, so the next call fetches again.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        symbol: &Symbol,
        period: Period,
        ttl: Duration,
        fetch_fn: F,
    ) -> Result<Arc<QuoteResult>, MarketDataError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<QuoteResult, MarketDataError>> + Send + 'static,
    {
        let key = CacheKey::new(symbol.clone(), period);

        let fetch = {
            let mut slots = self.lock();
            if let Some(result) = slots.get(&key).and_then(|slot| slot.live(Instant::now())) {
                debug!("Cache hit for {} {}", symbol, period);
                return Ok(result.clone());
            }

            match slots.get(&key) {
                Some(Slot::InFlight { fetch, .. }) => {
                    debug!("Joining in-flight fetch for {} {}", symbol, period);
                    fetch.clone()
                }
                _ => {
                    debug!("Cache miss for {} {}, fetching", symbol, period);
                    let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                    let fetch = self.spawn_fetch(key.clone(), generation, ttl, fetch_fn());
                    slots.insert(
                        key,
                        Slot::InFlight {
                            fetch: fetch.clone(),
                            generation,
                        },
                    );
                    fetch
                }
            }
        };

        // Lock released; waiting happens outside the critical section
        fetch.await
    }

    fn spawn_fetch<Fut>(
        &self,
        key: CacheKey,
        generation: u64,
        ttl: Duration,
        fut: Fut,
    ) -> SharedFetch
    where
        Fut: Future<Output = Result<QuoteResult, MarketDataError>> + Send + 'static,
    {
        let task_cache = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let outcome = fut.await.map(Arc::new);
            task_cache.complete(&task_key, generation, outcome.as_ref().ok(), ttl);
            outcome
        });

        let cache = self.clone();
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The task never reached `complete`; free the key
                    cache.complete(&key, generation, None, ttl);
                    warn!("Fetch task for {} {} failed: {}", key.symbol, key.period, e);
                    Err(MarketDataError::Internal(format!(
                        "fetch task for {} failed: {}",
                        key.symbol, e
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Replace our in-flight marker with the result, or drop it on failure.
    /// A marker from a newer fetch, or an entry written by `put`/`invalidate`
    /// meanwhile, is left alone.
    fn complete(
        &self,
        key: &CacheKey,
        generation: u64,
        result: Option<&Arc<QuoteResult>>,
        ttl: Duration,
    ) {
        let mut slots = self.lock();
        let ours = matches!(
            slots.get(key),
            Some(Slot::InFlight { generation: g, .. }) if *g == generation
        );
        if !ours {
            return;
        }
        match result {
            Some(result) => {
                slots.insert(key.clone(), Slot::ready(result.clone(), ttl));
            }
            None => {
                slots.remove(key);
            }
        }
    }

    /// Drop the entry for a key. An in-flight fetch keeps running for its
    /// waiters but its result is not stored.
    pub fn invalidate(&self, symbol: &Symbol, period: Period) -> bool {
        let key = CacheKey::new(symbol.clone(), period);
        self.lock().remove(&key).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut slots = self.lock();
        let n = slots.len();
        slots.clear();
        debug!("Cache cleared ({} entries)", n);
    }

    /// Remove expired entries; returns how many were removed.
    pub fn clear_expired(&self) -> usize {
        sweep(&self.inner)
    }

    /// Number of stored results, including expired ones not yet swept.
    /// In-flight fetches are not counted.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of the live entry for a key.
    pub fn age(&self, symbol: &Symbol, period: Period) -> Option<Duration> {
        let key = CacheKey::new(symbol.clone(), period);
        let now = Instant::now();
        match self.lock().get(&key) {
            Some(Slot::Ready {
                inserted_at,
                expires_at,
                ..
            }) if now < *expires_at => Some(now.duration_since(*inserted_at)),
            _ => None,
        }
    }

    /// Periodically remove expired entries.
    ///
    /// The task holds only a weak reference and exits once every cache handle
    /// is dropped. Must be called inside a tokio runtime.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let removed = sweep(&inner);
                if removed > 0 {
                    debug!("Cache sweeper removed {} expired entries", removed);
                }
            }
        })
    }
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_slots(inner: &Inner) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
    inner.slots.lock().unwrap_or_else(|poisoned| {
        warn!("Quote cache mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn sweep(inner: &Inner) -> usize {
    let now = Instant::now();
    let mut slots = lock_slots(inner);
    let before = slots.len();
    slots.retain(|_, slot| !slot.is_expired(now));
    before - slots.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PricePoint, Series};
    use crate::registry::FetchDiagnostics;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::borrow::Cow;
    use std::sync::atomic::AtomicUsize;

    fn symbol(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn result_for(s: &str) -> QuoteResult {
        QuoteResult {
            symbol: symbol(s),
            period: Period::OneMonth,
            series: Series::new(vec![PricePoint::ohlcv(
                Utc::now(),
                dec!(100),
                dec!(101),
                dec!(99),
                dec!(100.5),
                dec!(1000),
            )]),
            source: Cow::Borrowed("TEST"),
            fetched_at: Utc::now(),
            stale: false,
            diagnostics: FetchDiagnostics::new(),
        }
    }

    #[tokio::test]
    async fn test_get_and_put() {
        let cache = QuoteCache::new();
        let aapl = symbol("AAPL");
        assert!(cache.get(&aapl, Period::OneMonth).is_none());

        let result = Arc::new(result_for("AAPL"));
        cache.put(aapl.clone(), Period::OneMonth, result.clone(), Duration::from_secs(60));

        let hit = cache.get(&aapl, Period::OneMonth).unwrap();
        assert!(Arc::ptr_eq(&hit, &result));
        // Different period is a different key
        assert!(cache.get(&aapl, Period::OneYear).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_never_live() {
        let cache = QuoteCache::new();
        let aapl = symbol("AAPL");
        cache.put(aapl.clone(), Period::OneMonth, Arc::new(result_for("AAPL")), Duration::ZERO);
        assert!(cache.get(&aapl, Period::OneMonth).is_none());
        assert_eq!(cache.clear_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_get_or_fetch_caches_success() {
        let cache = QuoteCache::new();
        let aapl = symbol("AAPL");
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            cache
                .get_or_fetch(&aapl, Period::OneMonth, Duration::from_secs(60), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(result_for("AAPL"))
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.age(&aapl, Period::OneMonth).is_some());
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = QuoteCache::new();
        let aapl = symbol("AAPL");
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let err = cache
                .get_or_fetch(&aapl, Period::OneMonth, Duration::from_secs(60), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(MarketDataError::InvalidData {
                        message: "boom".to_string(),
                    })
                })
                .await
                .unwrap_err();
            assert!(matches!(err, MarketDataError::InvalidData { .. }));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_fetch() {
        let cache = QuoteCache::new();
        let aapl = symbol("AAPL");

        let fut = cache.get_or_fetch(&aapl, Period::OneMonth, Duration::from_secs(60), || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(result_for("AAPL"))
        });
        // Poll once so the fetch is registered, then drop the caller
        let _ = tokio::time::timeout(Duration::from_millis(1), fut).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.get(&aapl, Period::OneMonth).is_some());
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = QuoteCache::new();
        let aapl = symbol("AAPL");
        let msft = symbol("MSFT");
        cache.put(aapl.clone(), Period::OneMonth, Arc::new(result_for("AAPL")), Duration::from_secs(60));
        cache.put(msft.clone(), Period::OneMonth, Arc::new(result_for("MSFT")), Duration::from_secs(60));

        assert!(cache.invalidate(&aapl, Period::OneMonth));
        assert!(!cache.invalidate(&aapl, Period::OneMonth));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.get(&msft, Period::OneMonth).is_none());
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let cache = QuoteCache::new();
        let aapl = symbol("AAPL");
        cache.put(aapl, Period::OneMonth, Arc::new(result_for("AAPL")), Duration::from_millis(5));

        let handle = cache.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.len(), 0);
        handle.abort();
    }
}
