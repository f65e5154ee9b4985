//! Quote source trait definitions.
//!
//! This module defines the core `QuoteSource` trait that all
//! upstream adapters must implement.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::errors::MarketDataError;
use crate::models::{Period, Series, Symbol};

use super::capabilities::RateLimit;

/// Trait for upstream quote sources.
///
/// Implement this trait to add support for a new market data source.
/// The registry uses the source's priority to order the fallback chain
/// and its rate limit to size the source's token bucket. Sources hold no
/// cache and no rate-limit state of their own.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use finboard_market_data::provider::{QuoteSource, RateLimit};
///
/// struct MySource {
///     api_key: String,
/// }
///
/// #[async_trait]
/// impl QuoteSource for MySource {
///     fn id(&self) -> &'static str {
///         "MY_SOURCE"
///     }
///
///     fn rate_limit(&self) -> RateLimit {
///         RateLimit::default()
///     }
///
///     async fn fetch(&self, symbol: &Symbol, period: Period) -> Result<Series, MarketDataError> {
///         // ... call the upstream API
///     }
/// }
/// ```
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Unique identifier for this source.
    ///
    /// Should be a constant string like "YAHOO", "ALPHA_VANTAGE", etc.
    /// Used for logging, rate limiting and diagnostics.
    fn id(&self) -> &'static str;

    /// Source priority for ordering.
    ///
    /// Lower values = higher priority. Default is 10.
    fn priority(&self) -> u8 {
        10
    }

    /// Rate limiting defaults for this source.
    fn rate_limit(&self) -> RateLimit;

    /// Fetch the price series of `symbol` over `period`.
    ///
    /// Returns the raw series, oldest bar first. The registry validates it
    /// before anything else sees it.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Timeout`, `MalformedResponse`, `UpstreamError` or
    /// `RateLimited` when the upstream reported rate limiting.
    async fn fetch(&self, symbol: &Symbol, period: Period) -> Result<Series, MarketDataError>;

    /// Market capitalization of `symbol`, in its listing currency.
    ///
    /// `Ok(None)` means the source has no figure for the symbol. The default
    /// implementation publishes none.
    async fn market_cap(&self, symbol: &Symbol) -> Result<Option<Decimal>, MarketDataError> {
        let _ = symbol;
        Ok(None)
    }
}
