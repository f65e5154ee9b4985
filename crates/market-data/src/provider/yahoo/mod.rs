//! Yahoo Finance quote source.
//!
//! Uses the Yahoo chart API through `yahoo_finance_api` to fetch bars for
//! equities, ETFs, indices (`^GSPC`), cryptocurrencies (`BTC-USD`) and
//! foreign exchange rates (`EURUSD=X`). No API key is needed.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, warn};
use yahoo_finance_api as yahoo;

use crate::errors::MarketDataError;
use crate::models::{Period, PricePoint, Series, Symbol};
use crate::provider::{QuoteSource, RateLimit};

const PROVIDER_ID: &str = "YAHOO";

/// Wait assumed after Yahoo answers with HTTP 429; it sends no Retry-After.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

/// Yahoo Finance quote source.
pub struct YahooProvider {
    connector: yahoo::YahooConnector,
}

impl YahooProvider {
    /// Create a new Yahoo Finance source.
    pub fn new() -> Result<Self, MarketDataError> {
        let connector =
            yahoo::YahooConnector::new().map_err(|e| MarketDataError::UpstreamError {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to initialize Yahoo connector: {}", e),
            })?;
        Ok(Self { connector })
    }

    /// Convert a Yahoo bar to our PricePoint model.
    ///
    /// Returns `Ok(None)` for placeholder bars Yahoo emits for intervals
    /// without trades (close reported as zero).
    fn yahoo_quote_to_point(
        yahoo_quote: &yahoo::Quote,
    ) -> Result<Option<PricePoint>, MarketDataError> {
        if yahoo_quote.close <= 0.0 {
            return Ok(None);
        }

        let timestamp: DateTime<Utc> = Utc
            .timestamp_opt(yahoo_quote.timestamp as i64, 0)
            .single()
            .ok_or_else(|| MarketDataError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: format!("Invalid timestamp: {}", yahoo_quote.timestamp),
            })?;

        let price = |value: f64, field: &str| {
            Decimal::from_f64_retain(value)
                .map(|d| d.round_dp(6))
                .ok_or_else(|| MarketDataError::MalformedResponse {
                    provider: PROVIDER_ID.to_string(),
                    message: format!("Failed to convert {} price {} to Decimal", field, value),
                })
        };

        let close = price(yahoo_quote.close, "close")?;
        // Missing OHLC fields come through as zero; fall back to the close
        let or_close = |value: f64, field: &str| {
            if value > 0.0 {
                price(value, field)
            } else {
                Ok(close)
            }
        };

        Ok(Some(PricePoint {
            timestamp,
            open: or_close(yahoo_quote.open, "open")?,
            high: or_close(yahoo_quote.high, "high")?,
            low: or_close(yahoo_quote.low, "low")?,
            close,
            volume: Decimal::from_u64(yahoo_quote.volume).unwrap_or(Decimal::ZERO),
        }))
    }

    fn map_error(symbol: &Symbol, error: yahoo::YahooError) -> MarketDataError {
        if matches!(error, yahoo::YahooError::NoQuotes | yahoo::YahooError::NoResult) {
            return MarketDataError::NotFound {
                provider: PROVIDER_ID.to_string(),
                symbol: symbol.to_string(),
            };
        }

        let message = error.to_string();
        if message.contains("429") || message.to_ascii_lowercase().contains("too many requests") {
            return MarketDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
                retry_after: RATE_LIMIT_BACKOFF,
            };
        }
        if message.contains("404") {
            return MarketDataError::NotFound {
                provider: PROVIDER_ID.to_string(),
                symbol: symbol.to_string(),
            };
        }

        MarketDataError::UpstreamError {
            provider: PROVIDER_ID.to_string(),
            message,
        }
    }
}

#[async_trait]
impl QuoteSource for YahooProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn priority(&self) -> u8 {
        1
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            requests_per_minute: 2000,
            burst: 20,
        }
    }

    async fn fetch(&self, symbol: &Symbol, period: Period) -> Result<Series, MarketDataError> {
        debug!(
            "Fetching {} bars for {} over {} from Yahoo",
            period.yahoo_interval(),
            symbol,
            period
        );

        let response = self
            .connector
            .get_quote_range(symbol.as_str(), period.yahoo_interval(), period.yahoo_range())
            .await
            .map_err(|e| Self::map_error(symbol, e))?;

        let yahoo_quotes = response.quotes().map_err(|e| Self::map_error(symbol, e))?;

        let mut points = Vec::with_capacity(yahoo_quotes.len());
        for quote in &yahoo_quotes {
            match Self::yahoo_quote_to_point(quote) {
                Ok(Some(point)) => points.push(point),
                Ok(None) => {}
                Err(e) => {
                    warn!("Skipping Yahoo bar for {} due to conversion error: {}", symbol, e);
                }
            }
        }

        if points.is_empty() {
            warn!("No usable bars returned by Yahoo for '{}' over {}", symbol, period);
            return Err(MarketDataError::NotFound {
                provider: PROVIDER_ID.to_string(),
                symbol: symbol.to_string(),
            });
        }

        Ok(Series::new(points))
    }
}
