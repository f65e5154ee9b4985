//! Alpha Vantage quote source.
//!
//! This module provides price series from the Alpha Vantage API:
//! - Intraday bars via TIME_SERIES_INTRADAY (5min)
//! - Daily bars via TIME_SERIES_DAILY
//! - Weekly bars via TIME_SERIES_WEEKLY for multi-year history
//!
//! Note: Alpha Vantage free tier is limited to 5 API calls per minute.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use log::{debug, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::errors::MarketDataError;
use crate::models::{Granularity, Period, PricePoint, Series, Symbol};
use crate::provider::{QuoteSource, RateLimit};

const BASE_URL: &str = "https://www.alphavantage.co/query";
const PROVIDER_ID: &str = "ALPHA_VANTAGE";

/// Alpha Vantage asks callers to wait a minute once the per-minute quota is spent.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

/// Intraday timestamps are exchange local time.
const EXCHANGE_TZ: Tz = chrono_tz::America::New_York;

/// Alpha Vantage quote source.
///
/// Free tier is limited to 5 API calls per minute.
pub struct AlphaVantageProvider {
    client: Client,
    api_key: String,
    timeout: Duration,
}

// ============================================================================
// Response structures for Alpha Vantage API
// ============================================================================

/// TIME_SERIES_* response. The series lives under a key that depends on the
/// function, so everything that is not an error field is collected.
#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(flatten)]
    sections: HashMap<String, serde_json::Value>,
}

/// OVERVIEW response. Unknown symbols get an empty object, and missing
/// figures are reported as the string "None".
#[derive(Debug, Deserialize)]
struct OverviewResponse {
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "MarketCapitalization")]
    market_capitalization: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Bar {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: String,
}

/// Which endpoint serves a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Intraday,
    Daily,
    Weekly,
}

impl Function {
    fn for_period(period: Period) -> Self {
        match period.granularity() {
            Granularity::Minutes5 => Self::Intraday,
            Granularity::Weekly => Self::Weekly,
            // No hourly endpoint; five days of daily bars is the closest match
            Granularity::Hourly | Granularity::Daily => Self::Daily,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Intraday => "TIME_SERIES_INTRADAY",
            Self::Daily => "TIME_SERIES_DAILY",
            Self::Weekly => "TIME_SERIES_WEEKLY",
        }
    }

    fn series_key(self) -> &'static str {
        match self {
            Self::Intraday => "Time Series (5min)",
            Self::Daily => "Time Series (Daily)",
            Self::Weekly => "Weekly Time Series",
        }
    }
}

impl AlphaVantageProvider {
    /// Create a new Alpha Vantage source.
    pub fn new(api_key: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            timeout,
        }
    }

    /// Make a request to the Alpha Vantage API.
    async fn request(&self, params: &[(&str, &str)]) -> Result<String, MarketDataError> {
        let mut all_params: Vec<(&str, &str)> = params.to_vec();
        all_params.push(("apikey", &self.api_key));

        let url = reqwest::Url::parse_with_params(BASE_URL, &all_params).map_err(|e| {
            MarketDataError::UpstreamError {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to build URL: {}", e),
            }
        })?;

        debug!(
            "Alpha Vantage request: {}",
            url.as_str().replace(&self.api_key, "***")
        );

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                MarketDataError::Timeout {
                    provider: PROVIDER_ID.to_string(),
                    timeout: self.timeout,
                }
            } else {
                MarketDataError::UpstreamError {
                    provider: PROVIDER_ID.to_string(),
                    // without_url keeps the API key out of the message
                    message: e.without_url().to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
                retry_after: RATE_LIMIT_BACKOFF,
            });
        }

        if !status.is_success() {
            return Err(MarketDataError::UpstreamError {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {}", status),
            });
        }

        response
            .text()
            .await
            .map_err(|e| MarketDataError::UpstreamError {
                provider: PROVIDER_ID.to_string(),
                message: e.without_url().to_string(),
            })
    }

    /// Check for API-level errors in the response.
    fn check_api_error(
        symbol: &Symbol,
        error_message: &Option<String>,
        note: &Option<String>,
        information: &Option<String>,
    ) -> Result<(), MarketDataError> {
        if let Some(ref msg) = error_message {
            if msg.contains("Invalid API call") || msg.contains("not found") {
                return Err(MarketDataError::NotFound {
                    provider: PROVIDER_ID.to_string(),
                    symbol: symbol.to_string(),
                });
            }
            return Err(MarketDataError::UpstreamError {
                provider: PROVIDER_ID.to_string(),
                message: msg.clone(),
            });
        }

        // "Note" and "Information" carry the quota messages
        for msg in [note, information].into_iter().flatten() {
            let lower = msg.to_ascii_lowercase();
            if lower.contains("call frequency")
                || lower.contains("rate limit")
                || lower.contains("requests per day")
            {
                return Err(MarketDataError::RateLimited {
                    provider: PROVIDER_ID.to_string(),
                    retry_after: RATE_LIMIT_BACKOFF,
                });
            }
            warn!("Alpha Vantage note: {}", msg);
        }

        Ok(())
    }

    /// Parse a date (`YYYY-MM-DD`) or intraday timestamp (`YYYY-MM-DD HH:MM:SS`).
    fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
            let local = match EXCHANGE_TZ.from_local_datetime(&naive) {
                LocalResult::Single(dt) => dt,
                // Repeated hour when clocks fall back
                LocalResult::Ambiguous(earliest, _) => earliest,
                // Skipped hour when clocks spring forward
                LocalResult::None => EXCHANGE_TZ
                    .from_local_datetime(&(naive + chrono::Duration::hours(1)))
                    .earliest()?,
            };
            return Some(local.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .and_then(|dt| Utc.from_local_datetime(&dt).single())
    }

    /// Parse a decimal value from a string.
    fn parse_decimal(s: &str) -> Option<Decimal> {
        Decimal::from_str(s.trim()).ok()
    }

    /// Turn a response body into a series trimmed to the period.
    fn parse_series(
        symbol: &Symbol,
        period: Period,
        function: Function,
        text: &str,
    ) -> Result<Series, MarketDataError> {
        let mut response: TimeSeriesResponse =
            serde_json::from_str(text).map_err(|e| MarketDataError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse response: {}", e),
            })?;

        Self::check_api_error(
            symbol,
            &response.error_message,
            &response.note,
            &response.information,
        )?;

        let section = response
            .sections
            .remove(function.series_key())
            .ok_or_else(|| MarketDataError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: format!("Missing '{}' section", function.series_key()),
            })?;

        let bars: HashMap<String, Bar> =
            serde_json::from_value(section).map_err(|e| MarketDataError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse bars: {}", e),
            })?;

        let mut points: Vec<PricePoint> = Vec::with_capacity(bars.len());
        for (raw_ts, bar) in bars {
            let parsed = (|| {
                Some(PricePoint::ohlcv(
                    Self::parse_timestamp(&raw_ts)?,
                    Self::parse_decimal(&bar.open)?,
                    Self::parse_decimal(&bar.high)?,
                    Self::parse_decimal(&bar.low)?,
                    Self::parse_decimal(&bar.close)?,
                    Self::parse_decimal(&bar.volume)?,
                ))
            })();
            match parsed {
                Some(point) => points.push(point),
                None => {
                    return Err(MarketDataError::MalformedResponse {
                        provider: PROVIDER_ID.to_string(),
                        message: format!("Unparseable bar at '{}'", raw_ts),
                    })
                }
            }
        }

        if points.is_empty() {
            return Err(MarketDataError::NotFound {
                provider: PROVIDER_ID.to_string(),
                symbol: symbol.to_string(),
            });
        }

        // Sort by timestamp ascending
        points.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        Ok(Series::new(points).trailing(period))
    }

    /// Market capitalization from an OVERVIEW response body.
    fn parse_market_cap(symbol: &Symbol, text: &str) -> Result<Option<Decimal>, MarketDataError> {
        let response: OverviewResponse =
            serde_json::from_str(text).map_err(|e| MarketDataError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse overview: {}", e),
            })?;

        Self::check_api_error(
            symbol,
            &response.error_message,
            &response.note,
            &response.information,
        )?;

        Ok(response
            .market_capitalization
            .as_deref()
            .and_then(Self::parse_decimal)
            .filter(|mc| mc.is_sign_positive() && !mc.is_zero()))
    }
}

#[async_trait]
impl QuoteSource for AlphaVantageProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn priority(&self) -> u8 {
        // Lower priority than Yahoo due to rate limits
        2
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            requests_per_minute: 5, // Free tier is very limited
            burst: 1,
        }
    }

    async fn fetch(&self, symbol: &Symbol, period: Period) -> Result<Series, MarketDataError> {
        let function = Function::for_period(period);
        // compact returns the latest 100 bars
        let outputsize = match period {
            Period::SixMonths | Period::OneYear => "full",
            _ => "compact",
        };

        let mut params = vec![
            ("function", function.name()),
            ("symbol", symbol.as_str()),
        ];
        match function {
            Function::Intraday => {
                params.push(("interval", "5min"));
                params.push(("outputsize", outputsize));
            }
            Function::Daily => params.push(("outputsize", outputsize)),
            Function::Weekly => {}
        }

        let text = self.request(&params).await?;
        let series = Self::parse_series(symbol, period, function, &text)?;

        debug!(
            "Alpha Vantage: fetched {} bars for {} over {}",
            series.len(),
            symbol,
            period
        );

        Ok(series)
    }

    async fn market_cap(&self, symbol: &Symbol) -> Result<Option<Decimal>, MarketDataError> {
        let text = self
            .request(&[("function", "OVERVIEW"), ("symbol", symbol.as_str())])
            .await?;
        Self::parse_market_cap(symbol, &text)
    }
}
