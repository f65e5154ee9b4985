//! Finnhub quote source.
//!
//! Fetches OHLCV candles from the Finnhub `/stock/candle` endpoint. The
//! resolution follows the period's granularity.
//!
//! Finnhub free tier is limited to 60 API calls per minute.
//! API documentation: https://finnhub.io/docs/api

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::MarketDataError;
use crate::models::{Granularity, Period, PricePoint, Series, Symbol};
use crate::provider::{QuoteSource, RateLimit};

const BASE_URL: &str = "https://finnhub.io/api/v1";
const PROVIDER_ID: &str = "FINNHUB";

/// Used when a 429 carries no Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Extra history requested for intraday so a weekend or holiday still
/// leaves the last session in range.
const INTRADAY_REQUEST_DAYS: i64 = 4;

// ============================================================================
// API Response Structures
// ============================================================================

/// Response from /stock/candle endpoint
#[derive(Debug, Deserialize)]
struct CandleResponse {
    /// Status: "ok" or "no_data"
    s: String,
    /// Close prices
    #[serde(default)]
    c: Vec<f64>,
    /// High prices
    #[serde(default)]
    h: Vec<f64>,
    /// Low prices
    #[serde(default)]
    l: Vec<f64>,
    /// Open prices
    #[serde(default)]
    o: Vec<f64>,
    /// Volume
    #[serde(default)]
    v: Vec<f64>,
    /// Timestamps (Unix)
    #[serde(default)]
    t: Vec<i64>,
}

/// Response from /stock/profile2. Unknown symbols get an empty object.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    /// In millions of the listing currency
    market_capitalization: Option<f64>,
}

/// Error body
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
}

/// Finnhub quote source.
pub struct FinnhubProvider {
    client: Client,
    api_key: String,
    timeout: Duration,
}

impl FinnhubProvider {
    /// Create a new Finnhub source with the given API key.
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

    /// Candle resolution code for a granularity.
    fn resolution(granularity: Granularity) -> &'static str {
        match granularity {
            Granularity::Minutes5 => "5",
            Granularity::Hourly => "60",
            Granularity::Daily => "D",
            Granularity::Weekly => "W",
        }
    }

    /// Make a GET request to the Finnhub API.
    async fn request(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String, MarketDataError> {
        let url = format!("{}{}", BASE_URL, endpoint);

        // API key as header keeps it out of URLs and logs
        let request = self
            .client
            .get(&url)
            .header("X-Finnhub-Token", &self.api_key)
            .query(params);

        debug!("Finnhub request: {} with {} params", endpoint, params.len());

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                MarketDataError::Timeout {
                    provider: PROVIDER_ID.to_string(),
                    timeout: self.timeout,
                }
            } else {
                MarketDataError::UpstreamError {
                    provider: PROVIDER_ID.to_string(),
                    message: format!("Request failed: {}", e),
                }
            }
        })?;

        let status = response.status();

        // Handle rate limiting
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(MarketDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
                retry_after,
            });
        }

        // Handle unauthorized (invalid API key)
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(MarketDataError::UpstreamError {
                provider: PROVIDER_ID.to_string(),
                message: "Invalid or missing API key".to_string(),
            });
        }

        // Handle forbidden (API key quota exceeded or plan restriction)
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(MarketDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
                retry_after: DEFAULT_RETRY_AFTER,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            if let Ok(error_resp) = serde_json::from_str::<ErrorResponse>(&body) {
                if let Some(error_msg) = error_resp.error {
                    return Err(MarketDataError::UpstreamError {
                        provider: PROVIDER_ID.to_string(),
                        message: error_msg,
                    });
                }
            }

            return Err(MarketDataError::UpstreamError {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {} - {}", status, body),
            });
        }

        response
            .text()
            .await
            .map_err(|e| MarketDataError::UpstreamError {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to read response: {}", e),
            })
    }

    /// Convert a candle response into a series.
    fn parse_candles(symbol: &Symbol, text: &str) -> Result<Series, MarketDataError> {
        let response: CandleResponse =
            serde_json::from_str(text).map_err(|e| MarketDataError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse candle response: {}", e),
            })?;

        if response.s == "no_data" {
            return Err(MarketDataError::NotFound {
                provider: PROVIDER_ID.to_string(),
                symbol: symbol.to_string(),
            });
        }

        if response.s != "ok" {
            return Err(MarketDataError::UpstreamError {
                provider: PROVIDER_ID.to_string(),
                message: format!("Unexpected candle status: {}", response.s),
            });
        }

        // Validate array lengths match
        let len = response.t.len();
        if response.c.len() != len
            || response.o.len() != len
            || response.h.len() != len
            || response.l.len() != len
            || response.v.len() != len
        {
            return Err(MarketDataError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: "Mismatched array lengths in candle response".to_string(),
            });
        }

        if len == 0 {
            return Err(MarketDataError::NotFound {
                provider: PROVIDER_ID.to_string(),
                symbol: symbol.to_string(),
            });
        }

        let malformed = |what: &str, i: usize| MarketDataError::MalformedResponse {
            provider: PROVIDER_ID.to_string(),
            message: format!("Invalid {} at index {}", what, i),
        };
        let decimal = |value: f64, what: &str, i: usize| {
            Decimal::try_from(value)
                .map(|d| d.round_dp(6))
                .map_err(|_| malformed(what, i))
        };

        let mut points = Vec::with_capacity(len);
        for i in 0..len {
            let timestamp: DateTime<Utc> = Utc
                .timestamp_opt(response.t[i], 0)
                .single()
                .ok_or_else(|| malformed("timestamp", i))?;

            points.push(PricePoint {
                timestamp,
                open: decimal(response.o[i], "open", i)?,
                high: decimal(response.h[i], "high", i)?,
                low: decimal(response.l[i], "low", i)?,
                close: decimal(response.c[i], "close", i)?,
                volume: decimal(response.v[i], "volume", i)?,
            });
        }

        // Sort by timestamp ascending
        points.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        Ok(Series::new(points))
    }

    /// Market capitalization from a profile response, scaled to units.
    fn parse_market_cap(text: &str) -> Result<Option<Decimal>, MarketDataError> {
        let response: ProfileResponse =
            serde_json::from_str(text).map_err(|e| MarketDataError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse profile response: {}", e),
            })?;

        Ok(response
            .market_capitalization
            .filter(|mc| mc.is_finite() && *mc > 0.0)
            .and_then(|mc| Decimal::try_from(mc).ok())
            .map(|mc| (mc * Decimal::from(1_000_000)).round_dp(0)))
    }
}

#[async_trait]
impl QuoteSource for FinnhubProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn priority(&self) -> u8 {
        3
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            requests_per_minute: 60,
            burst: 5,
        }
    }

    async fn fetch(&self, symbol: &Symbol, period: Period) -> Result<Series, MarketDataError> {
        let to = Utc::now();
        let from = if period.is_intraday() {
            to - chrono::Duration::days(INTRADAY_REQUEST_DAYS)
        } else {
            to - period.lookback()
        };
        let from_ts = from.timestamp().to_string();
        let to_ts = to.timestamp().to_string();

        let params = [
            ("symbol", symbol.as_str()),
            ("resolution", Self::resolution(period.granularity())),
            ("from", from_ts.as_str()),
            ("to", to_ts.as_str()),
        ];

        let text = self.request("/stock/candle", &params).await?;
        let series = Self::parse_candles(symbol, &text)?.trailing(period);

        if series.is_empty() {
            warn!("Finnhub returned no bars for {} inside {}", symbol, period);
        }

        debug!(
            "Finnhub: fetched {} bars for {} over {}",
            series.len(),
            symbol,
            period
        );

        Ok(series)
    }

    async fn market_cap(&self, symbol: &Symbol) -> Result<Option<Decimal>, MarketDataError> {
        debug!("Fetching market cap for {} from Finnhub", symbol);
        let text = self
            .request("/stock/profile2", &[("symbol", symbol.as_str())])
            .await?;
        Self::parse_market_cap(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn msft() -> Symbol {
        Symbol::parse("MSFT").unwrap()
    }

    #[test]
    fn test_provider_identity() {
        let provider = FinnhubProvider::new("test_key".to_string(), Duration::from_secs(5));
        assert_eq!(provider.id(), "FINNHUB");
        assert_eq!(provider.priority(), 3);
        assert_eq!(provider.rate_limit().requests_per_minute, 60);
    }

    #[test]
    fn test_resolution_mapping() {
        assert_eq!(FinnhubProvider::resolution(Granularity::Minutes5), "5");
        assert_eq!(FinnhubProvider::resolution(Granularity::Hourly), "60");
        assert_eq!(FinnhubProvider::resolution(Granularity::Daily), "D");
        assert_eq!(FinnhubProvider::resolution(Granularity::Weekly), "W");
    }

    #[test]
    fn test_candle_response_parsing() {
        let json = r#"{
            "s": "ok",
            "c": [151.0, 150.0, 152.0],
            "h": [152.0, 151.0, 153.0],
            "l": [150.0, 149.0, 151.0],
            "o": [150.5, 149.5, 151.5],
            "v": [1100000, 1000000, 1200000],
            "t": [1704153600, 1704067200, 1704240000]
        }"#;

        let series = FinnhubProvider::parse_candles(&msft(), json).unwrap();
        assert_eq!(series.len(), 3);
        // Sorted oldest first
        assert_eq!(series.first().unwrap().close, dec!(150));
        assert_eq!(series.last().unwrap().close, dec!(152));
        assert_eq!(series.last().unwrap().volume, dec!(1200000));
    }

    #[test]
    fn test_candle_response_no_data() {
        let json = r#"{"s": "no_data"}"#;
        let err = FinnhubProvider::parse_candles(&msft(), json).unwrap_err();
        assert!(matches!(err, MarketDataError::NotFound { .. }));
    }

    #[test]
    fn test_mismatched_arrays_are_malformed() {
        let json = r#"{
            "s": "ok",
            "c": [150.0, 151.0],
            "h": [151.0],
            "l": [149.0, 150.0],
            "o": [149.5, 150.5],
            "v": [1000, 1100],
            "t": [1704067200, 1704153600]
        }"#;
        let err = FinnhubProvider::parse_candles(&msft(), json).unwrap_err();
        assert!(matches!(err, MarketDataError::MalformedResponse { .. }));
    }

    #[test]
    fn test_market_cap_is_scaled_from_millions() {
        let json = r#"{"name": "Microsoft Corp", "marketCapitalization": 2800000.5, "ticker": "MSFT"}"#;
        assert_eq!(
            FinnhubProvider::parse_market_cap(json).unwrap(),
            Some(dec!(2800000500000))
        );

        // Unknown symbols come back as an empty object
        assert_eq!(FinnhubProvider::parse_market_cap("{}").unwrap(), None);
        assert!(FinnhubProvider::parse_market_cap("[").is_err());
    }

    #[test]
    fn test_garbage_body_is_malformed() {
        let err = FinnhubProvider::parse_candles(&msft(), "<html>").unwrap_err();
        assert!(matches!(err, MarketDataError::MalformedResponse { .. }));
    }
}
