//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all market data operations
//! - [`RetryClass`]: Classification for determining fallback behavior

mod retry;

pub use retry::RetryClass;

use std::time::Duration;

use thiserror::Error;

use crate::analysis::SymbolFailure;
use crate::registry::FetchDiagnostics;

/// Errors that can occur during market data operations.
///
/// The type is `Clone` because a single upstream fetch may be awaited by many
/// callers at once and every one of them receives the same outcome.
///
/// Each variant is classified into a [`RetryClass`] via the [`retry_class`](Self::retry_class)
/// method, which determines how the provider registry reacts to it.
#[derive(Error, Debug, Clone)]
pub enum MarketDataError {
    /// The provider does not know the requested symbol.
    #[error("Symbol not found: {symbol} ({provider})")]
    NotFound {
        /// The provider that reported the miss
        provider: String,
        /// The symbol that was requested
        symbol: String,
    },

    /// The request to the provider did not complete within its timeout.
    #[error("Timeout: {provider} after {timeout:?}")]
    Timeout {
        /// The provider that timed out
        provider: String,
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// The provider answered, but the payload could not be parsed.
    #[error("Malformed response from {provider}: {message}")]
    MalformedResponse {
        /// The provider that sent the payload
        provider: String,
        /// What was wrong with it
        message: String,
    },

    /// A provider-specific failure (HTTP error, transport error, API error).
    #[error("Provider error: {provider} - {message}")]
    UpstreamError {
        /// The provider that returned the error
        provider: String,
        /// The error message from the provider
        message: String,
    },

    /// Either the local limiter has no budget for this provider, or the
    /// provider itself answered with a rate-limit response.
    #[error("Rate limited: {provider} (retry after {retry_after:?})")]
    RateLimited {
        /// The provider that is rate limited
        provider: String,
        /// Estimated time until a request would be accepted again
        retry_after: Duration,
    },

    /// The validator rejected the series.
    #[error("Invalid data: {message}")]
    InvalidData {
        /// Description of the validation failure
        message: String,
    },

    /// Every configured source was tried and none produced a valid series.
    #[error("All sources exhausted for {symbol}: {}", .diagnostics.summary())]
    AllSourcesExhausted {
        /// The symbol that could not be served
        symbol: String,
        /// Per-source record of what happened
        diagnostics: FetchDiagnostics,
    },

    /// The series is shorter than the window an indicator needs.
    #[error("Insufficient data for {indicator}: need {required} points, have {available}")]
    InsufficientData {
        /// Indicator name
        indicator: &'static str,
        /// Minimum number of points required
        required: usize,
        /// Number of points available
        available: usize,
    },

    /// The input could not be parsed as a ticker symbol.
    #[error("Invalid symbol '{input}': {reason}")]
    InvalidSymbol {
        /// Raw user input
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// A portfolio request produced no usable symbol at all.
    #[error("No valid symbols found in request ({} failed)", .failures.len())]
    NoValidSymbols {
        /// Why each requested symbol was dropped
        failures: Vec<SymbolFailure>,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background fetch task failed to complete (panic or runtime shutdown).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarketDataError {
    /// Returns the retry classification for this error.
    ///
    /// - [`RetryClass::NextProvider`]: fall through to the next source
    /// - [`RetryClass::FailoverWithPenalty`]: fall through and back off this source
    /// - [`RetryClass::Never`]: terminal for the request
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use finboard_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::RateLimited {
    ///     provider: "YAHOO".to_string(),
    ///     retry_after: Duration::from_secs(1),
    /// };
    /// assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty);
    ///
    /// let error = MarketDataError::NoValidSymbols { failures: Vec::new() };
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            // Another provider may cover the symbol or be healthy right now
            Self::NotFound { .. }
            | Self::Timeout { .. }
            | Self::MalformedResponse { .. }
            | Self::UpstreamError { .. }
            | Self::InvalidData { .. } => RetryClass::NextProvider,

            Self::RateLimited { .. } => RetryClass::FailoverWithPenalty,

            Self::AllSourcesExhausted { .. }
            | Self::InsufficientData { .. }
            | Self::InvalidSymbol { .. }
            | Self::NoValidSymbols { .. }
            | Self::Config(_)
            | Self::Internal(_) => RetryClass::Never,
        }
    }

    /// True when the symbol is unknown: either a direct `NotFound`, or an
    /// exhausted chain in which every source that was reached said `NotFound`.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::AllSourcesExhausted { diagnostics, .. } => {
                let errors = diagnostics.errors();
                !errors.is_empty()
                    && errors
                        .iter()
                        .all(|(_, e)| matches!(e, MarketDataError::NotFound { .. }))
            }
            _ => false,
        }
    }

    /// Short machine-readable code, used in serialized failure lists.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::UpstreamError { .. } => "upstream_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidData { .. } => "invalid_data",
            Self::AllSourcesExhausted { .. } => "data_unavailable",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::InvalidSymbol { .. } => "invalid_symbol",
            Self::NoValidSymbols { .. } => "no_valid_symbols",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_not_found_tries_next_provider() {
        let error = MarketDataError::NotFound {
            provider: "YAHOO".to_string(),
            symbol: "INVALIDX".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::NextProvider);
    }

    #[test]
    fn test_timeout_tries_next_provider() {
        let error = MarketDataError::Timeout {
            provider: "ALPHA_VANTAGE".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(error.retry_class(), RetryClass::NextProvider);
    }

    #[test]
    fn test_invalid_data_tries_next_provider() {
        let error = MarketDataError::InvalidData {
            message: "High < Low".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::NextProvider);
    }

    #[test]
    fn test_rate_limited_fails_over_with_penalty() {
        let error = MarketDataError::RateLimited {
            provider: "FINNHUB".to_string(),
            retry_after: Duration::from_secs(60),
        };
        assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty);
    }

    #[test]
    fn test_exhausted_never_retries() {
        let error = MarketDataError::AllSourcesExhausted {
            symbol: "AAPL".to_string(),
            diagnostics: FetchDiagnostics::new(),
        };
        assert_eq!(error.retry_class(), RetryClass::Never);
        assert_eq!(error.code(), "data_unavailable");
    }

    #[test]
    fn test_is_not_found_requires_every_attempt_to_miss() {
        let mut diagnostics = FetchDiagnostics::new();
        diagnostics.record_error(
            Cow::Borrowed("YAHOO"),
            MarketDataError::NotFound {
                provider: "YAHOO".to_string(),
                symbol: "INVALIDX".to_string(),
            },
        );
        let error = MarketDataError::AllSourcesExhausted {
            symbol: "INVALIDX".to_string(),
            diagnostics: diagnostics.clone(),
        };
        assert!(error.is_not_found());

        diagnostics.record_error(
            Cow::Borrowed("FINNHUB"),
            MarketDataError::Timeout {
                provider: "FINNHUB".to_string(),
                timeout: Duration::from_secs(1),
            },
        );
        let error = MarketDataError::AllSourcesExhausted {
            symbol: "INVALIDX".to_string(),
            diagnostics,
        };
        assert!(!error.is_not_found());
    }

    #[test]
    fn test_error_display() {
        let error = MarketDataError::NotFound {
            provider: "YAHOO".to_string(),
            symbol: "INVALIDX".to_string(),
        };
        assert_eq!(format!("{}", error), "Symbol not found: INVALIDX (YAHOO)");

        let error = MarketDataError::UpstreamError {
            provider: "ALPHA_VANTAGE".to_string(),
            message: "API key invalid".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Provider error: ALPHA_VANTAGE - API key invalid"
        );

        let error = MarketDataError::InsufficientData {
            indicator: "RSI",
            required: 15,
            available: 3,
        };
        assert_eq!(
            format!("{}", error),
            "Insufficient data for RSI: need 15 points, have 3"
        );
    }
}
