//! Series validation.
//!
//! Validates price series from sources before they reach the cache:
//! - Non-empty, strictly increasing timestamps
//! - OHLC invariants (high >= low, open/close between high/low)
//! - Non-negative values
//! - Reasonable value ranges
//! - Staleness of the newest bar
//!
//! The validator rejects rather than repairs: a series with a single bad bar
//! is refused so the registry can try the next source.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rust_decimal::Decimal;

use crate::errors::MarketDataError;
use crate::models::{Period, PricePoint, Series, Symbol};

/// Number of hard issues quoted in the rejection message.
const MAX_REPORTED_ISSUES: usize = 5;

/// Validation severity levels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationSeverity {
    /// Hard failure - reject series, try next source.
    Hard,
    /// Soft warning - accept series but log warning.
    Soft,
}

/// Validation result details.
#[derive(Clone, Debug)]
pub struct ValidationIssue {
    /// Severity of the issue.
    pub severity: ValidationSeverity,
    /// Description of the issue.
    pub message: String,
}

impl ValidationIssue {
    fn hard(message: String) -> Self {
        Self {
            severity: ValidationSeverity::Hard,
            message,
        }
    }

    fn soft(message: String) -> Self {
        Self {
            severity: ValidationSeverity::Soft,
            message,
        }
    }
}

/// Series validator configuration.
#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// Maximum allowed price value (for sanity check).
    pub max_price: Option<Decimal>,
    /// Whether to warn on zero volume.
    pub warn_on_zero_volume: bool,
    /// Staleness threshold for intraday series. Coarser periods use their
    /// granularity default.
    pub intraday_stale_after: Duration,
    /// Reject stale intraday series instead of flagging them.
    pub reject_stale_intraday: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_price: Some(Decimal::from(1_000_000_000i64)), // 1 billion as sanity check
            warn_on_zero_volume: true,
            intraday_stale_after: Period::Intraday.granularity().default_stale_after(),
            reject_stale_intraday: true,
        }
    }
}

/// A series that passed validation.
#[derive(Clone, Debug)]
pub struct Validated {
    pub series: Series,
    /// Newest bar is older than the period's staleness threshold.
    pub stale: bool,
}

/// Price series validator.
///
/// Validates series data to ensure quality and consistency.
/// Configuration allows for different validation strictness levels.
#[derive(Clone, Debug, Default)]
pub struct SeriesValidator {
    config: ValidatorConfig,
}

impl SeriesValidator {
    /// Create a new validator with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator with custom configuration.
    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Age of the newest bar beyond which a series for `period` is stale.
    pub fn stale_threshold(&self, period: Period) -> Duration {
        if period.is_intraday() {
            self.config.intraday_stale_after
        } else {
            period.granularity().default_stale_after()
        }
    }

    fn rejects_stale(&self, period: Period) -> bool {
        period.is_intraday() && self.config.reject_stale_intraday
    }

    /// Validate a raw series from a source.
    ///
    /// Returns the series with its staleness flag, or `InvalidData` listing
    /// the first few hard failures. Warnings are logged but do not cause
    /// rejection.
    pub fn validate(
        &self,
        symbol: &Symbol,
        period: Period,
        raw: Series,
        now: DateTime<Utc>,
    ) -> Result<Validated, MarketDataError> {
        let mut issues: Vec<ValidationIssue> = Vec::new();

        if raw.is_empty() {
            return Err(MarketDataError::InvalidData {
                message: format!("Empty series for {}", symbol),
            });
        }

        self.validate_ordering(raw.points(), &mut issues);
        for point in raw.points() {
            self.validate_point(point, &mut issues);
        }

        let hard: Vec<&str> = issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Hard)
            .map(|i| i.message.as_str())
            .collect();

        if !hard.is_empty() {
            let mut message = hard
                .iter()
                .take(MAX_REPORTED_ISSUES)
                .copied()
                .collect::<Vec<_>>()
                .join("; ");
            if hard.len() > MAX_REPORTED_ISSUES {
                message.push_str(&format!(" (+{} more)", hard.len() - MAX_REPORTED_ISSUES));
            }
            return Err(MarketDataError::InvalidData { message });
        }

        let soft = issues.len();
        if soft > 0 {
            // One line per series; intraday feeds routinely carry empty bars
            warn!(
                "Series validation for {} {}: {} warning(s), first: {}",
                symbol, period, soft, issues[0].message
            );
        }

        let stale = match raw.last() {
            Some(last) => {
                let age = (now - last.timestamp).to_std().unwrap_or(Duration::ZERO);
                age > self.stale_threshold(period)
            }
            None => false,
        };

        if stale {
            if self.rejects_stale(period) {
                return Err(MarketDataError::InvalidData {
                    message: format!(
                        "Stale {} series for {}: newest bar older than {:?}",
                        period,
                        symbol,
                        self.stale_threshold(period)
                    ),
                });
            }
            debug!("Series for {} {} is stale, flagging", symbol, period);
        }

        Ok(Validated { series: raw, stale })
    }

    /// Timestamps must be strictly increasing.
    fn validate_ordering(&self, points: &[PricePoint], issues: &mut Vec<ValidationIssue>) {
        for pair in points.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                issues.push(ValidationIssue::hard(format!(
                    "Timestamps not strictly increasing at {}",
                    pair[1].timestamp
                )));
            }
        }
    }

    /// Per-bar OHLCV invariants.
    ///
    /// - Prices and volume are non-negative
    /// - High must be >= Low
    /// - Open and Close must be between Low and High
    fn validate_point(&self, point: &PricePoint, issues: &mut Vec<ValidationIssue>) {
        let at = point.timestamp;

        for (name, value) in [
            ("open", point.open),
            ("high", point.high),
            ("low", point.low),
            ("close", point.close),
        ] {
            if value < Decimal::ZERO {
                issues.push(ValidationIssue::hard(format!(
                    "Negative {} price {} at {}",
                    name, value, at
                )));
            }
        }

        if point.high < point.low {
            issues.push(ValidationIssue::hard(format!(
                "High ({}) is less than Low ({}) at {}",
                point.high, point.low, at
            )));
        } else {
            if point.open < point.low || point.open > point.high {
                issues.push(ValidationIssue::hard(format!(
                    "Open ({}) is outside High/Low range ({}-{}) at {}",
                    point.open, point.low, point.high, at
                )));
            }
            if point.close < point.low || point.close > point.high {
                issues.push(ValidationIssue::hard(format!(
                    "Close ({}) is outside High/Low range ({}-{}) at {}",
                    point.close, point.low, point.high, at
                )));
            }
        }

        if let Some(max_price) = self.config.max_price {
            if point.high > max_price {
                issues.push(ValidationIssue::hard(format!(
                    "High price ({}) exceeds max threshold ({}) at {}",
                    point.high, max_price, at
                )));
            }
        }

        if point.volume < Decimal::ZERO {
            issues.push(ValidationIssue::hard(format!(
                "Negative volume {} at {}",
                point.volume, at
            )));
        } else if self.config.warn_on_zero_volume && point.volume.is_zero() {
            issues.push(ValidationIssue::soft(format!("Zero volume at {}", at)));
        }
    }
}
