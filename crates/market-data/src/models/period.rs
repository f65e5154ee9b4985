use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;

/// Bar size of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Granularity {
    Minutes5,
    Hourly,
    Daily,
    Weekly,
}

impl Granularity {
    /// Default age of the newest bar after which a series is flagged stale.
    ///
    /// Daily and coarser thresholds leave room for weekends and exchange
    /// holidays.
    pub const fn default_stale_after(self) -> Duration {
        match self {
            Self::Minutes5 => Duration::from_secs(60 * 60),
            Self::Hourly => Duration::from_secs(4 * 24 * 60 * 60),
            Self::Daily => Duration::from_secs(5 * 24 * 60 * 60),
            Self::Weekly => Duration::from_secs(14 * 24 * 60 * 60),
        }
    }
}

/// Lookback window requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1d")]
    Intraday,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "5y")]
    FiveYears,
}

impl Period {
    pub const ALL: [Period; 7] = [
        Period::Intraday,
        Period::FiveDays,
        Period::OneMonth,
        Period::ThreeMonths,
        Period::SixMonths,
        Period::OneYear,
        Period::FiveYears,
    ];

    /// Provider-style period code (`1d`, `5d`, `1mo`, ...).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intraday => "1d",
            Self::FiveDays => "5d",
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
            Self::SixMonths => "6mo",
            Self::OneYear => "1y",
            Self::FiveYears => "5y",
        }
    }

    pub const fn granularity(self) -> Granularity {
        match self {
            Self::Intraday => Granularity::Minutes5,
            Self::FiveDays => Granularity::Hourly,
            Self::OneMonth | Self::ThreeMonths | Self::SixMonths | Self::OneYear => {
                Granularity::Daily
            }
            Self::FiveYears => Granularity::Weekly,
        }
    }

    /// Calendar span covered by the period.
    pub fn lookback(self) -> chrono::Duration {
        match self {
            Self::Intraday => chrono::Duration::days(1),
            Self::FiveDays => chrono::Duration::days(5),
            Self::OneMonth => chrono::Duration::days(31),
            Self::ThreeMonths => chrono::Duration::days(92),
            Self::SixMonths => chrono::Duration::days(183),
            Self::OneYear => chrono::Duration::days(366),
            Self::FiveYears => chrono::Duration::days(5 * 366),
        }
    }

    pub const fn is_intraday(self) -> bool {
        matches!(self, Self::Intraday)
    }

    /// One year of history or more.
    pub const fn is_long_history(self) -> bool {
        matches!(self, Self::OneYear | Self::FiveYears)
    }

    /// Yahoo chart API `interval` parameter.
    pub const fn yahoo_interval(self) -> &'static str {
        match self.granularity() {
            Granularity::Minutes5 => "5m",
            Granularity::Hourly => "1h",
            Granularity::Daily => "1d",
            Granularity::Weekly => "1wk",
        }
    }

    /// Yahoo chart API `range` parameter. Same codes as [`Period::as_str`].
    pub const fn yahoo_range(self) -> &'static str {
        self.as_str()
    }
}

impl FromStr for Period {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                MarketDataError::Config(format!(
                    "unknown period '{}', expected one of 1d, 5d, 1mo, 3mo, 6mo, 1y, 5y",
                    s
                ))
            })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
