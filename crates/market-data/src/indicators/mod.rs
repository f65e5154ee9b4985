//! Technical indicators over close prices.
//!
//! Every indicator is a pure function of `&[f64]` closes, oldest first, and
//! fails with `InsufficientData` when the input is shorter than it needs.
//! [`IndicatorSet::compute`] runs the standard set and leaves out whatever
//! the series is too short for.

mod bollinger;
mod macd;
mod moving_average;
mod rsi;

pub use bollinger::{bollinger, BollingerBands};
pub use macd::{macd, Macd};
pub use moving_average::{ema, ema_series, sma, sma_series};
pub use rsi::rsi;

use log::debug;
use serde::Serialize;

use crate::errors::MarketDataError;
use crate::models::Series;

pub const RSI_PERIOD: usize = 14;
pub const SMA_SHORT: usize = 20;
pub const SMA_LONG: usize = 50;
pub const EMA_FAST: usize = 12;
pub const EMA_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BOLLINGER_WINDOW: usize = 20;
pub const BOLLINGER_K: f64 = 2.0;

/// Indicators for the latest point of a series. Absent fields mean the
/// series was too short.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_close: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sma20: Option<f64>,
    /// SMA(20) as of the previous point, for crossover detection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sma20_prev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sma50: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sma50_prev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema12: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema26: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bollinger: Option<BollingerBands>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macd: Option<Macd>,
}

impl IndicatorSet {
    pub fn compute(series: &Series) -> Self {
        Self::from_closes(&series.closes())
    }

    pub fn from_closes(closes: &[f64]) -> Self {
        let previous = closes.split_last().map(|(_, rest)| rest).unwrap_or_default();

        Self {
            last_close: closes.last().copied(),
            rsi: available("RSI", rsi(closes, RSI_PERIOD)),
            sma20: available("SMA20", sma(closes, SMA_SHORT)),
            sma20_prev: available("SMA20 previous", sma(previous, SMA_SHORT)),
            sma50: available("SMA50", sma(closes, SMA_LONG)),
            sma50_prev: available("SMA50 previous", sma(previous, SMA_LONG)),
            ema12: available("EMA12", ema(closes, EMA_FAST)),
            ema26: available("EMA26", ema(closes, EMA_SLOW)),
            bollinger: available(
                "Bollinger",
                bollinger(closes, BOLLINGER_WINDOW, BOLLINGER_K),
            ),
            macd: available("MACD", macd(closes, EMA_FAST, EMA_SLOW, MACD_SIGNAL)),
        }
    }
}

fn available<T>(name: &str, outcome: Result<T, MarketDataError>) -> Option<T> {
    match outcome {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Omitting {}: {}", name, e);
            None
        }
    }
}

pub(crate) fn require(
    indicator: &'static str,
    required: usize,
    available: usize,
) -> Result<(), MarketDataError> {
    if available < required {
        return Err(MarketDataError::InsufficientData {
            indicator,
            required,
            available,
        });
    }
    Ok(())
}

pub(crate) fn check_window(indicator: &'static str, window: usize) -> Result<(), MarketDataError> {
    if window == 0 {
        return Err(MarketDataError::Config(format!(
            "{} window must be positive",
            indicator
        )));
    }
    Ok(())
}
