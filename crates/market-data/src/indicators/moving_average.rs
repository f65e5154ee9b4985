//! Simple and exponential moving averages.

use crate::errors::MarketDataError;

use super::{check_window, require};

/// Mean of the last `window` values.
pub fn sma(values: &[f64], window: usize) -> Result<f64, MarketDataError> {
    check_window("SMA", window)?;
    require("SMA", window, values.len())?;
    Ok(mean(&values[values.len() - window..]))
}

/// Rolling SMA, one value per full window. The first value covers
/// `values[..window]`.
pub fn sma_series(values: &[f64], window: usize) -> Result<Vec<f64>, MarketDataError> {
    check_window("SMA", window)?;
    require("SMA", window, values.len())?;
    Ok(values.windows(window).map(mean).collect())
}

/// Latest EMA value. See [`ema_series`].
pub fn ema(values: &[f64], window: usize) -> Result<f64, MarketDataError> {
    let series = ema_series(values, window)?;
    series
        .last()
        .copied()
        .ok_or_else(|| MarketDataError::Internal("EMA produced no values".to_string()))
}

/// EMA seeded with the SMA of the first `window` values, then
/// `ema = alpha * x + (1 - alpha) * prev` with `alpha = 2 / (window + 1)`.
///
/// Returns `values.len() - window + 1` values; element `i` lines up with
/// `values[window - 1 + i]`.
pub fn ema_series(values: &[f64], window: usize) -> Result<Vec<f64>, MarketDataError> {
    check_window("EMA", window)?;
    require("EMA", window, values.len())?;

    let alpha = 2.0 / (window as f64 + 1.0);
    let mut current = mean(&values[..window]);
    let mut out = Vec::with_capacity(values.len() - window + 1);
    out.push(current);
    for value in &values[window..] {
        current = alpha * value + (1.0 - alpha) * current;
        out.push(current);
    }
    Ok(out)
}

pub(super) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
