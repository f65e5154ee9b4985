//! Bollinger Bands.

use serde::Serialize;

use crate::errors::MarketDataError;

use super::moving_average::mean;
use super::require;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bands over the last `window` values: SMA middle, `k` sample standard
/// deviations either side.
pub fn bollinger(values: &[f64], window: usize, k: f64) -> Result<BollingerBands, MarketDataError> {
    if window < 2 {
        return Err(MarketDataError::Config(
            "Bollinger window must be at least 2".to_string(),
        ));
    }
    require("Bollinger", window, values.len())?;

    let tail = &values[values.len() - window..];
    let middle = mean(tail);
    let variance =
        tail.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / (window as f64 - 1.0);
    let width = k * variance.sqrt();

    Ok(BollingerBands {
        upper: middle + width,
        middle,
        lower: middle - width,
    })
}
