//! Relative Strength Index with Wilder smoothing.

use crate::errors::MarketDataError;

use super::{check_window, require};

/// RSI over `period` price changes.
///
/// The first average gain and loss are simple means of the first `period`
/// changes; later changes are folded in with `avg = (prev * (n - 1) + cur) / n`.
/// Needs `period + 1` values. A series with no losses reads 100.
pub fn rsi(values: &[f64], period: usize) -> Result<f64, MarketDataError> {
    check_window("RSI", period)?;
    require("RSI", period + 1, values.len())?;

    let n = period as f64;
    let mut changes = values.windows(2).map(|w| w[1] - w[0]);

    let (mut avg_gain, mut avg_loss) = changes
        .by_ref()
        .take(period)
        .fold((0.0, 0.0), |(gain, loss), change| {
            (gain + change.max(0.0), loss + (-change).max(0.0))
        });
    avg_gain /= n;
    avg_loss /= n;

    for change in changes {
        avg_gain = (avg_gain * (n - 1.0) + change.max(0.0)) / n;
        avg_loss = (avg_loss * (n - 1.0) + (-change).max(0.0)) / n;
    }

    if avg_loss == 0.0 {
        return Ok(100.0);
    }
    let rs = avg_gain / avg_loss;
    Ok((100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0))
}
