//! Moving Average Convergence Divergence.

use serde::Serialize;

use crate::errors::MarketDataError;

use super::moving_average::ema_series;
use super::{check_window, require};

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD line (fast EMA minus slow EMA), its `signal`-period EMA, and the
/// difference. The line starts where the slow EMA does, so the whole
/// computation needs `slow + signal - 1` values.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Result<Macd, MarketDataError> {
    check_window("MACD", fast)?;
    check_window("MACD", signal)?;
    if fast >= slow {
        return Err(MarketDataError::Config(format!(
            "MACD fast window {} must be shorter than slow window {}",
            fast, slow
        )));
    }
    require("MACD", slow + signal - 1, values.len())?;

    let fast_ema = ema_series(values, fast)?;
    let slow_ema = ema_series(values, slow)?;

    // fast_ema[i] lines up with values[fast - 1 + i]; skip to the slow start
    let offset = slow - fast;
    let line: Vec<f64> = slow_ema
        .iter()
        .zip(&fast_ema[offset..])
        .map(|(slow, fast)| fast - slow)
        .collect();

    let signal_series = ema_series(&line, signal)?;
    let (Some(&line_last), Some(&signal_last)) = (line.last(), signal_series.last()) else {
        return Err(MarketDataError::Internal("MACD produced no values".to_string()));
    };

    Ok(Macd {
        line: line_last,
        signal: signal_last,
        histogram: line_last - signal_last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::fixtures::{assert_close, C20, C40};

    #[test]
    fn test_macd_reference_values() {
        let m = macd(&C40, 12, 26, 9).unwrap();
        assert_close(m.line, 0.5906737827);
        assert_close(m.signal, 2.0230087129);
        assert_close(m.histogram, -1.4323349302);
    }

    #[test]
    fn test_macd_needs_34_points() {
        let err = macd(&C20, 12, 26, 9).unwrap_err();
        assert!(matches!(
            err,
            MarketDataError::InsufficientData {
                indicator: "MACD",
                required: 34,
                available: 20
            }
        ));
        assert!(macd(&C40[..33], 12, 26, 9).is_err());
        assert!(macd(&C40[..34], 12, 26, 9).is_ok());
    }

    #[test]
    fn test_macd_rejects_inverted_windows() {
        assert!(matches!(
            macd(&C40, 26, 12, 9),
            Err(MarketDataError::Config(_))
        ));
    }
}
