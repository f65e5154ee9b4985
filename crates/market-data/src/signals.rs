//! Rule-based trading signals derived from an [`IndicatorSet`].

use std::fmt;

use serde::Serialize;

use crate::indicators::IndicatorSet;

pub const RSI_OVERBOUGHT: f64 = 70.0;
pub const RSI_OVERSOLD: f64 = 30.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strength {
    Weak,
    Medium,
    Strong,
}

impl Strength {
    /// Vote weight in [`overall_bias`].
    pub const fn weight(self) -> i32 {
        match self {
            Self::Weak => 1,
            Self::Medium => 2,
            Self::Strong => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Signal {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub reason: String,
    pub strength: Strength,
}

impl Signal {
    fn new(kind: SignalKind, reason: &str, strength: Strength) -> Self {
        Self {
            kind,
            reason: reason.to_string(),
            strength,
        }
    }
}

/// Evaluate the signal rules in order: RSI extremes, SMA(20)/SMA(50)
/// crossover, then Bollinger breakouts. Rules whose inputs are missing
/// produce nothing.
pub fn generate_signals(indicators: &IndicatorSet) -> Vec<Signal> {
    let mut signals = Vec::new();

    if let Some(rsi) = indicators.rsi {
        if rsi > RSI_OVERBOUGHT {
            signals.push(Signal::new(SignalKind::Sell, "Overbought", Strength::Medium));
        } else if rsi < RSI_OVERSOLD {
            signals.push(Signal::new(SignalKind::Buy, "Oversold", Strength::Medium));
        }
    }

    if let (Some(short), Some(long), Some(short_prev), Some(long_prev)) = (
        indicators.sma20,
        indicators.sma50,
        indicators.sma20_prev,
        indicators.sma50_prev,
    ) {
        if short > long && short_prev <= long_prev {
            signals.push(Signal::new(
                SignalKind::Buy,
                "Bullish MA Crossover",
                Strength::Strong,
            ));
        } else if short < long && short_prev >= long_prev {
            signals.push(Signal::new(
                SignalKind::Sell,
                "Bearish MA Crossover",
                Strength::Strong,
            ));
        }
    }

    if let (Some(close), Some(bands)) = (indicators.last_close, indicators.bollinger) {
        if close > bands.upper {
            signals.push(Signal::new(
                SignalKind::Sell,
                "Upper Band Breakout",
                Strength::Weak,
            ));
        } else if close < bands.lower {
            signals.push(Signal::new(
                SignalKind::Buy,
                "Lower Band Breakout",
                Strength::Weak,
            ));
        }
    }

    signals
}

/// Strength-weighted vote over `signals`. Ties and an empty list are HOLD.
pub fn overall_bias(signals: &[Signal]) -> SignalKind {
    let score: i32 = signals
        .iter()
        .map(|s| match s.kind {
            SignalKind::Buy => s.strength.weight(),
            SignalKind::Sell => -s.strength.weight(),
            SignalKind::Hold => 0,
        })
        .sum();

    match score.cmp(&0) {
        std::cmp::Ordering::Greater => SignalKind::Buy,
        std::cmp::Ordering::Less => SignalKind::Sell,
        std::cmp::Ordering::Equal => SignalKind::Hold,
    }
}
