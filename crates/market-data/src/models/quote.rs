use chrono::{DateTime, Utc};
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::period::Period;
use super::symbol::Symbol;
use super::types::ProviderId;
use crate::registry::FetchDiagnostics;

/// One OHLCV bar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Bar open time
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl PricePoint {
    /// Create a full OHLCV bar
    pub fn ohlcv(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Ordered price bars for one symbol and period.
///
/// Adapters build a `Series` from whatever the upstream returned; ordering and
/// OHLC sanity are only guaranteed once the validator has accepted it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Series {
    points: Vec<PricePoint>,
}

impl Series {
    pub fn new(points: Vec<PricePoint>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<PricePoint> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&PricePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    /// Keep only the bars inside `period`, measured back from the newest bar.
    ///
    /// Intraday keeps the newest trading session only. Expects bars sorted
    /// oldest first.
    pub fn trailing(self, period: Period) -> Self {
        let Some(newest) = self.last().map(|p| p.timestamp) else {
            return self;
        };

        let points = if period.is_intraday() {
            let session = newest.date_naive();
            self.points
                .into_iter()
                .filter(|p| p.timestamp.date_naive() == session)
                .collect()
        } else {
            let cutoff = newest - period.lookback();
            self.points
                .into_iter()
                .filter(|p| p.timestamp > cutoff)
                .collect()
        };
        Self { points }
    }

    /// Close prices as `f64`, oldest first, for the indicator engine.
    pub fn closes(&self) -> Vec<f64> {
        self.points
            .iter()
            .filter_map(|p| p.close.to_f64())
            .collect()
    }

    /// Percent change from the first close to the last close.
    pub fn period_return(&self) -> Option<f64> {
        let first = self.first()?.close;
        let last = self.last()?.close;
        percent_change(first, last)
    }

    /// Absolute and percent change of the last close against the previous one.
    pub fn latest_change(&self) -> Option<(Decimal, f64)> {
        let n = self.points.len();
        if n < 2 {
            return None;
        }
        let previous = self.points[n - 2].close;
        let current = self.points[n - 1].close;
        Some((current - previous, percent_change(previous, current)?))
    }
}

fn percent_change(from: Decimal, to: Decimal) -> Option<f64> {
    if from.is_zero() {
        return None;
    }
    ((to - from) / from * Decimal::ONE_HUNDRED).to_f64()
}

/// A validated series together with where and when it was obtained.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResult {
    pub symbol: Symbol,
    pub period: Period,
    pub series: Series,
    /// Source that produced the series
    pub source: ProviderId,
    pub fetched_at: DateTime<Utc>,
    /// Newest bar is older than the period's staleness threshold
    pub stale: bool,
    /// Every source attempt made while producing this result
    #[serde(skip)]
    pub diagnostics: FetchDiagnostics,
}

impl QuoteResult {
    pub fn latest(&self) -> Option<&PricePoint> {
        self.series.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar(day: u32, close: Decimal) -> PricePoint {
        PricePoint::ohlcv(
            Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(),
            close,
            close,
            close,
            close,
            dec!(1000),
        )
    }

    #[test]
    fn test_closes_preserve_order() {
        let series = Series::new(vec![bar(1, dec!(10.5)), bar(2, dec!(11)), bar(3, dec!(9.25))]);
        assert_eq!(series.closes(), vec![10.5, 11.0, 9.25]);
    }

    #[test]
    fn test_period_return() {
        let series = Series::new(vec![bar(1, dec!(100)), bar(2, dec!(90)), bar(3, dec!(110))]);
        let ret = series.period_return().unwrap();
        assert!((ret - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_latest_change() {
        let series = Series::new(vec![bar(1, dec!(100)), bar(2, dec!(102))]);
        let (abs, pct) = series.latest_change().unwrap();
        assert_eq!(abs, dec!(2));
        assert!((pct - 2.0).abs() < 1e-9);

        let single = Series::new(vec![bar(1, dec!(100))]);
        assert!(single.latest_change().is_none());
    }

    #[test]
    fn test_trailing_measures_back_from_newest_bar() {
        let series = Series::new(vec![
            PricePoint::ohlcv(
                Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
                dec!(1),
                dec!(1),
                dec!(1),
                dec!(1),
                dec!(1),
            ),
            bar(1, dec!(2)),
            bar(28, dec!(3)),
        ]);
        let trimmed = series.trailing(Period::OneMonth);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed.first().unwrap().close, dec!(2));
    }

    #[test]
    fn test_zero_first_close_has_no_return() {
        let series = Series::new(vec![bar(1, dec!(0)), bar(2, dec!(5))]);
        assert!(series.period_return().is_none());
    }
}
