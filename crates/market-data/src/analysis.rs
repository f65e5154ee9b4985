//! Per-symbol and portfolio analysis on top of the registry.
//!
//! This is the surface an API layer calls: it fetches through the
//! registry (and therefore the cache), computes indicators and signals,
//! and shapes serializable results.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::errors::MarketDataError;
use crate::indicators::IndicatorSet;
use crate::models::{Period, QuoteResult, Series, Symbol};
use crate::provider::{QuoteSource, SourceAdapter};
use crate::registry::ProviderRegistry;
use crate::signals::{generate_signals, overall_bias, Signal, SignalKind};

/// Headline numbers for the newest bar of a series.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSummary {
    pub current_price: Decimal,
    pub previous_close: Option<Decimal>,
    pub daily_change: Option<Decimal>,
    pub daily_change_pct: Option<f64>,
    pub volume: Decimal,
    /// First close to last close over the whole period
    pub period_return_pct: Option<f64>,
    /// Filled only when the service looks it up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<Decimal>,
}

impl PriceSummary {
    pub fn from_series(series: &Series) -> Option<Self> {
        let last = series.last()?;
        let change = series.latest_change();
        let previous_close = change.map(|(abs, _)| last.close - abs);

        Some(Self {
            current_price: last.close,
            previous_close,
            daily_change: change.map(|(abs, _)| abs),
            daily_change_pct: change.map(|(_, pct)| pct),
            volume: last.volume,
            period_return_pct: series.period_return(),
            market_cap: None,
        })
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub symbol: Symbol,
    pub period: Period,
    pub quote: Arc<QuoteResult>,
    pub summary: PriceSummary,
    pub indicators: IndicatorSet,
    pub signals: Vec<Signal>,
    pub bias: SignalKind,
}

/// A symbol that could not be analysed, and why.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFailure {
    /// The symbol as the caller wrote it
    pub input: String,
    pub code: &'static str,
    pub message: String,
}

impl SymbolFailure {
    fn new(input: impl Into<String>, error: &MarketDataError) -> Self {
        Self {
            input: input.into(),
            code: error.code(),
            message: error.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Performer {
    pub symbol: Symbol,
    pub return_pct: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioAnalysis {
    pub period: Period,
    pub results: Vec<Analysis>,
    pub failures: Vec<SymbolFailure>,
    /// Sum of current prices, one unit of each symbol
    pub total_value: Decimal,
    pub avg_return: f64,
    /// Population standard deviation of the per-symbol period returns
    pub volatility: f64,
    pub best_performer: Option<Performer>,
    pub worst_performer: Option<Performer>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mover {
    pub symbol: Symbol,
    pub price: Decimal,
    pub change: Decimal,
    pub change_pct: f64,
    pub volume: Decimal,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketMovers {
    /// Largest positive daily change first
    pub gainers: Vec<Mover>,
    /// Largest negative daily change first
    pub losers: Vec<Mover>,
    pub failures: Vec<SymbolFailure>,
}

/// Symbols ranked by the volume of their newest bar.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingSymbols {
    /// Highest volume first
    pub most_active: Vec<Mover>,
    pub failures: Vec<SymbolFailure>,
    pub as_of: DateTime<Utc>,
}

/// One cycle of a periodic refresh.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBatch {
    /// Starts at 1
    pub cycle: u64,
    pub refreshed_at: DateTime<Utc>,
    pub quotes: Vec<Arc<QuoteResult>>,
    pub failures: Vec<SymbolFailure>,
    pub symbols_updated: usize,
    pub total_symbols: usize,
}

/// Receiving end of [`AnalysisService::spawn_refresh`]. Dropping it stops
/// the refresh task.
pub struct RefreshFeed {
    batches: mpsc::Receiver<RefreshBatch>,
    task: JoinHandle<()>,
}

impl RefreshFeed {
    /// Wait for the next batch. `None` once the task has stopped.
    pub async fn next(&mut self) -> Option<RefreshBatch> {
        self.batches.recv().await
    }
}

impl Drop for RefreshFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct AnalysisService<S = SourceAdapter> {
    registry: Arc<ProviderRegistry<S>>,
    with_market_cap: bool,
}

impl<S> Clone for AnalysisService<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            with_market_cap: self.with_market_cap,
        }
    }
}

impl<S> AnalysisService<S>
where
    S: QuoteSource + 'static,
{
    pub fn new(registry: Arc<ProviderRegistry<S>>) -> Self {
        Self {
            registry,
            with_market_cap: false,
        }
    }

    /// Also look up market capitalization in [`get_analysis`](Self::get_analysis).
    /// Costs one extra upstream call per symbol.
    pub fn with_market_cap(mut self, enabled: bool) -> Self {
        self.with_market_cap = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry<S>> {
        &self.registry
    }

    /// Series, indicators and signals for one symbol.
    pub async fn get_analysis(
        &self,
        symbol: &Symbol,
        period: Period,
    ) -> Result<Analysis, MarketDataError> {
        let quote = self.registry.get_series(symbol, period).await?;
        let mut summary = PriceSummary::from_series(&quote.series).ok_or_else(|| {
            MarketDataError::Internal(format!("empty series returned for {}", symbol))
        })?;
        if self.with_market_cap {
            summary.market_cap = self.registry.market_cap(symbol).await;
        }

        let indicators = IndicatorSet::compute(&quote.series);
        let signals = generate_signals(&indicators);
        let bias = overall_bias(&signals);
        debug!(
            "Analysis for {} {}: {} signal(s), bias {}",
            symbol,
            period,
            signals.len(),
            bias
        );

        Ok(Analysis {
            symbol: symbol.clone(),
            period,
            quote,
            summary,
            indicators,
            signals,
            bias,
        })
    }

    /// Analyse several symbols concurrently.
    ///
    /// Symbols that fail to parse or fetch are listed in `failures`. Fails
    /// with `NoValidSymbols` only when nothing could be analysed; the error
    /// then carries the same failure list.
    pub async fn get_portfolio_analysis<I: AsRef<str>>(
        &self,
        symbols: &[I],
        period: Period,
    ) -> Result<PortfolioAnalysis, MarketDataError> {
        let (parsed, mut failures) = parse_symbols(symbols);

        let outcomes = join_all(parsed.iter().map(|(input, symbol)| async move {
            (input, self.get_analysis(symbol, period).await)
        }))
        .await;

        let mut results = Vec::with_capacity(outcomes.len());
        for (input, outcome) in outcomes {
            match outcome {
                Ok(analysis) => results.push(analysis),
                Err(e) => {
                    warn!("Portfolio analysis skipping {}: {}", input, e);
                    failures.push(SymbolFailure::new(input.as_str(), &e));
                }
            }
        }

        if results.is_empty() {
            return Err(MarketDataError::NoValidSymbols { failures });
        }

        let returns: Vec<(&Symbol, f64)> = results
            .iter()
            .filter_map(|a| a.summary.period_return_pct.map(|r| (&a.symbol, r)))
            .collect();
        let values: Vec<f64> = returns.iter().map(|(_, r)| *r).collect();

        let performer = |pick: Option<&(&Symbol, f64)>| {
            pick.map(|(symbol, r)| Performer {
                symbol: (*symbol).clone(),
                return_pct: *r,
            })
        };
        let best_performer = performer(returns.iter().max_by(|a, b| a.1.total_cmp(&b.1)));
        let worst_performer = performer(returns.iter().min_by(|a, b| a.1.total_cmp(&b.1)));

        Ok(PortfolioAnalysis {
            period,
            total_value: results.iter().map(|a| a.summary.current_price).sum(),
            avg_return: mean(&values),
            volatility: population_std(&values),
            best_performer,
            worst_performer,
            results,
            failures,
        })
    }

    /// Top `limit` gainers and losers by latest daily change.
    pub async fn market_movers<I: AsRef<str>>(
        &self,
        symbols: &[I],
        period: Period,
        limit: usize,
    ) -> MarketMovers {
        let (movers, failures) = self.collect_movers(symbols, period, "Market movers").await;

        let mut gainers: Vec<Mover> = movers
            .iter()
            .filter(|m| m.change_pct > 0.0)
            .cloned()
            .collect();
        gainers.sort_by(|a, b| b.change_pct.total_cmp(&a.change_pct));
        gainers.truncate(limit);

        let mut losers: Vec<Mover> = movers.into_iter().filter(|m| m.change_pct < 0.0).collect();
        losers.sort_by(|a, b| a.change_pct.total_cmp(&b.change_pct));
        losers.truncate(limit);

        MarketMovers {
            gainers,
            losers,
            failures,
        }
    }

    /// The `limit` most active symbols by latest volume.
    pub async fn trending<I: AsRef<str>>(
        &self,
        symbols: &[I],
        period: Period,
        limit: usize,
    ) -> TrendingSymbols {
        let (mut movers, failures) = self.collect_movers(symbols, period, "Trending").await;
        // Stable, so equal volumes keep request order
        movers.sort_by(|a, b| b.volume.cmp(&a.volume));
        movers.truncate(limit);

        TrendingSymbols {
            most_active: movers,
            failures,
            as_of: Utc::now(),
        }
    }

    /// Latest bar and daily change per symbol. Series with a single bar
    /// have no change and are left out.
    async fn collect_movers<I: AsRef<str>>(
        &self,
        symbols: &[I],
        period: Period,
        context: &str,
    ) -> (Vec<Mover>, Vec<SymbolFailure>) {
        let (parsed, mut failures) = parse_symbols(symbols);

        let outcomes = join_all(parsed.iter().map(|(input, symbol)| async move {
            (input, symbol, self.registry.get_series(symbol, period).await)
        }))
        .await;

        let mut movers = Vec::with_capacity(outcomes.len());
        for (input, symbol, outcome) in outcomes {
            let quote = match outcome {
                Ok(quote) => quote,
                Err(e) => {
                    warn!("{} skipping {}: {}", context, input, e);
                    failures.push(SymbolFailure::new(input.as_str(), &e));
                    continue;
                }
            };
            if let (Some(last), Some((change, change_pct))) =
                (quote.series.last(), quote.series.latest_change())
            {
                movers.push(Mover {
                    symbol: symbol.clone(),
                    price: last.close,
                    change,
                    change_pct,
                    volume: last.volume,
                });
            }
        }
        (movers, failures)
    }

    /// Fetch every symbol once through the registry. A failing symbol is
    /// listed in `failures` and does not affect the others.
    pub async fn refresh_once<I: AsRef<str>>(
        &self,
        symbols: &[I],
        period: Period,
        cycle: u64,
    ) -> RefreshBatch {
        let (parsed, mut failures) = parse_symbols(symbols);

        let outcomes = join_all(parsed.iter().map(|(input, symbol)| async move {
            (input, self.registry.get_series(symbol, period).await)
        }))
        .await;

        let mut quotes = Vec::with_capacity(outcomes.len());
        for (input, outcome) in outcomes {
            match outcome {
                Ok(quote) => quotes.push(quote),
                Err(e) => {
                    warn!("Refresh cycle {} skipping {}: {}", cycle, input, e);
                    failures.push(SymbolFailure::new(input.as_str(), &e));
                }
            }
        }

        RefreshBatch {
            cycle,
            refreshed_at: Utc::now(),
            symbols_updated: quotes.len(),
            total_symbols: symbols.len(),
            quotes,
            failures,
        }
    }

    /// Refresh `symbols` every `every`, starting immediately, and deliver
    /// each batch on the returned feed.
    ///
    /// Fetches go through the cache, so a batch is never older than the
    /// period's TTL. The task stops when the feed is dropped.
    pub fn spawn_refresh(
        &self,
        symbols: Vec<String>,
        period: Period,
        every: Duration,
    ) -> RefreshFeed {
        let (tx, rx) = mpsc::channel(1);
        let service = self.clone();

        let task = tokio::spawn(async move {
            info!(
                "Refreshing {} symbol(s) for {} every {:?}",
                symbols.len(),
                period,
                every
            );
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut cycle = 0u64;
            loop {
                ticker.tick().await;
                cycle += 1;
                let batch = service.refresh_once(&symbols, period, cycle).await;
                debug!(
                    "Refresh cycle {}: {}/{} symbols updated",
                    cycle, batch.symbols_updated, batch.total_symbols
                );
                if tx.send(batch).await.is_err() {
                    debug!("Refresh feed dropped, stopping after cycle {}", cycle);
                    break;
                }
            }
        });

        RefreshFeed { batches: rx, task }
    }
}

fn parse_symbols<I: AsRef<str>>(inputs: &[I]) -> (Vec<(String, Symbol)>, Vec<SymbolFailure>) {
    let mut parsed = Vec::with_capacity(inputs.len());
    let mut failures = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        match Symbol::parse(input) {
            Ok(symbol) => parsed.push((input.to_string(), symbol)),
            Err(e) => {
                warn!("Rejecting symbol '{}': {}", input, e);
                failures.push(SymbolFailure::new(input, &e));
            }
        }
    }
    (parsed, failures)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PricePoint;
    use crate::provider::RateLimit;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    /// Serves fixed daily closes per symbol, with volume five times the
    /// close; anything else is NotFound.
    struct TableSource {
        closes: HashMap<&'static str, Vec<Decimal>>,
    }

    #[async_trait]
    impl QuoteSource for TableSource {
        fn id(&self) -> &'static str {
            "TABLE"
        }

        fn rate_limit(&self) -> RateLimit {
            RateLimit {
                requests_per_minute: 6000,
                burst: 100,
            }
        }

        async fn fetch(&self, symbol: &Symbol, _period: Period) -> Result<Series, MarketDataError> {
            let closes = self.closes.get(symbol.as_str()).ok_or_else(|| {
                MarketDataError::NotFound {
                    provider: "TABLE".to_string(),
                    symbol: symbol.to_string(),
                }
            })?;
            let now = Utc::now();
            let n = closes.len() as i64;
            let points = closes
                .iter()
                .zip(0..)
                .map(|(close, i)| {
                    PricePoint::ohlcv(
                        now - chrono::Duration::days(n - 1 - i),
                        *close,
                        *close,
                        *close,
                        *close,
                        *close * dec!(5),
                    )
                })
                .collect();
            Ok(Series::new(points))
        }

        async fn market_cap(&self, symbol: &Symbol) -> Result<Option<Decimal>, MarketDataError> {
            Ok(self
                .closes
                .get(symbol.as_str())
                .and_then(|closes| closes.last())
                .map(|close| *close * dec!(1000)))
        }
    }

    fn service() -> AnalysisService<TableSource> {
        let closes = HashMap::from([
            ("UP", vec![dec!(100), dec!(105), dec!(110)]),
            ("DOWN", vec![dec!(100), dec!(95), dec!(90)]),
            ("FLAT", vec![dec!(50), dec!(50), dec!(50)]),
        ]);
        AnalysisService::new(Arc::new(ProviderRegistry::new(vec![TableSource { closes }])))
    }

    #[test]
    fn test_price_summary() {
        let now = Utc::now();
        let series = Series::new(vec![
            PricePoint::ohlcv(now, dec!(1), dec!(1), dec!(1), dec!(100), dec!(10)),
            PricePoint::ohlcv(now, dec!(1), dec!(1), dec!(1), dec!(102), dec!(20)),
        ]);
        let summary = PriceSummary::from_series(&series).unwrap();
        assert_eq!(summary.current_price, dec!(102));
        assert_eq!(summary.previous_close, Some(dec!(100)));
        assert_eq!(summary.daily_change, Some(dec!(2)));
        assert_eq!(summary.volume, dec!(20));
        assert!((summary.period_return_pct.unwrap() - 2.0).abs() < 1e-9);

        assert!(summary.market_cap.is_none());

        assert!(PriceSummary::from_series(&Series::default()).is_none());
    }

    #[tokio::test]
    async fn test_market_cap_only_when_enabled() {
        let up = Symbol::parse("UP").unwrap();

        let plain = service().get_analysis(&up, Period::OneMonth).await.unwrap();
        assert_eq!(plain.summary.market_cap, None);
        let json = serde_json::to_value(&plain.summary).unwrap();
        assert!(json.get("marketCap").is_none());

        let enriched = service()
            .with_market_cap(true)
            .get_analysis(&up, Period::OneMonth)
            .await
            .unwrap();
        assert_eq!(enriched.summary.market_cap, Some(dec!(110000)));
    }

    #[test]
    fn test_population_std() {
        assert_eq!(population_std(&[]), 0.0);
        assert_eq!(population_std(&[5.0]), 0.0);
        assert!((population_std(&[10.0, -10.0]) - 10.0).abs() < 1e-12);
        assert!((population_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_portfolio_metrics() {
        let portfolio = service()
            .get_portfolio_analysis(&["up", "DOWN", "FLAT", "MISSING", "1BAD"], Period::OneMonth)
            .await
            .unwrap();

        assert_eq!(portfolio.results.len(), 3);
        assert_eq!(portfolio.total_value, dec!(250));
        assert!(portfolio.avg_return.abs() < 1e-9);
        // Returns are +10, -10 and 0
        let expected = (200.0f64 / 3.0).sqrt();
        assert!((portfolio.volatility - expected).abs() < 1e-9);
        assert_eq!(portfolio.best_performer.unwrap().symbol.as_str(), "UP");
        assert_eq!(portfolio.worst_performer.unwrap().symbol.as_str(), "DOWN");

        let codes: Vec<_> = portfolio
            .failures
            .iter()
            .map(|f| (f.input.as_str(), f.code))
            .collect();
        assert!(codes.contains(&("1BAD", "invalid_symbol")));
        assert!(codes.contains(&("MISSING", "data_unavailable")));
    }

    #[tokio::test]
    async fn test_portfolio_without_valid_symbols_fails() {
        let empty: [&str; 0] = [];
        let err = service()
            .get_portfolio_analysis(&empty, Period::OneMonth)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            MarketDataError::NoValidSymbols { failures } if failures.is_empty()
        ));

        let err = service()
            .get_portfolio_analysis(&["NOPE", ""], Period::OneMonth)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::NoValidSymbols { .. }));
    }

    #[tokio::test]
    async fn test_portfolio_failure_keeps_per_symbol_reasons() {
        let err = service()
            .get_portfolio_analysis(&["INVALIDX", "1BAD"], Period::OneMonth)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "no_valid_symbols");
        assert_eq!(err.to_string(), "No valid symbols found in request (2 failed)");

        let MarketDataError::NoValidSymbols { failures } = err else {
            panic!("expected NoValidSymbols, got {err:?}");
        };
        let codes: Vec<_> = failures
            .iter()
            .map(|f| (f.input.as_str(), f.code))
            .collect();
        // Parse failures are recorded before any fetch
        assert_eq!(
            codes,
            vec![("1BAD", "invalid_symbol"), ("INVALIDX", "data_unavailable")]
        );
        assert!(failures[1].message.contains("TABLE"));
    }

    #[tokio::test]
    async fn test_market_movers_sorted_and_limited() {
        let movers = service()
            .market_movers(&["FLAT", "DOWN", "UP", "GONE"], Period::FiveDays, 5)
            .await;

        assert_eq!(movers.gainers.len(), 1);
        assert_eq!(movers.gainers[0].symbol.as_str(), "UP");
        assert_eq!(movers.losers.len(), 1);
        assert_eq!(movers.losers[0].symbol.as_str(), "DOWN");
        assert_eq!(movers.failures.len(), 1);

        let limited = service().market_movers(&["UP", "DOWN"], Period::FiveDays, 0).await;
        assert!(limited.gainers.is_empty());
        assert!(limited.losers.is_empty());
    }

    #[tokio::test]
    async fn test_trending_sorted_by_volume() {
        let trending = service()
            .trending(&["FLAT", "UP", "GONE", "DOWN"], Period::FiveDays, 2)
            .await;

        let ranked: Vec<_> = trending
            .most_active
            .iter()
            .map(|m| (m.symbol.as_str(), m.volume))
            .collect();
        assert_eq!(ranked, vec![("UP", dec!(550)), ("DOWN", dec!(450))]);
        assert_eq!(trending.failures.len(), 1);
        assert_eq!(trending.failures[0].input, "GONE");

        let json = serde_json::to_value(&trending).unwrap();
        assert_eq!(json["mostActive"][0]["symbol"], "UP");
        assert!(json.get("asOf").is_some());
    }

    #[tokio::test]
    async fn test_refresh_once_isolates_failures() {
        let batch = service()
            .refresh_once(&["UP", "GONE", "1BAD", "FLAT"], Period::OneMonth, 7)
            .await;

        assert_eq!(batch.cycle, 7);
        assert_eq!(batch.total_symbols, 4);
        assert_eq!(batch.symbols_updated, 2);
        let symbols: Vec<_> = batch.quotes.iter().map(|q| q.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["UP", "FLAT"]);
        let failed: Vec<_> = batch.failures.iter().map(|f| f.input.as_str()).collect();
        assert_eq!(failed, vec!["1BAD", "GONE"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_refresh_delivers_numbered_batches() {
        let service = service();
        let mut feed = service.spawn_refresh(
            vec!["DOWN".to_string(), "MISSING".to_string()],
            Period::OneMonth,
            Duration::from_secs(60),
        );

        let first = feed.next().await.unwrap();
        let second = feed.next().await.unwrap();
        assert_eq!((first.cycle, second.cycle), (1, 2));
        for batch in [&first, &second] {
            assert_eq!(batch.symbols_updated, 1);
            assert_eq!(batch.total_symbols, 2);
            assert_eq!(batch.failures[0].input, "MISSING");
        }
        assert!(second.refreshed_at >= first.refreshed_at);
    }
}
