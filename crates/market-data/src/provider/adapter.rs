//! Closed set of production quote sources.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::errors::MarketDataError;
use crate::models::{Period, Series, Symbol};

use super::alpha_vantage::AlphaVantageProvider;
use super::finnhub::FinnhubProvider;
use super::yahoo::YahooProvider;
use super::{QuoteSource, RateLimit};

/// One of the supported upstream sources, dispatched statically.
///
/// Adding a source means adding a variant here and an entry in the
/// configured priority list.
pub enum SourceAdapter {
    Yahoo(YahooProvider),
    AlphaVantage(AlphaVantageProvider),
    Finnhub(FinnhubProvider),
}

impl SourceAdapter {
    fn inner(&self) -> &dyn QuoteSource {
        match self {
            Self::Yahoo(p) => p,
            Self::AlphaVantage(p) => p,
            Self::Finnhub(p) => p,
        }
    }
}

#[async_trait]
impl QuoteSource for SourceAdapter {
    fn id(&self) -> &'static str {
        self.inner().id()
    }

    fn priority(&self) -> u8 {
        self.inner().priority()
    }

    fn rate_limit(&self) -> RateLimit {
        self.inner().rate_limit()
    }

    async fn fetch(&self, symbol: &Symbol, period: Period) -> Result<Series, MarketDataError> {
        match self {
            Self::Yahoo(p) => p.fetch(symbol, period).await,
            Self::AlphaVantage(p) => p.fetch(symbol, period).await,
            Self::Finnhub(p) => p.fetch(symbol, period).await,
        }
    }

    async fn market_cap(&self, symbol: &Symbol) -> Result<Option<Decimal>, MarketDataError> {
        match self {
            Self::Yahoo(p) => p.market_cap(symbol).await,
            Self::AlphaVantage(p) => p.market_cap(symbol).await,
            Self::Finnhub(p) => p.market_cap(symbol).await,
        }
    }
}

impl From<YahooProvider> for SourceAdapter {
    fn from(p: YahooProvider) -> Self {
        Self::Yahoo(p)
    }
}

impl From<AlphaVantageProvider> for SourceAdapter {
    fn from(p: AlphaVantageProvider) -> Self {
        Self::AlphaVantage(p)
    }
}

impl From<FinnhubProvider> for SourceAdapter {
    fn from(p: FinnhubProvider) -> Self {
        Self::Finnhub(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_adapter_delegates_identity() {
        let adapter: SourceAdapter =
            FinnhubProvider::new("key".to_string(), Duration::from_secs(1)).into();
        assert_eq!(adapter.id(), "FINNHUB");
        assert_eq!(adapter.priority(), 3);

        let adapter: SourceAdapter =
            AlphaVantageProvider::new("key".to_string(), Duration::from_secs(1)).into();
        assert_eq!(adapter.id(), "ALPHA_VANTAGE");
        assert_eq!(adapter.rate_limit().burst, 1);
    }
}
