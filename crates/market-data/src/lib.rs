//! Finboard market data core.
//!
//! Fetches price series from several upstream sources, validates them,
//! caches them behind single-flight fetches, and derives technical
//! indicators and trading signals.
//!
//! # Architecture
//!
//! ```text
//! AnalysisService
//!       |
//!       v
//! ProviderRegistry --> QuoteCache (hit returns immediately)
//!       |
//!       v  (miss, one fetch per key)
//! RateLimiter --> QuoteSource (Yahoo, Alpha Vantage, Finnhub)
//!       |
//!       v
//! SeriesValidator --> cache store --> IndicatorSet --> signals
//! ```
//!
//! # Core Types
//!
//! - [`Symbol`] - Validated, uppercase ticker
//! - [`Period`] - Lookback window with its bar granularity
//! - [`Series`] / [`PricePoint`] - OHLCV bars, oldest first
//! - [`QuoteResult`] - A validated series plus provenance
//! - [`IndicatorSet`] / [`Signal`] - Derived analytics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use finboard_market_data::{AnalysisService, MarketDataConfig, Period, ProviderRegistry, Symbol};
//!
//! # async fn run() -> Result<(), finboard_market_data::MarketDataError> {
//! let config = MarketDataConfig::from_env()?;
//! let registry = Arc::new(ProviderRegistry::from_config(&config)?);
//! let service = AnalysisService::new(registry);
//! let analysis = service.get_analysis(&Symbol::parse("AAPL")?, Period::OneMonth).await?;
//! println!("{:?}", analysis.signals);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod cache;
pub mod config;
pub mod errors;
pub mod indicators;
pub mod models;
pub mod provider;
pub mod registry;
pub mod signals;

// Re-export all public types from models
pub use models::{
    Granularity, Period, PricePoint, ProviderId, QuoteResult, Series, Symbol, MAX_SYMBOL_LEN,
};

pub use errors::{MarketDataError, RetryClass};

pub use config::{MarketDataConfig, SourceKind, TtlPolicy};

// Re-export provider types
pub use provider::alpha_vantage::AlphaVantageProvider;
pub use provider::finnhub::FinnhubProvider;
pub use provider::yahoo::YahooProvider;
pub use provider::{QuoteSource, RateLimit, SourceAdapter};

// Re-export registry types
pub use registry::{
    FetchDiagnostics, Permit, ProviderAttempt, ProviderRegistry, RateLimitConfig, RateLimiter,
    RegistryConfig, SeriesValidator, SkipReason, SourceProbe, Validated, ValidationSeverity,
    ValidatorConfig,
};

pub use cache::QuoteCache;

pub use analysis::{
    Analysis, AnalysisService, MarketMovers, Mover, Performer, PortfolioAnalysis, PriceSummary,
    RefreshBatch, RefreshFeed, SymbolFailure, TrendingSymbols,
};
pub use indicators::{BollingerBands, IndicatorSet, Macd};
pub use signals::{generate_signals, overall_bias, Signal, SignalKind, Strength};
