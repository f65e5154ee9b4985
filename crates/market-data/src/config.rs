//! Runtime configuration.
//!
//! Everything tunable lives here: source priority, API keys, timeouts, cache
//! TTLs, rate limits and staleness thresholds. [`MarketDataConfig::from_env`]
//! reads `FINBOARD_*` variables; callers that use a `.env` file load it first.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use log::warn;
use serde::Deserialize;

use crate::errors::MarketDataError;
use crate::models::Period;
use crate::provider::alpha_vantage::AlphaVantageProvider;
use crate::provider::finnhub::FinnhubProvider;
use crate::provider::yahoo::YahooProvider;
use crate::provider::SourceAdapter;
use crate::registry::{RateLimitConfig, ValidatorConfig};

/// Upstream sources this crate knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Yahoo,
    AlphaVantage,
    Finnhub,
}

impl SourceKind {
    /// Provider id, also the infix of the per-source env variables.
    pub const fn id(self) -> &'static str {
        match self {
            Self::Yahoo => "YAHOO",
            Self::AlphaVantage => "ALPHA_VANTAGE",
            Self::Finnhub => "FINNHUB",
        }
    }
}

impl FromStr for SourceKind {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "yahoo" => Ok(Self::Yahoo),
            "alpha_vantage" | "alphavantage" => Ok(Self::AlphaVantage),
            "finnhub" => Ok(Self::Finnhub),
            other => Err(MarketDataError::Config(format!("unknown source '{}'", other))),
        }
    }
}

/// Cache lifetime per period class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub default: Duration,
    pub intraday: Duration,
    /// One year of history or more
    pub long_history: Duration,
}

impl TtlPolicy {
    pub fn ttl_for(&self, period: Period) -> Duration {
        if period.is_intraday() {
            self.intraday
        } else if period.is_long_history() {
            self.long_history
        } else {
            self.default
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(5 * 60),
            intraday: Duration::from_secs(60),
            long_history: Duration::from_secs(30 * 60),
        }
    }
}

/// Per-source rate limit override. Unset fields keep the source default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RateLimitOverride {
    pub requests_per_minute: Option<u32>,
    pub burst: Option<u32>,
}

/// Market data configuration.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    /// Fallback order, most preferred first
    pub sources: Vec<SourceKind>,
    pub alpha_vantage_api_key: Option<String>,
    pub finnhub_api_key: Option<String>,
    pub fetch_timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub intraday_ttl_secs: u64,
    pub history_ttl_secs: u64,
    pub intraday_stale_secs: u64,
    pub reject_stale_intraday: bool,
    pub rate_limits: HashMap<SourceKind, RateLimitOverride>,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        let ttl = TtlPolicy::default();
        Self {
            sources: vec![
                SourceKind::Yahoo,
                SourceKind::AlphaVantage,
                SourceKind::Finnhub,
            ],
            alpha_vantage_api_key: None,
            finnhub_api_key: None,
            fetch_timeout_ms: 10_000,
            cache_ttl_secs: ttl.default.as_secs(),
            intraday_ttl_secs: ttl.intraday.as_secs(),
            history_ttl_secs: ttl.long_history.as_secs(),
            intraday_stale_secs: 3600,
            reject_stale_intraday: true,
            rate_limits: HashMap::new(),
        }
    }
}

// API keys stay out of logs
impl fmt::Debug for MarketDataConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |k: &Option<String>| k.as_ref().map(|_| "***");
        f.debug_struct("MarketDataConfig")
            .field("sources", &self.sources)
            .field("alpha_vantage_api_key", &mask(&self.alpha_vantage_api_key))
            .field("finnhub_api_key", &mask(&self.finnhub_api_key))
            .field("fetch_timeout_ms", &self.fetch_timeout_ms)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("intraday_ttl_secs", &self.intraday_ttl_secs)
            .field("history_ttl_secs", &self.history_ttl_secs)
            .field("intraday_stale_secs", &self.intraday_stale_secs)
            .field("reject_stale_intraday", &self.reject_stale_intraday)
            .field("rate_limits", &self.rate_limits)
            .finish()
    }
}

impl MarketDataConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, MarketDataError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup. Unset keys keep defaults;
    /// set but unparseable values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MarketDataError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(list) = get("FINBOARD_SOURCES") {
            let listed = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(SourceKind::from_str)
                .collect::<Result<Vec<_>, _>>()?;
            config.sources = dedup_sources(listed);
            if config.sources.is_empty() {
                return Err(MarketDataError::Config(
                    "FINBOARD_SOURCES lists no sources".to_string(),
                ));
            }
        }

        config.alpha_vantage_api_key = get("ALPHA_VANTAGE_API_KEY");
        config.finnhub_api_key = get("FINNHUB_API_KEY");

        if let Some(v) = get("FINBOARD_FETCH_TIMEOUT_MS") {
            config.fetch_timeout_ms = parse_number("FINBOARD_FETCH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("FINBOARD_CACHE_TTL_SECS") {
            config.cache_ttl_secs = parse_number("FINBOARD_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = get("FINBOARD_INTRADAY_TTL_SECS") {
            config.intraday_ttl_secs = parse_number("FINBOARD_INTRADAY_TTL_SECS", &v)?;
        }
        if let Some(v) = get("FINBOARD_HISTORY_TTL_SECS") {
            config.history_ttl_secs = parse_number("FINBOARD_HISTORY_TTL_SECS", &v)?;
        }
        if let Some(v) = get("FINBOARD_INTRADAY_STALE_SECS") {
            config.intraday_stale_secs = parse_number("FINBOARD_INTRADAY_STALE_SECS", &v)?;
        }
        if let Some(v) = get("FINBOARD_REJECT_STALE_INTRADAY") {
            config.reject_stale_intraday = parse_bool("FINBOARD_REJECT_STALE_INTRADAY", &v)?;
        }

        for kind in [SourceKind::Yahoo, SourceKind::AlphaVantage, SourceKind::Finnhub] {
            let rpm_key = format!("FINBOARD_{}_RPM", kind.id());
            let burst_key = format!("FINBOARD_{}_BURST", kind.id());
            let mut limit = RateLimitOverride::default();
            if let Some(v) = get(&rpm_key) {
                limit.requests_per_minute = Some(parse_number(&rpm_key, &v)?);
            }
            if let Some(v) = get(&burst_key) {
                limit.burst = Some(parse_number(&burst_key, &v)?);
            }
            if limit != RateLimitOverride::default() {
                config.rate_limits.insert(kind, limit);
            }
        }

        if config.fetch_timeout_ms == 0 {
            return Err(MarketDataError::Config(
                "FINBOARD_FETCH_TIMEOUT_MS must be positive".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            default: Duration::from_secs(self.cache_ttl_secs),
            intraday: Duration::from_secs(self.intraday_ttl_secs),
            long_history: Duration::from_secs(self.history_ttl_secs),
        }
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            intraday_stale_after: Duration::from_secs(self.intraday_stale_secs),
            reject_stale_intraday: self.reject_stale_intraday,
            ..ValidatorConfig::default()
        }
    }

    /// Effective rate limit for a source given its advertised default.
    pub fn rate_limit_for(&self, kind: SourceKind, default: RateLimitConfig) -> RateLimitConfig {
        match self.rate_limits.get(&kind) {
            Some(o) => RateLimitConfig {
                requests_per_minute: o.requests_per_minute.unwrap_or(default.requests_per_minute),
                burst_capacity: o.burst.map(f64::from).unwrap_or(default.burst_capacity),
            },
            None => default,
        }
    }

    /// Instantiate the configured sources in priority order.
    ///
    /// Sources whose API key is missing or whose client cannot be built are
    /// skipped with a warning. Having none left is an error.
    pub fn build_sources(&self) -> Result<Vec<(SourceKind, SourceAdapter)>, MarketDataError> {
        let timeout = self.fetch_timeout();
        let mut built = Vec::with_capacity(self.sources.len());

        for kind in &dedup_sources(self.sources.clone()) {
            let adapter: SourceAdapter = match kind {
                SourceKind::Yahoo => match YahooProvider::new() {
                    Ok(p) => p.into(),
                    Err(e) => {
                        warn!("Skipping Yahoo source: {}", e);
                        continue;
                    }
                },
                SourceKind::AlphaVantage => match &self.alpha_vantage_api_key {
                    Some(key) => AlphaVantageProvider::new(key.clone(), timeout).into(),
                    None => {
                        warn!("Skipping Alpha Vantage source: ALPHA_VANTAGE_API_KEY not set");
                        continue;
                    }
                },
                SourceKind::Finnhub => match &self.finnhub_api_key {
                    Some(key) => FinnhubProvider::new(key.clone(), timeout).into(),
                    None => {
                        warn!("Skipping Finnhub source: FINNHUB_API_KEY not set");
                        continue;
                    }
                },
            };
            built.push((*kind, adapter));
        }

        if built.is_empty() {
            return Err(MarketDataError::Config(
                "no quote source could be configured".to_string(),
            ));
        }
        Ok(built)
    }
}

/// Drop repeated sources, keeping each at its first position.
fn dedup_sources(sources: Vec<SourceKind>) -> Vec<SourceKind> {
    let mut seen = HashSet::with_capacity(sources.len());
    sources
        .into_iter()
        .filter(|kind| {
            let first = seen.insert(*kind);
            if !first {
                warn!("Source '{}' listed more than once, keeping the first", kind.id());
            }
            first
        })
        .collect()
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, MarketDataError> {
    value
        .trim()
        .parse()
        .map_err(|_| MarketDataError::Config(format!("{} must be a number, got '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, MarketDataError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MarketDataError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}
