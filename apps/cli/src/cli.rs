//! Command-line arguments.

use clap::{Parser, Subcommand};
use finboard_market_data::Period;

/// Finboard market data probe
///
/// Fetches price series through the configured source chain and prints
/// analysis results as JSON. Sources, keys and limits come from `FINBOARD_*`
/// environment variables or a `.env` file.
#[derive(Debug, Parser)]
#[command(name = "finboard-cli", version, about = "Finboard market data probe")]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Indicators and signals for one symbol, or a portfolio summary for several.
    Analyze {
        /// Lookback period: 1d, 5d, 1mo, 3mo, 6mo, 1y or 5y
        period: Period,

        /// Ticker symbols
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Also look up market capitalization (one extra call per symbol)
        #[arg(long, default_value_t = false)]
        market_cap: bool,
    },

    /// Query every configured source directly and report its status.
    Probe {
        /// Symbol to request from each source
        #[arg(default_value = "AAPL")]
        symbol: String,

        #[arg(long, default_value = "5d")]
        period: Period,
    },

    /// Top daily gainers and losers among the given symbols.
    Movers {
        #[arg(required = true)]
        symbols: Vec<String>,

        #[arg(long, default_value = "5d")]
        period: Period,

        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Most active symbols by the volume of their latest daily bar.
    Trending {
        #[arg(required = true)]
        symbols: Vec<String>,

        #[arg(long, default_value = "5d")]
        period: Period,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Refresh symbols periodically, printing one JSON line per cycle.
    Watch {
        #[arg(required = true)]
        symbols: Vec<String>,

        #[arg(long, default_value = "1d")]
        period: Period,

        /// Seconds between refresh cycles
        #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,

        /// Stop after this many cycles; runs until interrupted when omitted
        #[arg(long)]
        cycles: Option<u64>,
    },
}
