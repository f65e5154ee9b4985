mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use finboard_market_data::{
    AnalysisService, MarketDataConfig, MarketDataError, ProviderRegistry, Symbol,
};
use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Cli, Command};

fn init_tracing() {
    let log_format = std::env::var("FINBOARD_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", rendered);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    let config = MarketDataConfig::from_env().context("loading market data configuration")?;
    tracing::debug!("Configuration: {:?}", config);
    let registry = Arc::new(ProviderRegistry::from_config(&config)?);
    tracing::info!("Source chain: {}", registry.source_ids().join(" -> "));
    let service = AnalysisService::new(Arc::clone(&registry));

    match cli.command {
        Command::Analyze {
            period,
            symbols,
            market_cap,
        } => {
            let service = service.with_market_cap(market_cap);
            if let [single] = symbols.as_slice() {
                let symbol = Symbol::parse(single)?;
                let analysis = service.get_analysis(&symbol, period).await?;
                print_json(&analysis, cli.pretty)?;
            } else {
                match service.get_portfolio_analysis(&symbols, period).await {
                    Ok(portfolio) => print_json(&portfolio, cli.pretty)?,
                    Err(MarketDataError::NoValidSymbols { failures }) => {
                        print_json(&failures, cli.pretty)?;
                        anyhow::bail!("none of the {} symbols could be analysed", symbols.len());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Command::Probe { symbol, period } => {
            let symbol = Symbol::parse(&symbol)?;
            let probes = registry.probe(&symbol, period).await;
            let healthy = probes.iter().filter(|p| p.ok).count();
            tracing::info!("{}/{} sources returned data for {}", healthy, probes.len(), symbol);
            print_json(&probes, cli.pretty)?;
        }
        Command::Movers {
            symbols,
            period,
            limit,
        } => {
            let movers = service.market_movers(&symbols, period, limit).await;
            print_json(&movers, cli.pretty)?;
        }
        Command::Trending {
            symbols,
            period,
            limit,
        } => {
            let trending = service.trending(&symbols, period, limit).await;
            print_json(&trending, cli.pretty)?;
        }
        Command::Watch {
            symbols,
            period,
            interval,
            cycles,
        } => {
            let mut feed = service.spawn_refresh(symbols, period, Duration::from_secs(interval));
            while let Some(batch) = feed.next().await {
                print_json(&batch, cli.pretty)?;
                if cycles.is_some_and(|limit| batch.cycle >= limit) {
                    break;
                }
            }
        }
    }

    Ok(())
}
