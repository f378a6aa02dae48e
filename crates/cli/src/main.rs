use anyhow::{bail, Context, Result};
use blockhead_brokers_common::PaperExchange;
use blockhead_brokers_gdax::config::DEFAULT_API_URL;
use blockhead_brokers_gdax::{Credential, GdaxClient, GdaxConfig};
use blockhead_core::*;
use blockhead_data::time::{midnight, parse_datetime};
use blockhead_data::{bar_span, fetch_bars, BarStore, DEFAULT_PACING};
use blockhead_engine::{LiveConfig, LiveSession};
use blockhead_strategies::{
    available, check_funds, check_tradeable, Funds, MacdConfig, MacdStrategy, TargetConfig, TargetPosition,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "blockhead")]
#[command(about = "GDAX market data, order working and strategy tools")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "BLOCKHEAD_LOG_LEVEL")]
    log_level: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the products on the exchange
    Products {
        /// Path to a config containing keys and urls
        config: PathBuf,
    },

    /// Build live bars and report the MACD bias
    Macd {
        /// Path to a config containing keys and urls
        config: PathBuf,

        /// Currency pair to trade
        pair: String,

        /// Quantity to trade
        #[arg(short, long)]
        trade_qty: Option<Decimal>,

        /// Minutes of lookback for moving averages
        #[arg(short, long, default_value = "15")]
        lookback: usize,
    },

    /// Work passive orders until a position is obtained
    Target {
        /// Path to a config containing keys and urls
        config: PathBuf,

        /// Currency pair to trade
        pair: String,

        /// Quantity to trade: positive buys, negative sells
        #[arg(allow_negative_numbers = true)]
        quantity: Decimal,

        /// File to write tick data to
        #[arg(long)]
        tradefile: Option<PathBuf>,

        /// Limit price to bid/offer to obtain position
        #[arg(long)]
        limit_price: Option<Decimal>,

        /// Follow the market at the check interval
        #[arg(long)]
        follow: bool,

        /// Timeout for exchange requests, in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,

        /// Simulate order entry instead of sending orders
        #[arg(long)]
        paper: bool,
    },

    /// Download bars for a pair and save one file per day
    FetchBars {
        /// The currency pair
        pair: String,

        /// Directory to save files
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Bar interval in seconds
        #[arg(short, long, default_value = "60")]
        interval: u32,

        /// Number of bars to fetch at a time
        #[arg(short, long, default_value = "300")]
        quantity: usize,

        /// Start datetime (default: a day ago)
        #[arg(long)]
        start_date: Option<String>,

        /// End datetime (default: now)
        #[arg(long)]
        end_date: Option<String>,

        /// REST endpoint for public market data
        #[arg(long, default_value = DEFAULT_API_URL)]
        api: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { cli.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Commands::Products { config } => list_products(&config).await,
        Commands::Macd {
            config,
            pair,
            trade_qty,
            lookback,
        } => run_macd(&config, &pair, trade_qty, lookback).await,
        Commands::Target {
            config,
            pair,
            quantity,
            tradefile,
            limit_price,
            follow,
            timeout,
            paper,
        } => {
            let target = TargetConfig {
                target: quantity,
                limit_price,
                follow,
            };
            run_target(&config, &pair, target, tradefile, timeout, paper).await
        }
        Commands::FetchBars {
            pair,
            output_dir,
            interval,
            quantity,
            start_date,
            end_date,
            api,
        } => run_fetch_bars(&pair, &output_dir, interval, quantity, start_date, end_date, &api).await,
    }
}

struct Connection {
    config: GdaxConfig,
    exchange: Arc<dyn Exchange>,
    credential: Option<Credential>,
}

fn connect(path: &Path, timeout: Option<u64>, paper: bool) -> Result<Connection> {
    let mut config = GdaxConfig::from_path(path)?;
    if let Some(timeout) = timeout {
        config.client.timeout_secs = timeout;
    }
    let client = GdaxClient::from_config(&config)?;
    let credential = client.credential().cloned();
    let exchange: Arc<dyn Exchange> = if paper {
        tracing::info!("Paper trading: orders are simulated");
        Arc::new(PaperExchange::new(Arc::new(client)))
    } else {
        Arc::new(client)
    };
    Ok(Connection {
        config,
        exchange,
        credential,
    })
}

async fn validate_pair(exchange: &dyn Exchange, pair: &str) -> Result<Ticker> {
    let products = exchange.products().await?;
    if !products.iter().any(|p| p.id == pair) {
        bail!("Pair {} not found in products", pair);
    }
    let ticker = exchange
        .ticker(pair)
        .await
        .with_context(|| format!("Failed to get ticker for {}", pair))?;
    tracing::info!(pair, price = %ticker.price, bid = ?ticker.bid, ask = ?ticker.ask, "Got ticker");
    Ok(ticker)
}

fn log_balances(accounts: &[Account], pair: &str) {
    if let Some((base, quote)) = split_pair(pair) {
        for currency in [base, quote] {
            match available(accounts, currency) {
                Some(amount) => tracing::info!("You have {} {}", amount, currency),
                None => tracing::warn!("No {} account", currency),
            }
        }
    }
}

async fn list_products(path: &Path) -> Result<()> {
    let conn = connect(path, None, false)?;
    let products = conn.exchange.products().await?;
    for product in &products {
        println!("{:<12} {:>6} / {:<6}", product.id, product.base_currency, product.quote_currency);
    }
    tracing::info!(count = products.len(), "Listed products");
    Ok(())
}

async fn run_macd(path: &Path, pair: &str, trade_qty: Option<Decimal>, lookback: usize) -> Result<()> {
    // reports only, never places orders
    let conn = connect(path, None, false)?;
    let ticker = validate_pair(conn.exchange.as_ref(), pair).await?;

    let accounts = conn.exchange.accounts().await?;
    log_balances(&accounts, pair);
    if let Some(qty) = trade_qty {
        check_tradeable(&accounts, pair, qty, ticker.price)?;
    }

    let mut strategy = MacdStrategy::new(MacdConfig {
        instrument: pair.to_string(),
        lookback,
        granularity: 60,
    });
    let history = strategy.warm_up_from(conn.exchange.as_ref()).await;

    let live = LiveConfig::new(pair, &conn.config.uris.wsapi);
    let mut session = LiveSession::new(live, conn.exchange, conn.credential)?;
    if let Some(last) = history.last() {
        session.tick_mut().seed_close(last.close);
    }

    tracing::debug!("Starting feed");
    session.run(&mut strategy).await
}

async fn run_target(
    path: &Path,
    pair: &str,
    target: TargetConfig,
    tradefile: Option<PathBuf>,
    timeout: u64,
    paper: bool,
) -> Result<()> {
    let conn = connect(path, Some(timeout), paper)?;
    let ticker = validate_pair(conn.exchange.as_ref(), pair).await?;

    let accounts = conn.exchange.accounts().await?;
    log_balances(&accounts, pair);
    if check_funds(&accounts, pair, target.target, ticker.price)? == Funds::NothingToDo {
        println!("Nothing to do. Exiting");
        return Ok(());
    }

    let mut live = LiveConfig::new(pair, &conn.config.uris.wsapi);
    live.check_interval = Some(Duration::from_secs(1));
    live.trade_log = tradefile;

    let mut session = LiveSession::new(live, conn.exchange, conn.credential)?;
    let mut worker = TargetPosition::new(target);
    session.run(&mut worker).await
}

fn date_range(start: Option<&str>, end: Option<&str>, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = match start {
        Some(s) => parse_datetime(s)?,
        None => now - ChronoDuration::days(1),
    };
    let end = match end {
        Some(s) => parse_datetime(s)?,
        None => now,
    };
    if start > end {
        bail!("Start date {} is after end date {}", start, end);
    }
    // midnight to midnight
    Ok((midnight(start), midnight(end)))
}

async fn run_fetch_bars(
    pair: &str,
    output_dir: &Path,
    interval: u32,
    quantity: usize,
    start_date: Option<String>,
    end_date: Option<String>,
    api: &str,
) -> Result<()> {
    if bar_span(interval, quantity).is_none() {
        bail!("{} bars of {}s is too long a window to fetch at once", quantity, interval);
    }
    let (start, end) = date_range(start_date.as_deref(), end_date.as_deref(), Utc::now())?;
    tracing::debug!(%start, %end, interval, quantity, "Fetching bars");

    let client = GdaxClient::public(api, Duration::from_secs(10))?;
    let Some(bars) = fetch_bars(&client, pair, start, end, interval, quantity, DEFAULT_PACING).await else {
        bail!("No bars fetched");
    };
    tracing::debug!(count = bars.len(), "Fetched and combined bars");

    let store = BarStore::new(output_dir);
    let files = store.write_bars(pair, interval, &bars)?;
    for file in &files {
        tracing::info!(file = %file.display(), "Wrote bars");
    }
    Ok(())
}
