//! # tb-runner
//!
//! Main entry point for the trading bot.
//!
//! Loads a JSON configuration file, wires the engine against Binance spot
//! and the in-memory stores, re-adopts whatever the previous run left on the
//! exchange, and keeps swap pair prices fresh and swap actions moving until
//! Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! tb-runner config.json --log-level info
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tb_core::cache::CacheKeys;
use tb_engine::balance::ExchangeBalances;
use tb_engine::ports::{LogNotifier, NoPredictor};
use tb_engine::storage::{MemoryOrderRepository, MemorySwapRepository};
use tb_engine::{Collaborators, Engine};
use tb_td::binance::BinanceTd;
use tb_td::binance::config::BinanceTdConfig;
use tracing::{error, info, warn};

/// Trading bot order and swap engine.
#[derive(Parser)]
#[command(name = "tb-runner", about = "Trading bot order and swap engine")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output. Overrides `bot.log_path`.
    #[arg(long)]
    log_dir: Option<String>,

    /// Swap pair price refresh period in seconds.
    #[arg(long, default_value_t = 30)]
    refresh_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = tb_core::config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // 2. Initialize logging
    let log_dir = cli.log_dir.clone().or_else(|| config.bot.log_path.clone());
    let _log_guard =
        tb_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), "tb-runner");
    info!("tb-runner starting, config={}, log_level={}", cli.config.display(), cli.log_level);

    // a bot without identity would share cache keys with every other bot
    config.validate()?;
    let bot_id = config.bot.bot_id.clone();
    info!(
        "bot {bot_id}: {} trade limit(s), swap enabled={}",
        config.trade_limits.len(),
        config.engine.swap.enabled
    );

    // 3. Wire collaborators
    let td_config: BinanceTdConfig =
        serde_json::from_value(config.binance.clone()).context("parsing binance section")?;
    let exchange = Arc::new(BinanceTd::new(td_config)?);
    let balances = Arc::new(ExchangeBalances::new(
        exchange.clone(),
        CacheKeys::new(&bot_id),
        Duration::from_secs(config.engine.balance_cache_secs),
    ));
    let engine = Engine::new(
        &bot_id,
        config.engine.clone(),
        Collaborators {
            exchange,
            orders: Arc::new(MemoryOrderRepository::new()),
            swaps: Arc::new(MemorySwapRepository::new()),
            balances,
            notifier: Arc::new(LogNotifier),
            predictor: Arc::new(NoPredictor),
        },
    );

    // 4. Swap pairs, before any swap leg needs their prices
    if config.engine.swap.enabled {
        let refresher = engine.pairs.clone();
        match refresher.seed().await {
            Ok(n) => info!("{n} swap pair(s) seeded"),
            Err(e) => error!("swap pair seeding failed: {e:#}"),
        }
        if let Err(e) = refresher.refresh().await {
            warn!("initial swap pair refresh failed: {e:#}");
        }
        tokio::spawn(refresher.run(Duration::from_secs(cli.refresh_secs)));
    }

    // 5. Startup reconciliation
    match engine.reconcile_open_orders().await {
        Ok(n) => info!("{n} open exchange order(s) adopted"),
        Err(e) => warn!("open order reconciliation failed: {e}"),
    }
    match engine.resume_swaps().await {
        Ok(n) => info!("{n} swap action(s) resumed"),
        Err(e) => warn!("swap resumption failed: {e}"),
    }
    let sweep_every = Duration::from_secs(config.engine.swap.resume_interval_secs);
    tokio::spawn(engine.swap_driver.clone().run(sweep_every));

    info!("engine ready, press Ctrl+C to stop");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, goodbye");
    Ok(())
}
