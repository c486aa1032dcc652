//! Configuration parsing for the trading bot.
//!
//! All components read their settings from a single JSON config file. The
//! top-level structure holds the bot identity, the raw exchange section
//! (deserialized by the trading crate), engine tunables and per-symbol trade
//! limits.
//!
//! # Example config
//!
//! ```json
//! {
//!   "bot": { "bot_id": "bot-1", "log_path": "/tmp/log" },
//!   "binance": { "api_key": "...", "secret_key": "..." },
//!   "engine": { "buy_ttl_secs": 480, "swap": { "enabled": true, "min_percent": 0.5 } },
//!   "trade_limits": [{ "symbol": "ETHUSDT", "base_asset": "ETH", ... }]
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::TbError;
use crate::trading::TradeLimit;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Bot identity and logging metadata.
    pub bot: BotConfig,

    /// Exchange section, interpreted by the trading module.
    #[serde(default)]
    pub binance: serde_json::Value,

    /// Engine tunables.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-symbol trading policies.
    #[serde(default)]
    pub trade_limits: Vec<TradeLimit>,
}

impl AppConfig {
    /// Reject configs the bot cannot run with.
    pub fn validate(&self) -> Result<(), TbError> {
        if self.bot.bot_id.trim().is_empty() {
            return Err(TbError::Config("bot.bot_id must not be empty".into()));
        }
        for limit in &self.trade_limits {
            if limit.min_price <= 0.0 || limit.min_quantity <= 0.0 {
                return Err(TbError::Config(format!(
                    "{}: min_price and min_quantity must be positive",
                    limit.symbol
                )));
            }
        }
        if self.engine.swap.resume_interval_secs == 0 {
            return Err(TbError::Config("engine.swap.resume_interval_secs must be positive".into()));
        }
        Ok(())
    }

    /// Trade limit for `symbol`, if configured.
    pub fn trade_limit(&self, symbol: &str) -> Option<&TradeLimit> {
        self.trade_limits.iter().find(|l| l.symbol == symbol)
    }
}

/// Bot identity block.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Scopes every shared cache key so several bots can share one store.
    #[serde(default)]
    pub bot_id: String,
    pub log_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Engine tunables
// ---------------------------------------------------------------------------

/// Order executor, watchdog, risk and cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Watchdog budget for a BUY before cancellation is considered.
    #[serde(default = "default_order_ttl")]
    pub buy_ttl_secs: u64,
    /// Watchdog budget for a SELL.
    #[serde(default = "default_order_ttl")]
    pub sell_ttl_secs: u64,
    /// TTL bonus granted whenever the executed quantity grows.
    #[serde(default = "default_ttl_extension")]
    pub ttl_extension_secs: u64,
    /// Interval between monitor checks of a watched order.
    #[serde(default = "default_watch_poll_ms")]
    pub watch_poll_ms: u64,
    /// Sleep after a failed exchange query.
    #[serde(default = "default_transient_backoff")]
    pub transient_backoff_secs: u64,
    /// Buy lock placed on a symbol after a risky BUY was cancelled.
    #[serde(default = "default_buy_lock")]
    pub buy_lock_secs: u64,
    #[serde(default = "default_opened_order_cache")]
    pub opened_order_cache_secs: u64,
    /// Lifetime of the pending exchange order mirror.
    #[serde(default = "default_pending_order_cache")]
    pub pending_order_cache_secs: u64,
    #[serde(default = "default_manual_order_cache")]
    pub manual_order_cache_secs: u64,
    /// How long a queued cancel request stays valid.
    #[serde(default = "default_cancel_request")]
    pub cancel_request_secs: u64,
    #[serde(default = "default_balance_cache")]
    pub balance_cache_secs: u64,
    /// TTL of cached order books and candles.
    #[serde(default = "default_market_cache")]
    pub market_cache_secs: u64,
    /// Levels requested per side when fetching an order book.
    #[serde(default = "default_depth_limit")]
    pub depth_limit: u32,
    /// Use the price predictor as a risk signal.
    #[serde(default)]
    pub ml_enabled: bool,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub swap: SwapConfig,
}

impl EngineConfig {
    pub fn buy_ttl(&self) -> Duration {
        Duration::from_secs(self.buy_ttl_secs)
    }

    pub fn sell_ttl(&self) -> Duration {
        Duration::from_secs(self.sell_ttl_secs)
    }

    pub fn ttl_extension(&self) -> Duration {
        Duration::from_secs(self.ttl_extension_secs)
    }

    pub fn watch_poll(&self) -> Duration {
        Duration::from_millis(self.watch_poll_ms)
    }

    pub fn transient_backoff(&self) -> Duration {
        Duration::from_secs(self.transient_backoff_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buy_ttl_secs: default_order_ttl(),
            sell_ttl_secs: default_order_ttl(),
            ttl_extension_secs: default_ttl_extension(),
            watch_poll_ms: default_watch_poll_ms(),
            transient_backoff_secs: default_transient_backoff(),
            buy_lock_secs: default_buy_lock(),
            opened_order_cache_secs: default_opened_order_cache(),
            pending_order_cache_secs: default_pending_order_cache(),
            manual_order_cache_secs: default_manual_order_cache(),
            cancel_request_secs: default_cancel_request(),
            balance_cache_secs: default_balance_cache(),
            market_cache_secs: default_market_cache(),
            depth_limit: default_depth_limit(),
            ml_enabled: false,
            risk: RiskConfig::default(),
            swap: SwapConfig::default(),
        }
    }
}

/// Loss-security thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Candle interval of the historical-minimum window.
    #[serde(default = "default_risk_interval")]
    pub history_interval: String,
    #[serde(default = "default_risk_period")]
    pub history_period: u32,
    /// Drop (percent) that counts as "fallen below".
    #[serde(default = "default_risk_drop")]
    pub drop_percent: f64,
    /// Candle interval used for BTC/ETH interpolation.
    #[serde(default = "default_interpolation_interval")]
    pub interpolation_interval: String,
    #[serde(default = "default_interpolation_period")]
    pub interpolation_period: u32,
    /// Reference symbols for correlation interpolation.
    #[serde(default = "default_reference_symbols")]
    pub reference_symbols: Vec<String>,
    /// Share of the history window that must have reached the profit target.
    #[serde(default = "default_history_hit_ratio")]
    pub history_hit_ratio: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            history_interval: default_risk_interval(),
            history_period: default_risk_period(),
            drop_percent: default_risk_drop(),
            interpolation_interval: default_interpolation_interval(),
            interpolation_period: default_interpolation_period(),
            reference_symbols: default_reference_symbols(),
            history_hit_ratio: default_history_hit_ratio(),
        }
    }
}

/// Swap search, validation and execution settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SwapConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Chains below this percent are rejected.
    #[serde(default = "default_swap_min_percent")]
    pub min_percent: f64,
    /// Chains at or above this percent are executed regardless of position age.
    #[serde(default = "default_swap_turbo_percent")]
    pub turbo_percent: f64,
    /// Position age after which a losing SELL may be rerouted.
    #[serde(default = "default_swap_hold_hours")]
    pub hold_hours: u64,
    /// Profit (negative percent) at or below which a held position counts as losing.
    #[serde(default = "default_swap_loss_percent")]
    pub loss_percent: f64,
    /// Flat fee rate deducted once per leg.
    #[serde(default = "default_swap_fee")]
    pub fee: f64,
    #[serde(default = "default_price_max_age")]
    pub price_max_age_secs: u64,
    /// Allowed drift between a recorded leg price and the live price.
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance_percent: f64,
    /// Daily candles checked for price plausibility.
    #[serde(default = "default_history_days")]
    pub history_days: u32,
    #[serde(default = "default_poll_new_ms")]
    pub poll_new_ms: u64,
    #[serde(default = "default_poll_partial_ms")]
    pub poll_partial_ms: u64,
    /// A leg still NEW this long after the action started is cancelled.
    #[serde(default = "default_new_leg_timeout")]
    pub new_leg_timeout_secs: u64,
    /// After this long a nearly complete last leg is accepted as final.
    #[serde(default = "default_partial_accept")]
    pub partial_accept_secs: u64,
    #[serde(default = "default_nearly_complete")]
    pub nearly_complete_ratio: f64,
    #[serde(default = "default_chain_cache")]
    pub chain_cache_secs: u64,
    /// Period of the sweep that re-drives orders still flagged as swapping.
    #[serde(default = "default_resume_interval")]
    pub resume_interval_secs: u64,
}

impl SwapConfig {
    pub fn price_max_age_ms(&self) -> u64 {
        self.price_max_age_secs * 1000
    }
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_percent: default_swap_min_percent(),
            turbo_percent: default_swap_turbo_percent(),
            hold_hours: default_swap_hold_hours(),
            loss_percent: default_swap_loss_percent(),
            fee: default_swap_fee(),
            price_max_age_secs: default_price_max_age(),
            price_tolerance_percent: default_price_tolerance(),
            history_days: default_history_days(),
            poll_new_ms: default_poll_new_ms(),
            poll_partial_ms: default_poll_partial_ms(),
            new_leg_timeout_secs: default_new_leg_timeout(),
            partial_accept_secs: default_partial_accept(),
            nearly_complete_ratio: default_nearly_complete(),
            chain_cache_secs: default_chain_cache(),
            resume_interval_secs: default_resume_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults (used by serde)
// ---------------------------------------------------------------------------

fn default_order_ttl() -> u64 {
    480
}

fn default_ttl_extension() -> u64 {
    300
}

fn default_watch_poll_ms() -> u64 {
    5_000
}

fn default_transient_backoff() -> u64 {
    120
}

fn default_buy_lock() -> u64 {
    60
}

fn default_opened_order_cache() -> u64 {
    30
}

fn default_pending_order_cache() -> u64 {
    1800
}

fn default_manual_order_cache() -> u64 {
    3600
}

fn default_cancel_request() -> u64 {
    300
}

fn default_depth_limit() -> u32 {
    20
}

fn default_balance_cache() -> u64 {
    10
}

fn default_market_cache() -> u64 {
    10
}

fn default_risk_interval() -> String {
    "1h".into()
}

fn default_risk_period() -> u32 {
    200
}

fn default_risk_drop() -> f64 {
    0.5
}

fn default_interpolation_interval() -> String {
    "1h".into()
}

fn default_interpolation_period() -> u32 {
    24
}

fn default_reference_symbols() -> Vec<String> {
    vec!["BTCUSDT".into(), "ETHUSDT".into()]
}

fn default_history_hit_ratio() -> f64 {
    0.8
}

fn default_swap_min_percent() -> f64 {
    0.5
}

fn default_swap_turbo_percent() -> f64 {
    2.0
}

fn default_swap_hold_hours() -> u64 {
    24
}

fn default_swap_loss_percent() -> f64 {
    -5.0
}

fn default_swap_fee() -> f64 {
    0.002
}

fn default_price_max_age() -> u64 {
    60
}

fn default_price_tolerance() -> f64 {
    0.10
}

fn default_history_days() -> u32 {
    14
}

fn default_poll_new_ms() -> u64 {
    15_000
}

fn default_poll_partial_ms() -> u64 {
    7_000
}

fn default_new_leg_timeout() -> u64 {
    60
}

fn default_partial_accept() -> u64 {
    4 * 3600
}

fn default_nearly_complete() -> f64 {
    0.9
}

fn default_chain_cache() -> u64 {
    60
}

fn default_resume_interval() -> u64 {
    60
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}
