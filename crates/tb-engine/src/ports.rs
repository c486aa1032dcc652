//! Collaborator interfaces the engine consumes.
//!
//! The engine never talks to a database, a notification channel or the ML
//! model directly. Each is reached through one of these traits so that the
//! runner can wire real implementations and tests can wire in-memory ones.
//!
//! Exchange access is the [`Exchange`](tb_td::Exchange) trait from `tb-td`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tb_core::swap::{SwapAction, SwapChain, SwapPair};
use tb_core::trading::Order;
use tracing::{info, warn};

use crate::error::EngineResult;

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BalanceService: Send + Sync {
    /// Free balance of `asset`. `force_fresh` bypasses any cache.
    async fn asset_balance(&self, asset: &str, force_fresh: bool) -> Result<f64>;

    /// Drop the cached balance of `asset`.
    fn invalidate(&self, asset: &str);
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Durable store of bot orders.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert a new order and return it with its assigned id.
    ///
    /// Fails with [`DuplicateExternalId`](crate::error::EngineError::DuplicateExternalId)
    /// when another order already references the same exchange order.
    async fn create(&self, order: Order) -> EngineResult<Order>;

    async fn update(&self, order: &Order) -> EngineResult<()>;

    async fn find(&self, id: i64) -> EngineResult<Option<Order>>;

    /// The open BUY position of `symbol`, if any. Positions handed to a swap
    /// action are skipped.
    async fn find_opened(&self, symbol: &str) -> EngineResult<Option<Order>>;

    /// SELL orders closing the position `parent_id`.
    async fn find_sells(&self, parent_id: i64) -> EngineResult<Vec<Order>>;

    /// Every order currently flagged as rerouted through a swap.
    async fn find_swapping(&self) -> EngineResult<Vec<Order>>;
}

/// Durable store of swap pairs, chains and actions.
#[async_trait]
pub trait SwapRepository: Send + Sync {
    async fn swap_pairs(&self) -> EngineResult<Vec<SwapPair>>;

    async fn swap_pair(&self, symbol: &str) -> EngineResult<Option<SwapPair>>;

    /// Insert or replace a pair.
    async fn save_swap_pair(&self, pair: &SwapPair) -> EngineResult<()>;

    /// Persist a chain, deduplicated by `hash`. An existing row keeps the
    /// highest `max_percent` seen. Returns the stored chain.
    async fn save_chain(&self, chain: &SwapChain) -> EngineResult<SwapChain>;

    async fn create_action(&self, action: SwapAction) -> EngineResult<SwapAction>;

    async fn update_action(&self, action: &SwapAction) -> EngineResult<()>;

    /// The pending or in-process action of `order_id`.
    async fn active_action(&self, order_id: i64) -> EngineResult<Option<SwapAction>>;
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Outbound alerts and trade callbacks.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn buy_order(&self, order: &Order, bot_id: &str, details: &str) -> Result<()>;

    async fn sell_order(&self, order: &Order, bot_id: &str, details: &str) -> Result<()>;

    async fn error(&self, bot_id: &str, code: i32, message: &str, fatal: bool) -> Result<()>;
}

/// What a fire-and-forget notification is about.
#[derive(Debug, Clone)]
pub enum Notification {
    Buy { order: Order, details: String },
    Sell { order: Order, details: String },
    Error { code: i32, message: String, fatal: bool },
}

/// Send `notification` on a background task. Failures are logged only.
pub fn notify(notifier: &Arc<dyn Notifier>, bot_id: &str, notification: Notification) {
    let notifier = Arc::clone(notifier);
    let bot_id = bot_id.to_string();
    tokio::spawn(async move {
        let result = match &notification {
            Notification::Buy { order, details } => {
                notifier.buy_order(order, &bot_id, details).await
            }
            Notification::Sell { order, details } => {
                notifier.sell_order(order, &bot_id, details).await
            }
            Notification::Error { code, message, fatal } => {
                notifier.error(&bot_id, *code, message, *fatal).await
            }
        };
        if let Err(e) = result {
            warn!("[notifier] delivery failed: {e:#}");
        }
    });
}

/// Notifier that writes every event to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn buy_order(&self, order: &Order, bot_id: &str, details: &str) -> Result<()> {
        info!(
            "[notifier] {bot_id} BUY {} qty={} price={} {details}",
            order.symbol, order.executed_quantity, order.price
        );
        Ok(())
    }

    async fn sell_order(&self, order: &Order, bot_id: &str, details: &str) -> Result<()> {
        info!(
            "[notifier] {bot_id} SELL {} qty={} price={} {details}",
            order.symbol, order.executed_quantity, order.price
        );
        Ok(())
    }

    async fn error(&self, bot_id: &str, code: i32, message: &str, fatal: bool) -> Result<()> {
        warn!("[notifier] {bot_id} error code={code} fatal={fatal}: {message}");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

/// Price prediction service. Best effort: callers treat an error as "no signal".
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, symbol: &str) -> Result<f64>;
}

/// Predictor used when no prediction service is configured.
pub struct NoPredictor;

#[async_trait]
impl Predictor for NoPredictor {
    async fn predict(&self, symbol: &str) -> Result<f64> {
        anyhow::bail!("no predictor configured for {symbol}")
    }
}
