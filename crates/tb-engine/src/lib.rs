//! # tb-engine
//!
//! Order lifecycle and swap arbitrage engine.
//!
//! ```text
//!                      ┌──────────────┐
//!   strategy ─────────►│OrderExecutor │──► TradeLock (one mutating op per symbol)
//!   (buy/sell/extra)   └──────┬───────┘
//!                             │ place / adopt
//!                             ▼
//!                       ┌──────────┐  intent/ack   ┌─────────┐
//!                       │ driver   │◄─────────────►│ monitor │──► LossSecurity, SwapFinder
//!                       └────┬─────┘               └─────────┘
//!                            │ executed / canceled / swap
//!                            ▼
//!            OrderRepository          SwapValidator ─► SwapBuilder ─► SwapExecutor
//! ```
//!
//! | Module        | Role                                                        |
//! |---------------|-------------------------------------------------------------|
//! | `trade_lock`  | per-symbol lock actor                                       |
//! | `market`      | cache-first depth and candles                               |
//! | `price`       | buy / sell target prices                                    |
//! | `risk`        | loss security gate                                          |
//! | `swap`        | chain search, validation, action build and execution        |
//! | `order`       | Buy / Sell / BuyExtra and the order watchdog                |
//! | `events`      | typed market events and handler registry                    |
//! | `ports`       | collaborator traits (balances, stores, notifier, predictor) |
//! | `storage`     | in-memory stores                                            |
//!
//! [`Engine::new`] wires everything from a set of [`Collaborators`].

pub mod balance;
pub mod cache;
pub mod error;
pub mod events;
pub mod market;
pub mod order;
pub mod ports;
pub mod price;
pub mod risk;
pub mod storage;
pub mod swap;
pub mod trade_lock;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use tb_core::config::EngineConfig;
use tb_td::Exchange;
use tracing::info;

use crate::cache::EngineCache;
use crate::error::EngineResult;
use crate::events::{DepthCacheHandler, EventDispatcher, EventKind, SwapPairPriceHandler};
use crate::market::MarketData;
use crate::order::{OrderExecutor, SwapRoute, Watchdog};
use crate::ports::{BalanceService, Notifier, OrderRepository, Predictor, SwapRepository};
use crate::price::PriceCalculator;
use crate::risk::LossSecurity;
use crate::swap::{
    SwapBuilder, SwapDriver, SwapExecutor, SwapFinder, SwapPairRefresher, SwapValidator,
};
use crate::trade_lock::TradeLock;

/// External systems the engine runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub exchange: Arc<dyn Exchange>,
    pub orders: Arc<dyn OrderRepository>,
    pub swaps: Arc<dyn SwapRepository>,
    pub balances: Arc<dyn BalanceService>,
    pub notifier: Arc<dyn Notifier>,
    pub predictor: Arc<dyn Predictor>,
}

/// Fully wired engine of one bot.
pub struct Engine {
    pub bot_id: String,
    pub config: EngineConfig,
    pub exchange: Arc<dyn Exchange>,
    pub orders: Arc<dyn OrderRepository>,
    pub cache: Arc<EngineCache>,
    pub market: Arc<MarketData>,
    pub risk: Arc<LossSecurity>,
    pub prices: PriceCalculator,
    pub finder: Arc<SwapFinder>,
    pub swap_driver: Arc<SwapDriver>,
    pub executor: OrderExecutor,
    pub events: Arc<EventDispatcher>,
    pub pairs: Arc<SwapPairRefresher>,
}

impl Engine {
    /// Wire the engine. Spawns the trade lock actor, so this must run inside
    /// a Tokio runtime.
    pub fn new(bot_id: &str, config: EngineConfig, deps: Collaborators) -> Self {
        let Collaborators { exchange, orders, swaps, balances, notifier, predictor } = deps;

        let cache = Arc::new(EngineCache::new(bot_id, &config));
        let market = Arc::new(MarketData::new(
            exchange.clone(),
            cache.keys().clone(),
            Duration::from_secs(config.market_cache_secs),
            config.depth_limit,
        ));
        let risk = Arc::new(LossSecurity::new(
            market.clone(),
            predictor,
            config.ml_enabled,
            config.risk.clone(),
        ));
        let prices = PriceCalculator::new(
            market.clone(),
            risk.clone(),
            cache.clone(),
            orders.clone(),
            config.risk.history_hit_ratio,
        );

        let finder = Arc::new(SwapFinder::new(swaps.clone(), cache.clone(), config.swap.clone()));
        let validator =
            Arc::new(SwapValidator::new(swaps.clone(), market.clone(), config.swap.clone()));
        let builder = Arc::new(SwapBuilder::new(bot_id, orders.clone(), swaps.clone()));
        let swap_executor = Arc::new(SwapExecutor::new(
            exchange.clone(),
            orders.clone(),
            swaps.clone(),
            balances.clone(),
            config.swap.clone(),
        ));
        let swap_driver = Arc::new(SwapDriver::new(orders.clone(), swap_executor));

        let watchdog = Watchdog::new(
            exchange.clone(),
            cache.clone(),
            market.clone(),
            risk.clone(),
            finder.clone(),
            config.clone(),
        );
        let executor = OrderExecutor::new(
            bot_id,
            exchange.clone(),
            orders.clone(),
            balances,
            notifier,
            cache.clone(),
            TradeLock::spawn(),
            watchdog,
            SwapRoute { validator, builder, driver: swap_driver.clone() },
            config.clone(),
        );

        let events = Arc::new(EventDispatcher::new());
        events.register(EventKind::DepthTick, Arc::new(DepthCacheHandler::new(market.clone())));
        events.register(EventKind::PriceTick, Arc::new(SwapPairPriceHandler::new(swaps.clone())));
        let pairs = Arc::new(SwapPairRefresher::new(exchange.clone(), swaps, events.clone()));

        Self {
            bot_id: bot_id.to_string(),
            config,
            exchange,
            orders,
            cache,
            market,
            risk,
            prices,
            finder,
            swap_driver,
            executor,
            events,
            pairs,
        }
    }

    /// Mirror every open exchange order so the next operation on its
    /// symbol and side adopts it instead of placing another one.
    pub async fn reconcile_open_orders(&self) -> EngineResult<usize> {
        let open = self.exchange.open_orders(None).await?;
        for order in &open {
            self.cache.set_pending_exchange_order(order);
            info!(
                "[engine] adopted {} {} {} ({})",
                order.symbol, order.side, order.order_id, order.status
            );
        }
        Ok(open.len())
    }

    /// Start a background task for every order still flagged as swapping.
    /// Returns without waiting for any of them.
    pub async fn resume_swaps(&self) -> EngineResult<usize> {
        self.swap_driver.sweep().await
    }
}
