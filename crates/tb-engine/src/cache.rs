//! Short-lived, bot-scoped engine state.
//!
//! | Entry                    | Key purpose                  | Default TTL |
//! |--------------------------|------------------------------|-------------|
//! | open BUY position        | `OpenedOrder`                | 30s         |
//! | exchange order mirror    | `PendingExchangeOrder(side)` | 30min       |
//! | best swap chain          | `SwapChain`                  | 60s         |
//! | buy lock                 | `BuyLock`                    | 60s         |
//! | external cancel request  | `CancelRequest`              | 5min        |
//! | manual order override    | `ManualOrder`                | 1h          |
//!
//! Every key goes through [`CacheKeys`] so two bots sharing a store never
//! see each other's entries.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tb_core::cache::{CacheKey, CacheKeys, TtlCache};
use tb_core::config::EngineConfig;
use tb_core::enums::Side;
use tb_core::swap::SwapChain;
use tb_core::trading::{ExchangeOrder, Order};

use crate::error::EngineResult;
use crate::ports::OrderRepository;

/// A manually requested order waiting to be executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualOrder {
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub created_at: u64,
}

struct Ttls {
    opened_order: Duration,
    pending_order: Duration,
    swap_chain: Duration,
    buy_lock: Duration,
    cancel_request: Duration,
    manual_order: Duration,
}

pub struct EngineCache {
    keys: CacheKeys,
    ttl: Ttls,
    opened: TtlCache<CacheKey, Order>,
    pending: TtlCache<CacheKey, ExchangeOrder>,
    chains: TtlCache<CacheKey, SwapChain>,
    flags: TtlCache<CacheKey, ()>,
    manual: TtlCache<CacheKey, ManualOrder>,
}

impl EngineCache {
    pub fn new(bot_id: &str, config: &EngineConfig) -> Self {
        Self {
            keys: CacheKeys::new(bot_id),
            ttl: Ttls {
                opened_order: Duration::from_secs(config.opened_order_cache_secs),
                pending_order: Duration::from_secs(config.pending_order_cache_secs),
                swap_chain: Duration::from_secs(config.swap.chain_cache_secs),
                buy_lock: Duration::from_secs(config.buy_lock_secs),
                cancel_request: Duration::from_secs(config.cancel_request_secs),
                manual_order: Duration::from_secs(config.manual_order_cache_secs),
            },
            opened: TtlCache::new(),
            pending: TtlCache::new(),
            chains: TtlCache::new(),
            flags: TtlCache::new(),
            manual: TtlCache::new(),
        }
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    // -- open position --

    pub fn opened_order(&self, symbol: &str) -> Option<Order> {
        self.opened.get(&self.keys.opened_order(symbol))
    }

    pub fn set_opened_order(&self, order: &Order) {
        let key = self.keys.opened_order(&order.symbol);
        self.opened.set(key, order.clone(), self.ttl.opened_order);
    }

    pub fn invalidate_opened_order(&self, symbol: &str) {
        self.opened.remove(&self.keys.opened_order(symbol));
    }

    /// Open position of `symbol`, falling back to the repository on a miss.
    pub async fn load_opened_order(
        &self,
        orders: &dyn OrderRepository,
        symbol: &str,
    ) -> EngineResult<Option<Order>> {
        if let Some(order) = self.opened_order(symbol) {
            return Ok(Some(order));
        }
        let order = orders.find_opened(symbol).await?;
        if let Some(order) = &order {
            self.set_opened_order(order);
        }
        Ok(order)
    }

    // -- exchange order mirror --

    pub fn pending_exchange_order(&self, symbol: &str, side: Side) -> Option<ExchangeOrder> {
        self.pending.get(&self.keys.pending_exchange_order(symbol, side))
    }

    pub fn set_pending_exchange_order(&self, order: &ExchangeOrder) {
        let key = self.keys.pending_exchange_order(&order.symbol, order.side);
        self.pending.set(key, order.clone(), self.ttl.pending_order);
    }

    pub fn delete_pending_exchange_order(&self, symbol: &str, side: Side) {
        self.pending.remove(&self.keys.pending_exchange_order(symbol, side));
    }

    // -- swap chains --

    pub fn swap_chain(&self, asset: &str) -> Option<SwapChain> {
        self.chains.get(&self.keys.swap_chain(asset))
    }

    pub fn set_swap_chain(&self, asset: &str, chain: &SwapChain) {
        self.chains.set(self.keys.swap_chain(asset), chain.clone(), self.ttl.swap_chain);
    }

    pub fn invalidate_swap_chain(&self, asset: &str) {
        self.chains.remove(&self.keys.swap_chain(asset));
    }

    // -- buy locks / cancel requests --

    pub fn set_buy_lock(&self, symbol: &str) {
        self.flags.set(self.keys.buy_lock(symbol), (), self.ttl.buy_lock);
    }

    pub fn is_buy_locked(&self, symbol: &str) -> bool {
        self.flags.contains(&self.keys.buy_lock(symbol))
    }

    /// Ask the watchdog of `symbol` to cancel its working order.
    pub fn request_cancel(&self, symbol: &str) {
        self.flags.set(self.keys.cancel_request(symbol), (), self.ttl.cancel_request);
    }

    /// Consume a queued cancel request.
    pub fn take_cancel_request(&self, symbol: &str) -> bool {
        self.flags.take(&self.keys.cancel_request(symbol)).is_some()
    }

    // -- manual orders --

    pub fn manual_order(&self, symbol: &str) -> Option<ManualOrder> {
        self.manual.get(&self.keys.manual_order(symbol))
    }

    pub fn set_manual_order(&self, order: ManualOrder) {
        let key = self.keys.manual_order(&order.symbol);
        self.manual.set(key, order, self.ttl.manual_order);
    }

    pub fn delete_manual_order(&self, symbol: &str) {
        self.manual.remove(&self.keys.manual_order(symbol));
    }
}
