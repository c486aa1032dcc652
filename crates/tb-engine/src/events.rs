//! Typed engine events and a kind-keyed handler registry.
//!
//! Market data reaches the engine as [`EngineEvent`]s. Each handler is
//! registered for one [`EventKind`]; [`EventDispatcher::dispatch`] runs every
//! handler of the event's kind in registration order. A failing handler is
//! logged and does not stop the others.

use std::sync::Arc;

use ahash::AHashMap;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tb_core::market_data::OrderBook;
use tracing::{debug, warn};

use crate::market::MarketData;
use crate::ports::SwapRepository;

/// A typed event emitted by market data sources.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Best bid/ask refresh of one symbol.
    PriceTick {
        symbol: String,
        bid: f64,
        ask: f64,
        /// 24h change in percent.
        price_change_percent: f64,
        /// Event time (ms since epoch).
        timestamp: u64,
    },

    /// Full order book snapshot.
    DepthTick(OrderBook),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PriceTick,
    DepthTick,
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PriceTick { .. } => EventKind::PriceTick,
            Self::DepthTick(_) => EventKind::DepthTick,
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &EngineEvent) -> Result<()>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<AHashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        debug!("[events] {} registered for {kind:?}", handler.name());
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    /// Run every handler registered for the event's kind. Returns how many
    /// handled it successfully.
    pub async fn dispatch(&self, event: &EngineEvent) -> usize {
        let handlers = self.handlers.read().get(&event.kind()).cloned().unwrap_or_default();
        let mut handled = 0;
        for handler in handlers {
            match handler.handle(event).await {
                Ok(()) => handled += 1,
                Err(e) => warn!("[events] {} failed on {:?}: {e:#}", handler.name(), event.kind()),
            }
        }
        handled
    }
}

// ---------------------------------------------------------------------------
// Built-in handlers
// ---------------------------------------------------------------------------

/// Writes depth snapshots into the market data cache.
pub struct DepthCacheHandler {
    market: Arc<MarketData>,
}

impl DepthCacheHandler {
    pub fn new(market: Arc<MarketData>) -> Self {
        Self { market }
    }
}

#[async_trait]
impl EventHandler for DepthCacheHandler {
    fn name(&self) -> &'static str {
        "depth-cache"
    }

    async fn handle(&self, event: &EngineEvent) -> Result<()> {
        if let EngineEvent::DepthTick(book) = event {
            self.market.put_depth(book.clone());
        }
        Ok(())
    }
}

/// Refreshes the live prices of known swap pairs.
pub struct SwapPairPriceHandler {
    swaps: Arc<dyn SwapRepository>,
}

impl SwapPairPriceHandler {
    pub fn new(swaps: Arc<dyn SwapRepository>) -> Self {
        Self { swaps }
    }
}

#[async_trait]
impl EventHandler for SwapPairPriceHandler {
    fn name(&self) -> &'static str {
        "swap-pair-price"
    }

    async fn handle(&self, event: &EngineEvent) -> Result<()> {
        let EngineEvent::PriceTick { symbol, bid, ask, price_change_percent, timestamp } = event
        else {
            return Ok(());
        };
        // only pairs seeded from exchange info are tracked
        let Some(mut pair) = self.swaps.swap_pair(symbol).await? else {
            return Ok(());
        };
        pair.buy_price = *ask;
        pair.sell_price = *bid;
        pair.price_change_percent = *price_change_percent;
        pair.price_timestamp = *timestamp;
        self.swaps.save_swap_pair(&pair).await?;
        Ok(())
    }
}
