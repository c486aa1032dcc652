//! Swap arbitrage data structures.
//!
//! A swap reroutes a stranded asset through three legs and back to itself:
//!
//! ```text
//! SBS: A --sell A/X--> X --buy Y/X--> Y --sell Y/A--> A
//! SBB: A --sell A/X--> X --buy Y/X--> Y --buy  A/Y--> A
//! SSB: A --sell A/X--> X --sell X/Y--> Y --buy  A/Y--> A
//! ```
//!
//! [`SwapChain`]s are search results; a chosen chain is copied into a durable
//! [`SwapAction`] that records per-leg exchange progress.

use serde::{Deserialize, Serialize};

use super::enums::{ExchangeOrderStatus, Side, SwapActionStatus, SwapType};

// ---------------------------------------------------------------------------
// SwapPair
// ---------------------------------------------------------------------------

/// One tradable `base/quote` pair with its live prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapPair {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Price we can buy the base at (best ask).
    pub buy_price: f64,
    /// Price we can sell the base at (best bid).
    pub sell_price: f64,
    /// Price tick size.
    pub min_price: f64,
    /// Quantity step size.
    pub min_quantity: f64,
    pub min_notional: f64,
    /// 24h price change, negative in a falling market.
    pub price_change_percent: f64,
    /// Last price refresh (ms since epoch).
    pub price_timestamp: u64,
}

impl SwapPair {
    /// The cached price is older than `max_age_ms`.
    pub fn is_price_expired(&self, now_ms: u64, max_age_ms: u64) -> bool {
        now_ms.saturating_sub(self.price_timestamp) > max_age_ms
    }

    /// The pair is currently trending down.
    pub fn is_bear_market(&self) -> bool {
        self.price_change_percent < 0.0
    }

    /// Live price for an operation on the base asset.
    pub fn price_for(&self, operation: Side) -> f64 {
        match operation {
            Side::Buy => self.buy_price,
            Side::Sell => self.sell_price,
        }
    }
}

// ---------------------------------------------------------------------------
// SwapTransition / SwapChain
// ---------------------------------------------------------------------------

/// One leg of a candidate chain. `transitions` holds the next-level
/// candidates explored from this leg (diagnostic search tree).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapTransition {
    pub swap_type: SwapType,
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub operation: Side,
    /// Base-asset quantity traded by this leg.
    pub quantity: f64,
    pub price: f64,
    /// Balance of the received asset after fees.
    pub balance: f64,
    pub level: u8,
    #[serde(default)]
    pub transitions: Vec<SwapTransition>,
}

impl SwapTransition {
    /// Asset given up by this leg.
    pub fn from_asset(&self) -> &str {
        match self.operation {
            Side::Sell => &self.base_asset,
            Side::Buy => &self.quote_asset,
        }
    }

    /// Asset received by this leg.
    pub fn to_asset(&self) -> &str {
        match self.operation {
            Side::Sell => &self.quote_asset,
            Side::Buy => &self.base_asset,
        }
    }

    /// Human-readable description, price-independent so that a rediscovered
    /// route gets the same title.
    pub fn title(&self) -> String {
        format!("{} {} -> {} ({})", self.operation, self.from_asset(), self.to_asset(), self.symbol)
    }

    /// Copy without the nested candidate tree.
    pub fn leaf(&self) -> Self {
        Self { transitions: Vec::new(), ..self.clone() }
    }
}

/// A complete three-leg route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapChain {
    /// Storage id, `0` until persisted.
    pub id: i64,
    pub title: String,
    pub swap_type: SwapType,
    /// MD5 hex of `title`.
    pub hash: String,
    /// Expected profit in percent.
    pub percent: f64,
    /// Best percent ever observed for this route.
    pub max_percent: f64,
    pub swap_one: SwapTransition,
    pub swap_two: SwapTransition,
    pub swap_three: SwapTransition,
    /// Discovery time (ms since epoch).
    pub timestamp: u64,
}

impl SwapChain {
    pub fn legs(&self) -> [&SwapTransition; 3] {
        [&self.swap_one, &self.swap_two, &self.swap_three]
    }

    /// The asset the chain starts from and returns to.
    pub fn root_asset(&self) -> &str {
        self.swap_one.from_asset()
    }
}

// ---------------------------------------------------------------------------
// SwapAction
// ---------------------------------------------------------------------------

/// Exchange progress of one leg inside a [`SwapAction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapLeg {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub operation: Side,
    pub price: f64,
    /// Base quantity submitted for this leg.
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub executed_quantity: f64,
    /// Exchange order id, persisted before the executor waits on it.
    pub external_id: Option<u64>,
    pub external_status: Option<ExchangeOrderStatus>,
    /// Submission time (ms since epoch).
    pub timestamp: Option<u64>,
}

impl SwapLeg {
    pub fn from_transition(t: &SwapTransition) -> Self {
        Self {
            symbol: t.symbol.clone(),
            base_asset: t.base_asset.clone(),
            quote_asset: t.quote_asset.clone(),
            operation: t.operation,
            price: t.price,
            quantity: 0.0,
            executed_quantity: 0.0,
            external_id: None,
            external_status: None,
            timestamp: None,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.external_id.is_some()
    }

    pub fn is_filled(&self) -> bool {
        self.external_status == Some(ExchangeOrderStatus::Filled)
    }

    /// Amount of the target asset received, before fees.
    pub fn proceeds(&self) -> f64 {
        match self.operation {
            Side::Sell => self.executed_quantity * self.price,
            Side::Buy => self.executed_quantity,
        }
    }

    /// Asset spent by this leg.
    pub fn source_asset(&self) -> &str {
        match self.operation {
            Side::Sell => &self.base_asset,
            Side::Buy => &self.quote_asset,
        }
    }

    /// Asset received by this leg.
    pub fn target_asset(&self) -> &str {
        match self.operation {
            Side::Sell => &self.quote_asset,
            Side::Buy => &self.base_asset,
        }
    }
}

/// Durable execution record of one in-flight swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapAction {
    /// Storage id, `0` until persisted.
    pub id: i64,
    pub order_id: i64,
    pub bot_id: String,
    pub swap_chain_id: i64,
    pub swap_type: SwapType,
    /// Asset being converted (the chain root).
    pub asset: String,
    pub status: SwapActionStatus,
    pub start_timestamp: u64,
    pub end_timestamp: Option<u64>,
    pub start_quantity: f64,
    pub end_quantity: Option<f64>,
    pub swap_one: SwapLeg,
    pub swap_two: SwapLeg,
    pub swap_three: SwapLeg,
}

impl SwapAction {
    pub fn leg(&self, level: u8) -> &SwapLeg {
        match level {
            0 => &self.swap_one,
            1 => &self.swap_two,
            _ => &self.swap_three,
        }
    }

    pub fn leg_mut(&mut self, level: u8) -> &mut SwapLeg {
        match level {
            0 => &mut self.swap_one,
            1 => &mut self.swap_two,
            _ => &mut self.swap_three,
        }
    }

    /// Milliseconds since the action started.
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.start_timestamp)
    }
}
