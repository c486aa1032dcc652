//! Trading-related data structures: bot orders, exchange orders, limits.
//!
//! [`Order`] is the bot-owned record of a trade intent; [`ExchangeOrder`] is
//! the short-lived mirror of the remote order the engine polls.

use serde::{Deserialize, Serialize};

use super::enums::{ExchangeOrderStatus, OrderStatus, Side};
use crate::format;

/// Commission assumed per filled leg when the exchange does not report one.
pub const ESTIMATED_COMMISSION_RATE: f64 = 0.0015;

/// Markup over the open price required for a manual sell.
pub const MANUAL_MIN_PROFIT_PERCENT: f64 = 0.1;

// ---------------------------------------------------------------------------
// Order (bot-owned)
// ---------------------------------------------------------------------------

/// A bot-owned trade intent / record.
///
/// A SELL or extra BUY points at the BUY it closes or extends through
/// `closes_order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Storage id, `0` until persisted.
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub executed_quantity: f64,
    pub price: f64,
    pub status: OrderStatus,
    /// Creation time (ms since epoch).
    pub created_at: u64,
    /// Exchange order id, `None` until placed.
    pub external_id: Option<u64>,
    pub closes_order: Option<i64>,
    pub commission: f64,
    pub commission_asset: Option<String>,
    /// Quote amount spent on extra charges (BuyExtra).
    pub used_extra_budget: f64,
    /// Position is being rerouted through a swap chain.
    pub swap: bool,
}

impl Order {
    /// A fresh `opened` order that has not been placed yet.
    pub fn opened(symbol: &str, side: Side, quantity: f64, price: f64, created_at: u64) -> Self {
        Self {
            id: 0,
            symbol: symbol.to_string(),
            side,
            quantity,
            executed_quantity: 0.0,
            price,
            status: OrderStatus::Opened,
            created_at,
            external_id: None,
            closes_order: None,
            commission: 0.0,
            commission_asset: None,
            used_extra_budget: 0.0,
            swap: false,
        }
    }

    pub fn is_opened(&self) -> bool {
        self.status == OrderStatus::Opened
    }

    /// Lowest price this position may be closed at without missing the
    /// profit target.
    pub fn min_close_price(&self, min_profit_percent: f64) -> f64 {
        format::add_percent(self.price, min_profit_percent)
    }

    /// Looser close floor used for manually requested sells.
    pub fn manual_min_close_price(&self) -> f64 {
        format::add_percent(self.price, MANUAL_MIN_PROFIT_PERCENT)
    }

    /// Profit of this position at `current_price`, in percent (2 decimals).
    pub fn profit_percent(&self, current_price: f64) -> f64 {
        format::round_percent(format::percent_change(self.price, current_price))
    }

    /// Milliseconds since the order was created.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }

    /// Quote notional of the executed part.
    pub fn executed_notional(&self) -> f64 {
        self.executed_quantity * self.price
    }
}

// ---------------------------------------------------------------------------
// ExchangeOrder (mirror of the remote order)
// ---------------------------------------------------------------------------

/// Cached representation of an order as the exchange reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    /// Exchange-assigned order id.
    pub order_id: u64,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub status: ExchangeOrderStatus,
    pub price: f64,
    pub orig_qty: f64,
    pub executed_qty: f64,
    /// Commission reported by fills (only present on placement responses).
    pub commission: f64,
    pub commission_asset: Option<String>,
    /// Creation time on the exchange (ms since epoch).
    pub transact_time: u64,
}

impl ExchangeOrder {
    pub fn is_new(&self) -> bool {
        self.status == ExchangeOrderStatus::New
    }

    pub fn is_partially_filled(&self) -> bool {
        self.status == ExchangeOrderStatus::PartiallyFilled
    }

    pub fn is_filled(&self) -> bool {
        self.status == ExchangeOrderStatus::Filled
    }

    /// Still working on the book.
    pub fn is_open(&self) -> bool {
        matches!(self.status, ExchangeOrderStatus::New | ExchangeOrderStatus::PartiallyFilled)
    }

    /// Fraction of the original quantity already executed.
    pub fn fill_ratio(&self) -> f64 {
        if self.orig_qty <= 0.0 {
            return 0.0;
        }
        self.executed_qty / self.orig_qty
    }
}

// ---------------------------------------------------------------------------
// TradeLimit (per-symbol policy)
// ---------------------------------------------------------------------------

/// Per-symbol trading policy.
///
/// Read-mostly; tick fields are refreshed from exchange filters by an
/// external job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLimit {
    pub symbol: String,
    pub base_asset: String,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Budget cap in quote currency for the initial buy.
    pub usdt_limit: f64,
    /// Price tick size.
    pub min_price: f64,
    /// Quantity step size.
    pub min_quantity: f64,
    #[serde(default)]
    pub min_notional: f64,
    pub min_profit_percent: f64,
    /// Minutes of 1m candles scanned for the period minimum on extra charges.
    #[serde(default = "default_min_price_minutes_period")]
    pub min_price_minutes_period: u32,
    #[serde(default = "default_frame_interval")]
    pub frame_interval: String,
    #[serde(default = "default_frame_period")]
    pub frame_period: u32,
    #[serde(default = "default_history_interval")]
    pub buy_price_history_check_interval: String,
    #[serde(default = "default_history_period")]
    pub buy_price_history_check_period: u32,
    /// Profit (negative percent) below which an extra buy is triggered.
    #[serde(default = "default_extra_charge_percent")]
    pub extra_charge_percent: f64,
    /// Quote budget available for extra buys on one position.
    #[serde(default)]
    pub usdt_extra_budget: f64,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

impl TradeLimit {
    /// The position has fallen far enough for an extra charge.
    pub fn is_extra_charge_reached(&self, profit_percent: f64) -> bool {
        profit_percent <= self.extra_charge_percent
    }

    /// Extra budget not yet spent on `order`.
    pub fn remaining_extra_budget(&self, order: &Order) -> f64 {
        (self.usdt_extra_budget - order.used_extra_budget).max(0.0)
    }
}

fn default_quote_asset() -> String {
    "USDT".into()
}

fn default_min_price_minutes_period() -> u32 {
    200
}

fn default_frame_interval() -> String {
    "2h".into()
}

fn default_frame_period() -> u32 {
    20
}

fn default_history_interval() -> String {
    "1d".into()
}

fn default_history_period() -> u32 {
    14
}

fn default_extra_charge_percent() -> f64 {
    -3.0
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

/// Free balance of one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}
