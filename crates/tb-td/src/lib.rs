//! # tb-td
//!
//! Exchange access for the trading engine.
//!
//! Each exchange implements the [`Exchange`] trait, which provides a uniform
//! interface for limit-order placement, order queries, cancellation and the
//! market data the engine prices from (depth, candles, tickers, balances).
//!
//! ## Supported exchanges
//!
//! | Exchange | Module    | Accounts | Order channel |
//! |----------|-----------|----------|---------------|
//! | Binance  | `binance` | Spot     | REST          |
//!
//! ## Errors
//!
//! Implementations return `anyhow::Error` wrapping a
//! [`TbError`](tb_core::error::TbError): `Exchange { code, msg }` for an
//! authoritative rejection, `Transport` for network failures that may be
//! retried. Callers tell them apart with `downcast_ref`.

pub mod binance;

use anyhow::Result;
use async_trait::async_trait;
use tb_core::enums::{Side, TimeInForce};
use tb_core::market_data::{Candle, OrderBook, SymbolInfo, Ticker};
use tb_core::trading::{AssetBalance, ExchangeOrder};

/// A limit order to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub time_in_force: TimeInForce,
}

impl LimitOrderRequest {
    /// A good-till-cancel limit order.
    pub fn gtc(symbol: &str, side: Side, quantity: f64, price: f64) -> Self {
        Self { symbol: symbol.to_string(), side, quantity, price, time_in_force: TimeInForce::Gtc }
    }
}

/// Commission charged for the fills of one order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Commission {
    pub amount: f64,
    pub asset: Option<String>,
}

/// Trait implemented by all exchange clients.
///
/// All methods take `&self` so one client can be shared (`Arc<dyn Exchange>`)
/// across every order and swap task.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Submit a limit order. The returned snapshot carries the exchange
    /// order id and any immediate fills.
    async fn place_limit_order(&self, request: &LimitOrderRequest) -> Result<ExchangeOrder>;

    /// Current state of an order.
    async fn query_order(&self, symbol: &str, order_id: u64) -> Result<ExchangeOrder>;

    /// Cancel an order. Returns the final snapshot reported by the exchange.
    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<ExchangeOrder>;

    /// Total commission of every trade that filled an order. Order queries
    /// do not carry it.
    async fn order_commission(&self, symbol: &str, order_id: u64) -> Result<Commission>;

    /// All open orders, optionally filtered by symbol.
    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<ExchangeOrder>>;

    /// Order book snapshot with up to `limit` levels per side.
    async fn depth(&self, symbol: &str, limit: u32) -> Result<OrderBook>;

    /// The most recent `limit` candles of `interval`, oldest first.
    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>>;

    /// Non-zero account balances.
    async fn balances(&self) -> Result<Vec<AssetBalance>>;

    /// 24h tickers for every symbol.
    async fn tickers(&self) -> Result<Vec<Ticker>>;

    /// Trading rules of every symbol currently open for trading.
    async fn symbols(&self) -> Result<Vec<SymbolInfo>>;
}
