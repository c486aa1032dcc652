//! Test doubles and fixture builders.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use tb_core::cache::CacheKeys;
use tb_core::config::{EngineConfig, SwapConfig};
use tb_core::enums::{ExchangeOrderStatus, Side};
use tb_core::error::TbError;
use tb_core::market_data::{Candle, OrderBook, PriceLevel, SymbolInfo, Ticker};
use tb_core::swap::SwapPair;
use tb_core::trading::{AssetBalance, ExchangeOrder, Order, TradeLimit};
use tb_td::{Commission, Exchange, LimitOrderRequest};

use crate::balance::ExchangeBalances;
use crate::ports::{Notifier, Predictor};
use crate::storage::memory::{MemoryOrderRepository, MemorySwapRepository};
use crate::{Collaborators, Engine};

// ---------------------------------------------------------------------------
// Mock exchange
// ---------------------------------------------------------------------------

/// Status an order moves to on placement or on a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fill {
    New,
    /// Executed share of the original quantity.
    Partial(f64),
    Filled,
    Canceled,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    orders: AHashMap<u64, ExchangeOrder>,
    on_place: AHashMap<String, Fill>,
    on_query: AHashMap<String, VecDeque<Fill>>,
    failing_places: Vec<String>,
    failing_queries: usize,
    place_delay: Duration,
    placed: Vec<LimitOrderRequest>,
    canceled: Vec<u64>,
    in_flight: AHashMap<String, usize>,
    peak_in_flight: AHashMap<String, usize>,
    depth: AHashMap<String, OrderBook>,
    depth_calls: usize,
    klines: AHashMap<(String, String), Vec<Candle>>,
    balances: AHashMap<String, f64>,
    commission_rate: f64,
    tickers: Vec<Ticker>,
    symbols: Vec<SymbolInfo>,
}

/// In-memory exchange. Orders stay NEW unless a fill is scripted.
pub struct MockExchange {
    state: Mutex<MockState>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self { state: Mutex::new(MockState { next_id: 1000, ..Default::default() }) }
    }

    pub fn set_depth(&self, book: OrderBook) {
        self.state.lock().depth.insert(book.symbol.clone(), book);
    }

    pub fn depth_calls(&self) -> usize {
        self.state.lock().depth_calls
    }

    pub fn set_klines(&self, symbol: &str, interval: &str, candles: Vec<Candle>) {
        self.state.lock().klines.insert((symbol.to_string(), interval.to_string()), candles);
    }

    pub fn set_balance(&self, asset: &str, free: f64) {
        self.state.lock().balances.insert(asset.to_string(), free);
    }

    /// Commission per executed unit, charged in BNB by the trade history.
    pub fn set_commission_rate(&self, rate: f64) {
        self.state.lock().commission_rate = rate;
    }

    pub fn set_tickers(&self, tickers: Vec<Ticker>) {
        self.state.lock().tickers = tickers;
    }

    pub fn set_symbols(&self, symbols: Vec<SymbolInfo>) {
        self.state.lock().symbols = symbols;
    }

    /// Status every new order on `symbol` gets right after placement.
    pub fn fill_on_place(&self, symbol: &str, fill: Fill) {
        self.state.lock().on_place.insert(symbol.to_string(), fill);
    }

    /// Statuses applied by successive queries of orders on `symbol`.
    pub fn script(&self, symbol: &str, fills: &[Fill]) {
        let mut state = self.state.lock();
        state.on_query.entry(symbol.to_string()).or_default().extend(fills.iter().copied());
    }

    pub fn fail_placement(&self, symbol: &str) {
        self.state.lock().failing_places.push(symbol.to_string());
    }

    /// The next `n` queries fail with a transport error.
    pub fn fail_queries(&self, n: usize) {
        self.state.lock().failing_queries = n;
    }

    pub fn set_place_delay(&self, delay: Duration) {
        self.state.lock().place_delay = delay;
    }

    /// Seed an order that already lives on the exchange.
    pub fn add_order(&self, order: ExchangeOrder) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(order.order_id + 1);
        state.orders.insert(order.order_id, order);
    }

    /// Change the status of an existing order.
    pub fn apply(&self, order_id: u64, fill: Fill) {
        if let Some(order) = self.state.lock().orders.get_mut(&order_id) {
            apply_fill(order, fill);
        }
    }

    pub fn order(&self, order_id: u64) -> Option<ExchangeOrder> {
        self.state.lock().orders.get(&order_id).cloned()
    }

    pub fn placed(&self) -> Vec<LimitOrderRequest> {
        self.state.lock().placed.clone()
    }

    pub fn placed_on(&self, symbol: &str) -> usize {
        self.state.lock().placed.iter().filter(|r| r.symbol == symbol).count()
    }

    pub fn canceled(&self) -> Vec<u64> {
        self.state.lock().canceled.clone()
    }

    /// Highest number of concurrent placements seen on `symbol`.
    pub fn peak_in_flight(&self, symbol: &str) -> usize {
        self.state.lock().peak_in_flight.get(symbol).copied().unwrap_or(0)
    }
}

fn apply_fill(order: &mut ExchangeOrder, fill: Fill) {
    match fill {
        Fill::New => order.status = ExchangeOrderStatus::New,
        Fill::Partial(ratio) => {
            order.status = ExchangeOrderStatus::PartiallyFilled;
            order.executed_qty = order.orig_qty * ratio;
        }
        Fill::Filled => {
            order.status = ExchangeOrderStatus::Filled;
            order.executed_qty = order.orig_qty;
        }
        Fill::Canceled => order.status = ExchangeOrderStatus::Canceled,
    }
}

fn unknown_order() -> anyhow::Error {
    TbError::Exchange { code: -2013, msg: "Order does not exist.".into() }.into()
}

#[async_trait]
impl Exchange for MockExchange {
    async fn place_limit_order(&self, request: &LimitOrderRequest) -> Result<ExchangeOrder> {
        let delay = {
            let mut state = self.state.lock();
            if state.failing_places.contains(&request.symbol) {
                let msg = "Account has insufficient balance.".to_string();
                return Err(TbError::Exchange { code: -2010, msg }.into());
            }
            let in_flight = state.in_flight.entry(request.symbol.clone()).or_default();
            *in_flight += 1;
            let now = *in_flight;
            let peak = state.peak_in_flight.entry(request.symbol.clone()).or_default();
            *peak = (*peak).max(now);
            state.place_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(in_flight) = state.in_flight.get_mut(&request.symbol) {
            *in_flight -= 1;
        }
        state.next_id += 1;
        let mut order = ExchangeOrder {
            order_id: state.next_id,
            client_order_id: format!("mock-{}", state.next_id),
            symbol: request.symbol.clone(),
            side: request.side,
            status: ExchangeOrderStatus::New,
            price: request.price,
            orig_qty: request.quantity,
            executed_qty: 0.0,
            commission: 0.0,
            commission_asset: None,
            transact_time: tb_core::time_util::now_ms(),
        };
        if let Some(fill) = state.on_place.get(&request.symbol).copied() {
            apply_fill(&mut order, fill);
        }
        state.placed.push(request.clone());
        state.orders.insert(order.order_id, order.clone());
        Ok(order)
    }

    async fn query_order(&self, symbol: &str, order_id: u64) -> Result<ExchangeOrder> {
        let mut state = self.state.lock();
        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            return Err(TbError::Transport("connection reset".into()).into());
        }
        let fill = state.on_query.get_mut(symbol).and_then(VecDeque::pop_front);
        let order = state
            .orders
            .get_mut(&order_id)
            .filter(|o| o.symbol == symbol)
            .ok_or_else(unknown_order)?;
        if let Some(fill) = fill {
            apply_fill(order, fill);
        }
        Ok(order.clone())
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<ExchangeOrder> {
        let mut state = self.state.lock();
        let order = state
            .orders
            .get_mut(&order_id)
            .filter(|o| o.symbol == symbol)
            .ok_or_else(unknown_order)?;
        if !order.is_open() {
            return Err(TbError::Exchange { code: -2011, msg: "Unknown order sent.".into() }.into());
        }
        order.status = ExchangeOrderStatus::Canceled;
        let order = order.clone();
        state.canceled.push(order_id);
        Ok(order)
    }

    async fn order_commission(&self, symbol: &str, order_id: u64) -> Result<Commission> {
        let state = self.state.lock();
        let order =
            state.orders.get(&order_id).filter(|o| o.symbol == symbol).ok_or_else(unknown_order)?;
        if state.commission_rate == 0.0 {
            return Ok(Commission::default());
        }
        let amount = order.executed_qty * state.commission_rate;
        Ok(Commission { amount, asset: Some("BNB".into()) })
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<ExchangeOrder>> {
        let state = self.state.lock();
        let mut open: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.is_open() && symbol.is_none_or(|s| o.symbol == s))
            .cloned()
            .collect();
        open.sort_by_key(|o| o.order_id);
        Ok(open)
    }

    async fn depth(&self, symbol: &str, _limit: u32) -> Result<OrderBook> {
        let mut state = self.state.lock();
        state.depth_calls += 1;
        state.depth.get(symbol).cloned().ok_or_else(|| anyhow!("no depth for {symbol}"))
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let state = self.state.lock();
        let key = (symbol.to_string(), interval.to_string());
        let candles = state.klines.get(&key).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(limit as usize);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn balances(&self) -> Result<Vec<AssetBalance>> {
        let state = self.state.lock();
        Ok(state
            .balances
            .iter()
            .map(|(asset, free)| AssetBalance { asset: asset.clone(), free: *free, locked: 0.0 })
            .collect())
    }

    async fn tickers(&self) -> Result<Vec<Ticker>> {
        Ok(self.state.lock().tickers.clone())
    }

    async fn symbols(&self) -> Result<Vec<SymbolInfo>> {
        Ok(self.state.lock().symbols.clone())
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Predictor returning a fixed price, or failing when `None`.
pub struct FixedPredictor(pub Option<f64>);

#[async_trait]
impl Predictor for FixedPredictor {
    async fn predict(&self, symbol: &str) -> Result<f64> {
        self.0.ok_or_else(|| anyhow!("no prediction for {symbol}"))
    }
}

/// Notifier that remembers every call as a short string.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn buy_order(&self, order: &Order, _bot_id: &str, _details: &str) -> Result<()> {
        self.events.lock().push(format!("buy {}", order.symbol));
        Ok(())
    }

    async fn sell_order(&self, order: &Order, _bot_id: &str, _details: &str) -> Result<()> {
        self.events.lock().push(format!("sell {}", order.symbol));
        Ok(())
    }

    async fn error(&self, _bot_id: &str, code: i32, _message: &str, _fatal: bool) -> Result<()> {
        self.events.lock().push(format!("error {code}"));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        symbol: String::new(),
        interval: String::new(),
        open_time: 0,
        close_time: 0,
        open,
        high,
        low,
        close,
        volume: 1.0,
    }
}

pub fn book(symbol: &str, bids: &[f64], asks: &[f64]) -> OrderBook {
    let levels =
        |prices: &[f64]| prices.iter().map(|p| PriceLevel { price: *p, quantity: 1.0 }).collect();
    OrderBook { symbol: symbol.to_string(), bids: levels(bids), asks: levels(asks), update_id: 1 }
}

/// `XXXUSDT` limit with a 0.01 tick, 0.0001 step and 1% profit target.
pub fn trade_limit(symbol: &str) -> TradeLimit {
    TradeLimit {
        symbol: symbol.to_string(),
        base_asset: symbol.trim_end_matches("USDT").to_string(),
        quote_asset: "USDT".into(),
        usdt_limit: 100.0,
        min_price: 0.01,
        min_quantity: 0.0001,
        min_notional: 5.0,
        min_profit_percent: 1.0,
        min_price_minutes_period: 200,
        frame_interval: "2h".into(),
        frame_period: 20,
        buy_price_history_check_interval: "1d".into(),
        buy_price_history_check_period: 14,
        extra_charge_percent: -3.0,
        usdt_extra_budget: 50.0,
        is_enabled: true,
    }
}

pub fn exchange_order(symbol: &str, side: Side, price: f64, quantity: f64) -> ExchangeOrder {
    ExchangeOrder {
        order_id: 1,
        client_order_id: "test".into(),
        symbol: symbol.to_string(),
        side,
        status: ExchangeOrderStatus::New,
        price,
        orig_qty: quantity,
        executed_qty: 0.0,
        commission: 0.0,
        commission_asset: None,
        transact_time: tb_core::time_util::now_ms(),
    }
}

/// Pair with fresh prices at `now_ms`.
pub fn pair(symbol: &str, base: &str, quote: &str, buy: f64, sell: f64, now_ms: u64) -> SwapPair {
    SwapPair {
        symbol: symbol.to_string(),
        base_asset: base.to_string(),
        quote_asset: quote.to_string(),
        buy_price: buy,
        sell_price: sell,
        min_price: 0.00000001,
        min_quantity: 0.00000001,
        min_notional: 0.0,
        price_change_percent: -1.0,
        price_timestamp: now_ms,
    }
}

// ---------------------------------------------------------------------------
// Engine harness
// ---------------------------------------------------------------------------

/// Engine config with millisecond polling and no transient backoff.
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        watch_poll_ms: 5,
        transient_backoff_secs: 0,
        swap: SwapConfig { poll_new_ms: 5, poll_partial_ms: 5, ..SwapConfig::default() },
        ..EngineConfig::default()
    }
}

/// A wired [`Engine`] over the mock exchange and in-memory stores.
pub struct Harness {
    pub exchange: Arc<MockExchange>,
    pub orders: Arc<MemoryOrderRepository>,
    pub swaps: Arc<MemorySwapRepository>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Engine,
}

impl Harness {
    /// Must be called inside a Tokio runtime. The account starts with
    /// 1,000,000 USDT.
    pub fn new(config: EngineConfig, prediction: Option<f64>) -> Self {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_balance("USDT", 1_000_000.0);
        let orders = Arc::new(MemoryOrderRepository::new());
        let swaps = Arc::new(MemorySwapRepository::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let balances = Arc::new(ExchangeBalances::new(
            exchange.clone(),
            CacheKeys::new("bot"),
            Duration::from_secs(config.balance_cache_secs),
        ));
        let engine = Engine::new(
            "bot",
            config,
            Collaborators {
                exchange: exchange.clone(),
                orders: orders.clone(),
                swaps: swaps.clone(),
                balances,
                notifier: notifier.clone(),
                predictor: Arc::new(FixedPredictor(prediction)),
            },
        );
        Self { exchange, orders, swaps, notifier, engine }
    }

    /// Let spawned notifications and swaps run.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
