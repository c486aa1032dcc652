//! Buy and sell price calculation.
//!
//! ```text
//! CalculateBuy
//!   open position past extra charge? ── yes ──► period min low (or close if >24h old)
//!          │ no                                    │
//!          ▼                                       │
//!   frame(avg_high) + best bid under it            │
//!   (fallback: highest tick under avg_high)        │
//!          ▼                                       │
//!   history check: ≥ ratio of window reaches       │
//!   the profit target from this price              │
//!          ▼                                       ▼
//!   risk correction ─────────────────────────► floor to tick
//! ```
//!
//! `calculate_sell` only ever raises its starting point (average ask) to the
//! best of the position's minimum close, the long frame's average high and
//! the current close.

use std::sync::Arc;

use tb_core::enums::Side;
use tb_core::format::{add_percent, ceil_to_tick, floor_to_tick, round_to, tick_precision};
use tb_core::market_data::Frame;
use tb_core::time_util::{HOUR_MS, now_ms};
use tb_core::trading::{Order, TradeLimit};
use tracing::{debug, info};

use crate::cache::EngineCache;
use crate::error::{EngineError, EngineResult};
use crate::market::MarketData;
use crate::ports::OrderRepository;
use crate::risk::LossSecurity;

/// Candle interval of the sell floor frame.
const SELL_FRAME_INTERVAL: &str = "2h";
const SELL_FRAME_PERIOD: u32 = 8;
/// Shorter sell frame once a position has been held this long.
const SELL_FRAME_PERIOD_AGED: u32 = 4;
const AGED_POSITION_MS: u64 = 48 * HOUR_MS;
/// Past this age an extra charge buys at the last close instead of the period low.
const EXTRA_CHARGE_CLOSE_AGE_MS: u64 = 24 * HOUR_MS;

pub struct PriceCalculator {
    market: Arc<MarketData>,
    risk: Arc<LossSecurity>,
    cache: Arc<EngineCache>,
    orders: Arc<dyn OrderRepository>,
    history_hit_ratio: f64,
}

impl PriceCalculator {
    pub fn new(
        market: Arc<MarketData>,
        risk: Arc<LossSecurity>,
        cache: Arc<EngineCache>,
        orders: Arc<dyn OrderRepository>,
        history_hit_ratio: f64,
    ) -> Self {
        Self { market, risk, cache, orders, history_hit_ratio }
    }

    pub async fn calculate_buy(&self, limit: &TradeLimit) -> EngineResult<f64> {
        let symbol = &limit.symbol;

        if let Some(opened) = self.cache.load_opened_order(self.orders.as_ref(), symbol).await? {
            if opened.side == Side::Buy && opened.executed_quantity > 0.0 {
                let close = self.last_close(symbol).await?;
                if limit.is_extra_charge_reached(opened.profit_percent(close)) {
                    return self.extra_charge_price(limit, &opened, close).await;
                }
            }
        }

        let candles = self.market.klines(symbol, &limit.frame_interval, limit.frame_period).await?;
        let frame = Frame::from_candles(&candles)
            .ok_or_else(|| EngineError::FrameNotFound(symbol.clone()))?;
        let close = self.last_close(symbol).await?;

        let bids = match self.market.depth(symbol).await {
            Ok(book) => book.bids,
            Err(e) => {
                debug!("[price] {symbol} depth unavailable: {e:#}");
                Vec::new()
            }
        };
        let mp = limit.min_profit_percent;
        let price = bids
            .iter()
            .map(|level| level.price)
            .find(|bid| *bid > 0.0 && add_percent(*bid, mp) < frame.avg_high)
            .unwrap_or_else(|| highest_price_under(close, frame.avg_high, mp, limit.min_price));

        let price = self.check_buy_price_on_history(price, limit).await;
        let price = self.risk.buy_price_correction(price, limit).await;
        let price = floor_to_tick(price, limit.min_price);
        if price <= 0.0 {
            return Err(EngineError::PriceUnknown(symbol.clone()));
        }
        debug!("[price] {symbol} buy {price} (close {close}, avg high {:.8})", frame.avg_high);
        Ok(price)
    }

    async fn extra_charge_price(
        &self,
        limit: &TradeLimit,
        opened: &Order,
        close: f64,
    ) -> EngineResult<f64> {
        let symbol = &limit.symbol;
        let base = if opened.age_ms(now_ms()) > EXTRA_CHARGE_CLOSE_AGE_MS {
            close
        } else {
            self.market
                .period_min_low(symbol, limit.min_price_minutes_period)
                .await?
                .unwrap_or(close)
        };
        let price = self.risk.buy_price_correction(base.min(close), limit).await;
        let price = floor_to_tick(price, limit.min_price);
        info!(
            "[price] {symbol} extra charge price {price} (opened at {}, close {close})",
            opened.price
        );
        Ok(price)
    }

    /// Lower `price` until at least `history_hit_ratio` of the history window
    /// had a high reaching the profit target from it.
    pub async fn check_buy_price_on_history(&self, price: f64, limit: &TradeLimit) -> f64 {
        let window = self
            .market
            .klines(
                &limit.symbol,
                &limit.buy_price_history_check_interval,
                limit.buy_price_history_check_period,
            )
            .await;
        let candles = match window {
            Ok(candles) => candles,
            Err(e) => {
                debug!("[price] {} history window unavailable: {e:#}", limit.symbol);
                return price;
            }
        };
        let mut highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        if highs.is_empty() {
            return price;
        }
        highs.sort_by(|a, b| b.total_cmp(a));

        let total = highs.len() as f64;
        let needed = ((self.history_hit_ratio * total) - 1e-9).ceil().clamp(1.0, total) as usize;
        let reference_high = highs[needed - 1];
        let mp = limit.min_profit_percent;
        let tick = limit.min_price;

        let mut checked = price.min(floor_to_tick(reference_high / (1.0 + mp / 100.0), tick));
        // absorb rounding on the tick boundary
        while checked > tick && add_percent(checked, mp) > reference_high * (1.0 + 1e-12) {
            checked = round_to(checked - tick, tick_precision(tick));
        }
        if checked < price {
            debug!("[price] {} history check lowered buy {price} -> {checked}", limit.symbol);
        }
        checked
    }

    /// Price for closing `order`, `0.0` when the market price is unknown.
    pub async fn calculate_sell(&self, limit: &TradeLimit, order: &Order) -> f64 {
        let symbol = &limit.symbol;
        let close = match self.market.last_close(symbol).await {
            Ok(Some(close)) => close,
            Ok(None) => return 0.0,
            Err(e) => {
                debug!("[price] {symbol} close unavailable: {e:#}");
                return 0.0;
            }
        };

        let mut price = match self.market.depth(symbol).await {
            Ok(book) => book.avg_ask().unwrap_or(0.0),
            Err(e) => {
                debug!("[price] {symbol} depth unavailable: {e:#}");
                0.0
            }
        };
        price = price.max(order.min_close_price(limit.min_profit_percent));

        let period = if order.age_ms(now_ms()) >= AGED_POSITION_MS {
            SELL_FRAME_PERIOD_AGED
        } else {
            SELL_FRAME_PERIOD
        };
        match self.market.klines(symbol, SELL_FRAME_INTERVAL, period).await {
            Ok(candles) => {
                if let Some(frame) = Frame::from_candles(&candles) {
                    price = price.max(frame.avg_high);
                }
            }
            Err(e) => debug!("[price] {symbol} sell frame unavailable: {e:#}"),
        }

        ceil_to_tick(price.max(close), limit.min_price)
    }

    async fn last_close(&self, symbol: &str) -> EngineResult<f64> {
        self.market
            .last_close(symbol)
            .await?
            .ok_or_else(|| EngineError::PriceUnknown(symbol.to_string()))
    }
}

/// Highest tick-aligned price at or below `close` whose profit target stays
/// strictly under `avg_high`.
fn highest_price_under(close: f64, avg_high: f64, min_profit_percent: f64, tick: f64) -> f64 {
    if add_percent(close, min_profit_percent) < avg_high {
        return close;
    }
    let mut price = floor_to_tick(avg_high / (1.0 + min_profit_percent / 100.0), tick);
    while price > 0.0 && add_percent(price, min_profit_percent) >= avg_high {
        price = round_to(price - tick, tick_precision(tick));
    }
    price
}
