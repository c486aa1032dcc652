//! Order watchdog: waits for a placed order to execute.
//!
//! Two cooperating tasks share one order:
//!
//! ```text
//!   monitor task                              driver (caller task)
//!   ────────────                              ────────────────────
//!   check cancel conditions
//!   send Intent::Status / Intent::Cancel ──►  receive intent
//!                                             Status: query exchange, update mirror,
//!                                                     extend deadline on progress
//!                                             Cancel: cancel on the exchange
//!   wait for ack                         ◄──  Ack::Continue(state) / Ack::Stop
//!   sleep poll interval, repeat
//! ```
//!
//! Both channels have capacity one and the monitor never sends a new intent
//! before it received the ack for the previous one, so the monitor always
//! decides on the state the driver last observed. Only the driver talks to
//! the exchange about the order.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tb_core::config::EngineConfig;
use tb_core::enums::Side;
use tb_core::format::add_percent;
use tb_core::swap::SwapChain;
use tb_core::time_util::{HOUR_MS, now_ms};
use tb_core::trading::{ExchangeOrder, Order, TradeLimit};
use tb_td::Exchange;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::EngineCache;
use crate::error::{EngineError, EngineResult};
use crate::market::MarketData;
use crate::risk::LossSecurity;
use crate::swap::SwapFinder;

/// Why the monitor asked for a cancel.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelReason {
    /// A better swap route exists for the position behind this SELL.
    Swap(Box<SwapChain>),
    Risky,
    /// Queued through [`EngineCache::request_cancel`].
    Requested,
    /// A partially filled BUY already reached its profit target.
    PaperProfit,
    /// The parent position of a partially filled SELL needs an extra charge.
    ExtraCharge,
    Ttl,
    /// Canceled or expired on the exchange without a request from us.
    External,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Swap(chain) => write!(f, "swap {} {:.2}%", chain.swap_type, chain.percent),
            Self::Risky => f.write_str("risky buy"),
            Self::Requested => f.write_str("cancel requested"),
            Self::PaperProfit => f.write_str("profit reached on paper"),
            Self::ExtraCharge => f.write_str("extra charge reached"),
            Self::Ttl => f.write_str("ttl expired"),
            Self::External => f.write_str("ended on the exchange"),
        }
    }
}

/// The driver's view of the order, handed to the monitor with every ack.
#[derive(Debug, Clone)]
pub struct WatchState {
    pub order: ExchangeOrder,
    pub deadline: Instant,
}

enum Intent {
    Status,
    Cancel(CancelReason),
}

enum Ack {
    Continue(WatchState),
    Stop,
}

/// How watching ended.
#[derive(Debug, Clone)]
pub enum WatchOutcome {
    /// Filled, or stopped with a partial fill.
    Executed(ExchangeOrder),
    /// Left the book without any fill.
    Canceled { order: ExchangeOrder, reason: CancelReason },
}

/// What the monitor needs to know about the position behind the order.
#[derive(Debug, Clone)]
pub struct WatchContext {
    pub limit: TradeLimit,
    /// Open BUY closed by a SELL.
    pub parent: Option<Order>,
}

#[derive(Clone)]
pub struct Watchdog {
    exchange: Arc<dyn Exchange>,
    cache: Arc<EngineCache>,
    market: Arc<MarketData>,
    risk: Arc<LossSecurity>,
    finder: Arc<SwapFinder>,
    config: EngineConfig,
}

impl Watchdog {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        cache: Arc<EngineCache>,
        market: Arc<MarketData>,
        risk: Arc<LossSecurity>,
        finder: Arc<SwapFinder>,
        config: EngineConfig,
    ) -> Self {
        Self { exchange, cache, market, risk, finder, config }
    }

    /// Drive `order` until it executes, is canceled, or disappears.
    pub async fn wait_execution(
        &self,
        order: ExchangeOrder,
        ctx: WatchContext,
        ttl: Duration,
    ) -> EngineResult<WatchOutcome> {
        if order.is_filled() {
            return Ok(WatchOutcome::Executed(order));
        }

        let (intent_tx, mut intent_rx) = mpsc::channel::<Intent>(1);
        let (ack_tx, ack_rx) = mpsc::channel::<Ack>(1);
        let mut state = WatchState { order, deadline: Instant::now() + ttl };
        info!(
            "[watchdog] {} {} {} @ {} watched for {}s",
            state.order.symbol,
            state.order.side,
            state.order.order_id,
            state.order.price,
            ttl.as_secs()
        );

        let monitor = Monitor { watchdog: self.clone(), ctx };
        tokio::spawn(monitor.run(intent_tx, ack_rx, state.clone()));

        loop {
            let Some(intent) = intent_rx.recv().await else {
                return Err(EngineError::Shutdown);
            };
            match intent {
                Intent::Cancel(reason) => {
                    let _ = ack_tx.send(Ack::Stop).await;
                    return self.cancel(state.order, reason).await;
                }
                Intent::Status => {
                    let queried =
                        self.exchange.query_order(&state.order.symbol, state.order.order_id).await;
                    match queried {
                        Ok(fresh) => {
                            self.cache.set_pending_exchange_order(&fresh);
                            if fresh.executed_qty > state.order.executed_qty {
                                state.deadline += self.config.ttl_extension();
                                info!(
                                    "[watchdog] {} {} executed {} / {}, deadline extended",
                                    fresh.symbol, fresh.order_id, fresh.executed_qty, fresh.orig_qty
                                );
                            }
                            state.order = fresh;
                            if state.order.status.is_terminal() {
                                let _ = ack_tx.send(Ack::Stop).await;
                                return Ok(terminal_outcome(state.order));
                            }
                            if ack_tx.send(Ack::Continue(state.clone())).await.is_err() {
                                return Err(EngineError::Shutdown);
                            }
                        }
                        Err(e) if tb_core::error::is_unknown_order(&e) => {
                            let _ = ack_tx.send(Ack::Stop).await;
                            let (symbol, id) = (&state.order.symbol, state.order.order_id);
                            self.cache.delete_pending_exchange_order(symbol, state.order.side);
                            warn!("[watchdog] {symbol} {id} no longer exists");
                            return Err(EngineError::OrderCanceled {
                                symbol: state.order.symbol.clone(),
                                order_id: state.order.order_id,
                                reason: "unknown order".into(),
                            });
                        }
                        Err(e) => {
                            warn!(
                                "[watchdog] {} {} query failed: {e:#}",
                                state.order.symbol, state.order.order_id
                            );
                            tokio::time::sleep(self.config.transient_backoff()).await;
                            if ack_tx.send(Ack::Continue(state.clone())).await.is_err() {
                                return Err(EngineError::Shutdown);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Cancel on the exchange. A fill that races the cancel wins.
    async fn cancel(
        &self,
        order: ExchangeOrder,
        reason: CancelReason,
    ) -> EngineResult<WatchOutcome> {
        info!(
            "[watchdog] {} {} {} canceling: {reason}",
            order.symbol, order.side, order.order_id
        );
        let last = match self.exchange.cancel_order(&order.symbol, order.order_id).await {
            Ok(canceled) => canceled,
            Err(e) => {
                warn!(
                    "[watchdog] {} {} cancel failed: {e:#}, re-checking",
                    order.symbol, order.order_id
                );
                self.exchange.query_order(&order.symbol, order.order_id).await?
            }
        };
        self.cache.set_pending_exchange_order(&last);

        if reason == CancelReason::Risky {
            self.cache.set_buy_lock(&last.symbol);
        }
        if last.is_filled() || last.executed_qty > 0.0 {
            info!(
                "[watchdog] {} {} kept executed {}",
                last.symbol, last.order_id, last.executed_qty
            );
            return Ok(WatchOutcome::Executed(last));
        }
        Ok(WatchOutcome::Canceled { order: last, reason })
    }
}

fn terminal_outcome(order: ExchangeOrder) -> WatchOutcome {
    if order.is_filled() || order.executed_qty > 0.0 {
        WatchOutcome::Executed(order)
    } else {
        info!(
            "[watchdog] {} {} ended {} on the exchange",
            order.symbol, order.order_id, order.status
        );
        WatchOutcome::Canceled { order, reason: CancelReason::External }
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

struct Monitor {
    watchdog: Watchdog,
    ctx: WatchContext,
}

impl Monitor {
    async fn run(
        self,
        intents: mpsc::Sender<Intent>,
        mut acks: mpsc::Receiver<Ack>,
        mut state: WatchState,
    ) {
        loop {
            let intent = match self.cancel_reason(&state).await {
                Some(reason) => Intent::Cancel(reason),
                None => Intent::Status,
            };
            if intents.send(intent).await.is_err() {
                return;
            }
            match acks.recv().await {
                Some(Ack::Continue(next)) => state = next,
                Some(Ack::Stop) | None => return,
            }
            tokio::time::sleep(self.watchdog.config.watch_poll()).await;
        }
    }

    async fn cancel_reason(&self, state: &WatchState) -> Option<CancelReason> {
        let order = &state.order;
        let wd = &self.watchdog;

        if wd.cache.take_cancel_request(&order.symbol) {
            return Some(CancelReason::Requested);
        }

        let reason = match order.side {
            Side::Buy => self.buy_reason(order).await,
            Side::Sell => self.sell_reason(order).await,
        };
        if reason.is_some() {
            return reason;
        }

        if Instant::now() >= state.deadline {
            let close = self.close(&order.symbol).await?;
            let unfavorable = match order.side {
                Side::Buy => close > order.price,
                Side::Sell => close < order.price,
            };
            if unfavorable {
                return Some(CancelReason::Ttl);
            }
        }
        None
    }

    async fn buy_reason(&self, order: &ExchangeOrder) -> Option<CancelReason> {
        if order.is_new() && self.watchdog.risk.is_risky_buy(order, &self.ctx.limit).await {
            return Some(CancelReason::Risky);
        }
        if order.is_partially_filled() {
            let close = self.close(&order.symbol).await?;
            if close >= add_percent(order.price, self.ctx.limit.min_profit_percent) {
                return Some(CancelReason::PaperProfit);
            }
        }
        None
    }

    async fn sell_reason(&self, order: &ExchangeOrder) -> Option<CancelReason> {
        let parent = self.ctx.parent.as_ref()?;
        let swap = &self.watchdog.config.swap;

        if order.is_new() && swap.enabled {
            if let Some(chain) = self.swap_candidate(parent).await {
                return Some(CancelReason::Swap(Box::new(chain)));
            }
        }
        if order.is_partially_filled() {
            let close = self.close(&order.symbol).await?;
            if self.ctx.limit.is_extra_charge_reached(parent.profit_percent(close)) {
                return Some(CancelReason::ExtraCharge);
            }
        }
        None
    }

    /// A chain worth abandoning the SELL for: turbo percent, or a long-held
    /// losing position with a chain above the minimum.
    async fn swap_candidate(&self, parent: &Order) -> Option<SwapChain> {
        let swap = &self.watchdog.config.swap;
        let finder = &self.watchdog.finder;
        let base_asset = &self.ctx.limit.base_asset;
        let chain = match finder.find_best(base_asset, parent.executed_quantity).await {
            Ok(chain) => chain?,
            Err(e) => {
                debug!("[watchdog] swap search failed: {e}");
                return None;
            }
        };
        if chain.percent >= swap.turbo_percent {
            return Some(chain);
        }
        if chain.percent < swap.min_percent || parent.age_ms(now_ms()) < swap.hold_hours * HOUR_MS {
            return None;
        }
        let close = self.close(&parent.symbol).await?;
        (parent.profit_percent(close) <= swap.loss_percent).then_some(chain)
    }

    async fn close(&self, symbol: &str) -> Option<f64> {
        match self.watchdog.market.last_close(symbol).await {
            Ok(close) => close,
            Err(e) => {
                debug!("[watchdog] {symbol} close unavailable: {e:#}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fill, Harness, candle, exchange_order, fast_engine_config, trade_limit};
    use tb_td::LimitOrderRequest;

    fn watchdog(h: &Harness, config: EngineConfig) -> Watchdog {
        let e = &h.engine;
        Watchdog::new(
            h.exchange.clone(),
            e.cache.clone(),
            e.market.clone(),
            e.risk.clone(),
            e.finder.clone(),
            config,
        )
    }

    fn fast_watchdog(h: &Harness) -> Watchdog {
        watchdog(h, fast_engine_config())
    }

    fn buy_ctx() -> WatchContext {
        WatchContext { limit: trade_limit("ETHUSDT"), parent: None }
    }

    async fn place_buy(h: &Harness, price: f64) -> ExchangeOrder {
        let request = LimitOrderRequest::gtc("ETHUSDT", Side::Buy, 1.0, price);
        h.exchange.place_limit_order(&request).await.unwrap()
    }

    const LONG: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn progress_then_fill_is_executed() {
        let h = Harness::new(fast_engine_config(), None);
        let order = place_buy(&h, 100.0).await;
        h.exchange.script("ETHUSDT", &[Fill::Partial(0.5), Fill::Filled]);

        let outcome = fast_watchdog(&h).wait_execution(order, buy_ctx(), LONG).await.unwrap();
        let WatchOutcome::Executed(done) = outcome else { panic!("expected execution") };
        assert_eq!(done.executed_qty, 1.0);
        assert!(h.exchange.canceled().is_empty());
        assert!(h.engine.cache.pending_exchange_order("ETHUSDT", Side::Buy).unwrap().is_filled());
    }

    #[tokio::test]
    async fn growing_fill_extends_the_deadline() {
        let h = Harness::new(fast_engine_config(), None);
        // above the bid but short of paper profit: unfavorable once expired
        h.exchange.set_klines("ETHUSDT", "1m", vec![candle(100.0, 100.8, 100.2, 100.5)]);
        let order = place_buy(&h, 100.0).await;
        let mut fills = vec![Fill::Partial(0.3); 30];
        fills.push(Fill::Filled);
        h.exchange.script("ETHUSDT", &fills);

        // the first status grows the fill long before the 50ms budget runs out
        let ttl = Duration::from_millis(50);
        let outcome = fast_watchdog(&h).wait_execution(order, buy_ctx(), ttl).await.unwrap();
        let WatchOutcome::Executed(done) = outcome else { panic!("expected execution") };
        assert!(done.is_filled());
        assert!(h.exchange.canceled().is_empty());
    }

    #[tokio::test]
    async fn partial_buy_in_paper_profit_is_canceled() {
        let h = Harness::new(fast_engine_config(), None);
        h.exchange.set_klines("ETHUSDT", "1m", vec![candle(100.5, 101.6, 100.4, 101.5)]);
        let order = place_buy(&h, 100.0).await;
        h.exchange.apply(order.order_id, Fill::Partial(0.5));
        let order = h.exchange.order(order.order_id).unwrap();

        let monitor = Monitor { watchdog: fast_watchdog(&h), ctx: buy_ctx() };
        let state = WatchState { order: order.clone(), deadline: Instant::now() + LONG };
        assert_eq!(monitor.cancel_reason(&state).await, Some(CancelReason::PaperProfit));

        let outcome =
            fast_watchdog(&h).wait_execution(order.clone(), buy_ctx(), LONG).await.unwrap();
        // the bought half is kept, the rest leaves the book
        let WatchOutcome::Executed(done) = outcome else { panic!("expected partial execution") };
        assert!((done.executed_qty - 0.5).abs() < 1e-12);
        assert_eq!(h.exchange.canceled(), vec![order.order_id]);
    }

    #[tokio::test]
    async fn partial_buy_short_of_paper_profit_keeps_waiting() {
        let h = Harness::new(fast_engine_config(), None);
        h.exchange.set_klines("ETHUSDT", "1m", vec![candle(100.5, 100.9, 100.4, 100.5)]);
        let order = place_buy(&h, 100.0).await;
        h.exchange.apply(order.order_id, Fill::Partial(0.5));
        let order = h.exchange.order(order.order_id).unwrap();

        let monitor = Monitor { watchdog: fast_watchdog(&h), ctx: buy_ctx() };
        let state = WatchState { order, deadline: Instant::now() + LONG };
        assert_eq!(monitor.cancel_reason(&state).await, None);
    }

    #[tokio::test]
    async fn queued_cancel_request_is_honored() {
        let h = Harness::new(fast_engine_config(), None);
        let order = place_buy(&h, 100.0).await;
        h.engine.cache.request_cancel("ETHUSDT");

        let outcome =
            fast_watchdog(&h).wait_execution(order.clone(), buy_ctx(), LONG).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Canceled { reason: CancelReason::Requested, .. }));
        assert_eq!(h.exchange.canceled(), vec![order.order_id]);
    }

    #[tokio::test]
    async fn risky_buy_is_pulled_and_locks_buys() {
        let config = EngineConfig { ml_enabled: true, ..fast_engine_config() };
        let h = Harness::new(config.clone(), Some(90.0));
        let order = place_buy(&h, 95.0).await;

        let outcome = watchdog(&h, config).wait_execution(order, buy_ctx(), LONG).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Canceled { reason: CancelReason::Risky, .. }));
        assert!(h.engine.cache.is_buy_locked("ETHUSDT"));
    }

    #[tokio::test]
    async fn fill_racing_the_cancel_wins() {
        let h = Harness::new(fast_engine_config(), None);
        let order = place_buy(&h, 100.0).await;
        h.exchange.apply(order.order_id, Fill::Filled);
        h.engine.cache.request_cancel("ETHUSDT");

        let outcome = fast_watchdog(&h).wait_execution(order, buy_ctx(), LONG).await.unwrap();
        let WatchOutcome::Executed(done) = outcome else { panic!("expected execution") };
        assert!(done.is_filled());
        assert!(h.exchange.canceled().is_empty());
    }

    #[tokio::test]
    async fn expired_buy_below_market_is_canceled() {
        let h = Harness::new(fast_engine_config(), None);
        h.exchange.set_klines("ETHUSDT", "1m", vec![candle(100.0, 101.5, 100.5, 101.0)]);
        let order = place_buy(&h, 100.0).await;

        let outcome =
            fast_watchdog(&h).wait_execution(order, buy_ctx(), Duration::ZERO).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Canceled { reason: CancelReason::Ttl, .. }));
    }

    #[tokio::test]
    async fn expired_buy_still_favorable_keeps_waiting() {
        let h = Harness::new(fast_engine_config(), None);
        h.exchange.set_klines("ETHUSDT", "1m", vec![candle(99.5, 99.8, 99.2, 99.6)]);
        let order = place_buy(&h, 100.0).await;
        h.exchange.script("ETHUSDT", &[Fill::New, Fill::New, Fill::Filled]);

        let outcome =
            fast_watchdog(&h).wait_execution(order, buy_ctx(), Duration::ZERO).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Executed(_)));
        assert!(h.exchange.canceled().is_empty());
    }

    #[tokio::test]
    async fn transient_query_errors_are_retried() {
        let h = Harness::new(fast_engine_config(), None);
        let order = place_buy(&h, 100.0).await;
        h.exchange.fail_queries(2);
        h.exchange.script("ETHUSDT", &[Fill::Filled]);

        let outcome = fast_watchdog(&h).wait_execution(order, buy_ctx(), LONG).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Executed(_)));
    }

    #[tokio::test]
    async fn order_canceled_elsewhere_is_reported() {
        let h = Harness::new(fast_engine_config(), None);
        let order = place_buy(&h, 100.0).await;
        h.exchange.script("ETHUSDT", &[Fill::Canceled]);

        let outcome = fast_watchdog(&h).wait_execution(order, buy_ctx(), LONG).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Canceled { reason: CancelReason::External, .. }));
        assert!(h.exchange.canceled().is_empty());
    }

    #[tokio::test]
    async fn vanished_order_stops_watching() {
        let h = Harness::new(fast_engine_config(), None);
        let ghost = exchange_order("ETHUSDT", Side::Buy, 100.0, 1.0);

        let err = fast_watchdog(&h).wait_execution(ghost, buy_ctx(), LONG).await.unwrap_err();
        assert!(matches!(err, EngineError::OrderCanceled { .. }));
        assert!(h.engine.cache.pending_exchange_order("ETHUSDT", Side::Buy).is_none());
    }

    #[tokio::test]
    async fn partial_sell_yields_to_extra_charge() {
        let h = Harness::new(fast_engine_config(), None);
        h.exchange.set_klines("ETHUSDT", "1m", vec![candle(95.0, 96.0, 94.0, 95.0)]);
        let mut parent = Order::opened("ETHUSDT", Side::Buy, 1.0, 100.0, now_ms());
        parent.executed_quantity = 1.0;
        let request = LimitOrderRequest::gtc("ETHUSDT", Side::Sell, 1.0, 101.0);
        let order = h.exchange.place_limit_order(&request).await.unwrap();
        h.exchange.apply(order.order_id, Fill::Partial(0.4));
        let order = h.exchange.order(order.order_id).unwrap();

        let ctx = WatchContext { limit: trade_limit("ETHUSDT"), parent: Some(parent) };
        let outcome = fast_watchdog(&h).wait_execution(order, ctx, LONG).await.unwrap();
        // the executed part is kept
        let WatchOutcome::Executed(done) = outcome else { panic!("expected partial execution") };
        assert!((done.executed_qty - 0.4).abs() < 1e-12);
        assert_eq!(done.status, tb_core::enums::ExchangeOrderStatus::Canceled);
    }
}
