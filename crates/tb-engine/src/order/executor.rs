//! Order execution: BUY, SELL and extra-charge BUY.
//!
//! ```text
//!  guards ──► trade lock ──► find or create order ──► watchdog ──► persist
//!                            │                        │
//!                            ├─ pending mirror        ├─ Executed ─► Order row, notify
//!                            ├─ open order on book    ├─ Canceled ─► OrderCanceled
//!                            └─ new GTC order         └─ Swap     ─► swap action
//! ```
//!
//! An [`Order`] row is only written once the exchange order left the book
//! with a fill. Until then the exchange order lives in the pending mirror of
//! [`EngineCache`], which is how a restarted bot picks up an order it placed
//! before instead of placing a second one.

use std::sync::Arc;

use tb_core::config::EngineConfig;
use tb_core::enums::{OrderStatus, Side};
use tb_core::format::floor_to_tick;
use tb_core::swap::SwapChain;
use tb_core::time_util::now_ms;
use tb_core::trading::{ESTIMATED_COMMISSION_RATE, ExchangeOrder, Order, TradeLimit};
use tb_td::{Commission, Exchange, LimitOrderRequest};
use tracing::{info, warn};

use crate::cache::EngineCache;
use crate::error::{EngineError, EngineResult};
use crate::order::watchdog::{CancelReason, WatchContext, WatchOutcome, Watchdog};
use crate::ports::{BalanceService, Notification, Notifier, OrderRepository, notify};
use crate::swap::{SwapBuilder, SwapDriver, SwapValidator};
use crate::trade_lock::TradeLock;

const INSUFFICIENT_BALANCE_CODE: i32 = 1001;
const EXCHANGE_ERROR_CODE: i32 = 1002;

/// Swap stages a SELL hands a position over to.
pub struct SwapRoute {
    pub validator: Arc<SwapValidator>,
    pub builder: Arc<SwapBuilder>,
    pub driver: Arc<SwapDriver>,
}

pub struct OrderExecutor {
    bot_id: String,
    exchange: Arc<dyn Exchange>,
    orders: Arc<dyn OrderRepository>,
    balances: Arc<dyn BalanceService>,
    notifier: Arc<dyn Notifier>,
    cache: Arc<EngineCache>,
    locks: TradeLock,
    watchdog: Watchdog,
    swap: SwapRoute,
    config: EngineConfig,
}

impl OrderExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bot_id: &str,
        exchange: Arc<dyn Exchange>,
        orders: Arc<dyn OrderRepository>,
        balances: Arc<dyn BalanceService>,
        notifier: Arc<dyn Notifier>,
        cache: Arc<EngineCache>,
        locks: TradeLock,
        watchdog: Watchdog,
        swap: SwapRoute,
        config: EngineConfig,
    ) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            exchange,
            orders,
            balances,
            notifier,
            cache,
            locks,
            watchdog,
            swap,
            config,
        }
    }

    // -----------------------------------------------------------------------
    // BUY
    // -----------------------------------------------------------------------

    /// Open a position on `limit.symbol`. Returns the persisted BUY.
    pub async fn buy(&self, limit: &TradeLimit, price: f64, quantity: f64) -> EngineResult<Order> {
        let result = self.try_buy(limit, price, quantity).await;
        self.report(&result);
        result
    }

    async fn try_buy(&self, limit: &TradeLimit, price: f64, quantity: f64) -> EngineResult<Order> {
        let symbol = &limit.symbol;
        if price <= 0.0 || quantity <= 0.0 {
            return Err(EngineError::Validation(format!(
                "{symbol}: buy price {price} and quantity {quantity} must be positive"
            )));
        }
        if self.cache.is_buy_locked(symbol) {
            return Err(EngineError::BuyLocked(symbol.clone()));
        }
        self.ensure_quote_balance(limit, Side::Buy, price * quantity).await?;

        let _guard = self.locks.acquire(symbol).await?;
        let placed = self.find_or_create_order(symbol, Side::Buy, price, quantity).await?;
        let ctx = WatchContext { limit: limit.clone(), parent: None };
        let outcome = self.watchdog.wait_execution(placed, ctx, self.config.buy_ttl()).await?;
        let executed = self.with_commission(self.settle(outcome)?).await;

        let mut order =
            Order::opened(symbol, Side::Buy, executed.executed_qty, executed.price, now_ms());
        fill_from_exchange(&mut order, &executed);
        let order = self.persist(order).await?;

        self.cache.set_opened_order(&order);
        self.after_trade(limit);
        info!(
            "[order] {symbol} BUY #{} executed {} @ {}",
            order.id, order.executed_quantity, order.price
        );
        let notification = Notification::Buy { order: order.clone(), details: String::new() };
        notify(&self.notifier, &self.bot_id, notification);
        Ok(order)
    }

    // -----------------------------------------------------------------------
    // SELL
    // -----------------------------------------------------------------------

    /// Close (part of) the position `opened`. Returns the persisted SELL.
    ///
    /// A manual SELL takes price and quantity from the cached
    /// [`ManualOrder`](crate::cache::ManualOrder) override of the symbol.
    ///
    /// Fails with [`EngineError::RoutedToSwap`] when the watchdog found a swap
    /// chain worth more than this SELL and the position was handed over.
    pub async fn sell(
        &self,
        limit: &TradeLimit,
        opened: &Order,
        price: f64,
        quantity: f64,
        is_manual: bool,
    ) -> EngineResult<Order> {
        let result = self.try_sell(limit, opened, price, quantity, is_manual).await;
        self.report(&result);
        result
    }

    async fn try_sell(
        &self,
        limit: &TradeLimit,
        opened: &Order,
        price: f64,
        quantity: f64,
        is_manual: bool,
    ) -> EngineResult<Order> {
        let symbol = &limit.symbol;
        let manual = self.cache.manual_order(symbol).filter(|m| is_manual && m.side == Side::Sell);
        let (price, quantity) = match manual {
            Some(manual) => {
                info!(
                    "[order] {symbol} manual SELL override {} @ {}",
                    manual.quantity, manual.price
                );
                (manual.price, manual.quantity)
            }
            None => (price, quantity),
        };
        if price <= opened.price {
            return Err(EngineError::LossSell { price, opened: opened.price });
        }
        let min_close = if is_manual {
            opened.manual_min_close_price()
        } else {
            opened.min_close_price(limit.min_profit_percent)
        };
        if price < min_close {
            return Err(EngineError::BelowMinClose { price, min_close });
        }
        if quantity <= 0.0 {
            return Err(EngineError::Validation(format!(
                "{symbol}: sell quantity {quantity} must be positive"
            )));
        }

        // held until a swap action owns the position, so no other SELL slips in
        let _guard = self.locks.acquire(symbol).await?;
        self.owned_position(opened.id).await?;
        let placed = self.find_or_create_order(symbol, Side::Sell, price, quantity).await?;
        let ctx = WatchContext { limit: limit.clone(), parent: Some(opened.clone()) };
        let outcome = self.watchdog.wait_execution(placed, ctx, self.config.sell_ttl()).await?;

        let executed = match outcome {
            WatchOutcome::Canceled { order, reason: CancelReason::Swap(chain) } => {
                self.cache.delete_pending_exchange_order(symbol, Side::Sell);
                info!("[order] {symbol} SELL {} pulled for swap", order.order_id);
                return self.route_to_swap(&chain, opened).await;
            }
            other => self.settle(other)?,
        };
        let executed = self.with_commission(executed).await;

        let mut sell =
            Order::opened(symbol, Side::Sell, executed.executed_qty, executed.price, now_ms());
        fill_from_exchange(&mut sell, &executed);
        sell.closes_order = Some(opened.id);
        sell.status = OrderStatus::Closed;
        let sell = self.persist(sell).await?;

        self.close_if_sold(limit, opened.id).await?;
        self.after_trade(limit);
        info!(
            "[order] {symbol} SELL #{} executed {} @ {} closing #{}",
            sell.id, sell.executed_quantity, sell.price, opened.id
        );
        let details = format!("profit {:.2}%", opened.profit_percent(sell.price));
        notify(&self.notifier, &self.bot_id, Notification::Sell { order: sell.clone(), details });
        Ok(sell)
    }

    /// Mark the parent closed once what is left after commissions is below
    /// one quantity step.
    async fn close_if_sold(&self, limit: &TradeLimit, parent_id: i64) -> EngineResult<()> {
        let Some(mut parent) = self.orders.find(parent_id).await? else {
            return Err(EngineError::Persistence(format!("order {parent_id} not found")));
        };
        let sells = self.orders.find_sells(parent_id).await?;
        let sold: f64 = sells.iter().map(|s| s.executed_quantity).sum();
        let remaining = parent.executed_quantity * (1.0 - ESTIMATED_COMMISSION_RATE) - sold;
        if remaining < limit.min_quantity {
            parent.status = OrderStatus::Closed;
            self.orders.update(&parent).await?;
            info!("[order] {} position #{parent_id} closed", parent.symbol);
        } else {
            info!("[order] {} position #{parent_id} keeps {remaining}", parent.symbol);
        }
        self.cache.invalidate_opened_order(&parent.symbol);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // BuyExtra
    // -----------------------------------------------------------------------

    /// Spend the remaining extra budget of `opened` at `price` and fold the
    /// fill into the position. Returns the updated position.
    pub async fn buy_extra(
        &self,
        limit: &TradeLimit,
        opened: &Order,
        price: f64,
    ) -> EngineResult<Order> {
        let result = self.try_buy_extra(limit, opened, price).await;
        self.report(&result);
        result
    }

    async fn try_buy_extra(
        &self,
        limit: &TradeLimit,
        opened: &Order,
        price: f64,
    ) -> EngineResult<Order> {
        let symbol = &limit.symbol;
        if price <= 0.0 {
            return Err(EngineError::Validation(format!(
                "{symbol}: extra price {price} must be positive"
            )));
        }
        let profit = opened.profit_percent(price);
        if !limit.is_extra_charge_reached(profit) {
            return Err(EngineError::Validation(format!(
                "{symbol}: profit {profit}% has not reached extra charge {}%",
                limit.extra_charge_percent
            )));
        }
        let budget = limit.remaining_extra_budget(opened);
        let quantity = floor_to_tick(budget / price, limit.min_quantity);
        if quantity <= 0.0 || quantity * price < limit.min_notional {
            return Err(EngineError::Validation(format!(
                "{symbol}: extra budget {budget} is below min notional"
            )));
        }
        if self.cache.is_buy_locked(symbol) {
            return Err(EngineError::BuyLocked(symbol.clone()));
        }
        self.ensure_quote_balance(limit, Side::Buy, quantity * price).await?;

        let _guard = self.locks.acquire(symbol).await?;
        self.owned_position(opened.id).await?;
        let placed = self.find_or_create_order(symbol, Side::Buy, price, quantity).await?;
        let ctx = WatchContext { limit: limit.clone(), parent: None };
        let outcome = self.watchdog.wait_execution(placed, ctx, self.config.buy_ttl()).await?;
        let executed = self.with_commission(self.settle(outcome)?).await;

        let mut extra =
            Order::opened(symbol, Side::Buy, executed.executed_qty, executed.price, now_ms());
        fill_from_exchange(&mut extra, &executed);
        extra.closes_order = Some(opened.id);
        extra.status = OrderStatus::Closed;
        let extra = self.persist(extra).await?;

        let mut parent = self.owned_position(opened.id).await?;
        let total = parent.executed_quantity + extra.executed_quantity;
        parent.price = (parent.executed_notional() + extra.executed_notional()) / total;
        parent.executed_quantity = total;
        parent.quantity += extra.executed_quantity;
        parent.commission += extra.commission;
        parent.used_extra_budget += extra.executed_notional();
        self.orders.update(&parent).await?;

        self.cache.set_opened_order(&parent);
        self.after_trade(limit);
        info!(
            "[order] {symbol} extra charge #{} {} @ {}, position #{} now {} @ {}",
            extra.id,
            extra.executed_quantity,
            extra.price,
            parent.id,
            parent.executed_quantity,
            parent.price
        );
        let notification = Notification::Buy { order: extra, details: "extra charge".into() };
        notify(&self.notifier, &self.bot_id, notification);
        Ok(parent)
    }

    // -----------------------------------------------------------------------
    // Shared steps
    // -----------------------------------------------------------------------

    /// Reuse a live order on the book before placing a new one.
    async fn find_or_create_order(
        &self,
        symbol: &str,
        side: Side,
        price: f64,
        quantity: f64,
    ) -> EngineResult<ExchangeOrder> {
        if let Some(mirrored) = self.cache.pending_exchange_order(symbol, side) {
            match self.exchange.query_order(symbol, mirrored.order_id).await {
                Ok(fresh) if !fresh.status.is_dead() => {
                    info!(
                        "[order] {symbol} {side} reusing order {} ({})",
                        fresh.order_id, fresh.status
                    );
                    self.cache.set_pending_exchange_order(&fresh);
                    return Ok(fresh);
                }
                Ok(_) => self.cache.delete_pending_exchange_order(symbol, side),
                Err(e) if tb_core::error::is_unknown_order(&e) => {
                    self.cache.delete_pending_exchange_order(symbol, side)
                }
                Err(e) => return Err(e.into()),
            }
        }

        let open = self.exchange.open_orders(Some(symbol)).await?;
        if let Some(existing) = open.into_iter().find(|o| o.side == side) {
            info!("[order] {symbol} {side} adopting open order {}", existing.order_id);
            self.cache.set_pending_exchange_order(&existing);
            return Ok(existing);
        }

        let request = LimitOrderRequest::gtc(symbol, side, quantity, price);
        let placed = self.exchange.place_limit_order(&request).await?;
        info!("[order] {symbol} {side} placed {} {quantity} @ {price}", placed.order_id);
        self.cache.set_pending_exchange_order(&placed);
        Ok(placed)
    }

    /// The stored position `id`. A position handed to a swap action belongs
    /// to the swap executor until the action ends.
    async fn owned_position(&self, id: i64) -> EngineResult<Order> {
        let position = self
            .orders
            .find(id)
            .await?
            .ok_or_else(|| EngineError::Persistence(format!("order {id} not found")))?;
        if position.swap {
            return Err(EngineError::SwapInProgress(id));
        }
        Ok(position)
    }

    /// Quote funds are only checked for a fresh placement. A mirrored order
    /// already holds them.
    async fn ensure_quote_balance(
        &self,
        limit: &TradeLimit,
        side: Side,
        required: f64,
    ) -> EngineResult<()> {
        if self.cache.pending_exchange_order(&limit.symbol, side).is_some() {
            return Ok(());
        }
        let available = self.balances.asset_balance(&limit.quote_asset, false).await?;
        if required > available {
            let asset = limit.quote_asset.clone();
            return Err(EngineError::InsufficientBalance { asset, available, required });
        }
        Ok(())
    }

    fn settle(&self, outcome: WatchOutcome) -> EngineResult<ExchangeOrder> {
        match outcome {
            WatchOutcome::Executed(order) => Ok(order),
            WatchOutcome::Canceled { order, reason } => {
                self.cache.delete_pending_exchange_order(&order.symbol, order.side);
                Err(EngineError::OrderCanceled {
                    symbol: order.symbol,
                    order_id: order.order_id,
                    reason: reason.to_string(),
                })
            }
        }
    }

    /// Fills seen through order queries carry no commission, so the trade
    /// history of the order is authoritative. The snapshot is kept when the
    /// lookup fails.
    async fn with_commission(&self, mut order: ExchangeOrder) -> ExchangeOrder {
        if order.executed_qty <= 0.0 {
            return order;
        }
        match self.exchange.order_commission(&order.symbol, order.order_id).await {
            Ok(Commission { amount, asset }) if amount > 0.0 => {
                order.commission = amount;
                order.commission_asset = asset.or(order.commission_asset);
            }
            Ok(_) => {}
            Err(e) => warn!(
                "[order] {} commission of {} unavailable: {e:#}",
                order.symbol, order.order_id
            ),
        }
        order
    }

    /// Write the row of an executed exchange order. The mirror entry is
    /// dropped either way: a duplicate means the row already exists.
    async fn persist(&self, order: Order) -> EngineResult<Order> {
        let (symbol, side) = (order.symbol.clone(), order.side);
        let created = self.orders.create(order).await;
        self.cache.delete_pending_exchange_order(&symbol, side);
        if let Err(EngineError::DuplicateExternalId(id)) = &created {
            warn!("[order] {symbol} {side} exchange order {id} already recorded");
        }
        created
    }

    fn after_trade(&self, limit: &TradeLimit) {
        self.balances.invalidate(&limit.base_asset);
        self.balances.invalidate(&limit.quote_asset);
        self.cache.delete_manual_order(&limit.symbol);
    }

    async fn route_to_swap(&self, chain: &SwapChain, opened: &Order) -> EngineResult<Order> {
        let asset = chain.root_asset().to_string();
        if let Err(e) = self.swap.validator.validate(chain, opened).await {
            self.cache.invalidate_swap_chain(&asset);
            return Err(e);
        }
        match self.swap.validator.calculate_percent(chain).await {
            Ok(live) => info!(
                "[order] {} swap {} live {live:.2}% (found {:.2}%)",
                opened.symbol, chain.title, chain.percent
            ),
            Err(e) => warn!("[order] {} swap live percent unavailable: {e}", opened.symbol),
        }

        let Some(mut order) = self.orders.find(opened.id).await? else {
            return Err(EngineError::Persistence(format!("order {} not found", opened.id)));
        };
        let action = self.swap.builder.build(chain, &mut order).await?;
        self.cache.invalidate_opened_order(&order.symbol);
        self.cache.invalidate_swap_chain(&asset);

        self.swap.driver.spawn(order.id);
        Err(EngineError::RoutedToSwap { action_id: action.id })
    }

    /// Surface balance shortfalls and exchange failures to the notifier.
    fn report<T>(&self, result: &EngineResult<T>) {
        let (code, message) = match result {
            Err(e @ EngineError::InsufficientBalance { .. }) => {
                (INSUFFICIENT_BALANCE_CODE, e.to_string())
            }
            Err(EngineError::Exchange(e)) => (EXCHANGE_ERROR_CODE, format!("{e:#}")),
            _ => return,
        };
        warn!("[order] {message}");
        notify(&self.notifier, &self.bot_id, Notification::Error { code, message, fatal: false });
    }
}

fn fill_from_exchange(order: &mut Order, executed: &ExchangeOrder) {
    order.external_id = Some(executed.order_id);
    order.executed_quantity = executed.executed_qty;
    order.commission = executed.commission;
    order.commission_asset = executed.commission_asset.clone();
}
