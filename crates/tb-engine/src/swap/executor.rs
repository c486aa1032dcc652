//! Swap action execution.
//!
//! ```text
//!  action:  pending ──► process ──┬──► success
//!                                 └──► canceled
//!
//!  leg:     not started ──submit──► NEW / PARTIALLY_FILLED ──┬──► FILLED
//!           (no external id)        (external id persisted)  └──► CANCELED / EXPIRED
//! ```
//!
//! Legs run strictly in order. The exchange order id of a leg is written to
//! the action before the executor starts waiting on it, so calling
//! [`SwapExecutor::execute`] again after a restart resumes polling the placed
//! order instead of submitting a second one.
//!
//! | Situation                                   | Result        |
//! |---------------------------------------------|---------------|
//! | placement rejected                          | `Canceled`    |
//! | resumed leg found dead or unknown           | `Interrupted` |
//! | polled leg canceled / expired               | `Canceled`    |
//! | leg still NEW after `new_leg_timeout`       | `Canceled`    |
//! | last leg ≥ nearly-complete after 4h         | accepted      |

use std::sync::Arc;

use tb_core::config::SwapConfig;
use tb_core::enums::{Side, SwapActionStatus};
use tb_core::format::floor_to_tick;
use tb_core::swap::SwapAction;
use tb_core::time_util::now_ms;
use tb_core::trading::{ExchangeOrder, Order};
use tb_td::{Exchange, LimitOrderRequest};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::ports::{BalanceService, OrderRepository, SwapRepository};

/// How a call to [`SwapExecutor::execute`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The order had no active action.
    NoAction,
    Success,
    Canceled,
    /// A resumed leg was gone from the exchange; its id was cleared so the
    /// next call submits it again.
    Interrupted,
}

enum LegResult {
    Filled,
    Canceled,
    Interrupted,
}

pub struct SwapExecutor {
    exchange: Arc<dyn Exchange>,
    orders: Arc<dyn OrderRepository>,
    swaps: Arc<dyn SwapRepository>,
    balances: Arc<dyn BalanceService>,
    config: SwapConfig,
}

impl SwapExecutor {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        orders: Arc<dyn OrderRepository>,
        swaps: Arc<dyn SwapRepository>,
        balances: Arc<dyn BalanceService>,
        config: SwapConfig,
    ) -> Self {
        Self { exchange, orders, swaps, balances, config }
    }

    pub async fn execute(&self, order_id: i64) -> EngineResult<SwapOutcome> {
        let mut order = self
            .orders
            .find(order_id)
            .await?
            .ok_or_else(|| EngineError::Persistence(format!("order {order_id} not found")))?;

        let Some(mut action) = self.swaps.active_action(order_id).await? else {
            if order.swap {
                order.swap = false;
                self.orders.update(&order).await?;
                info!("[swap-exec] order {order_id} had no active action, swap flag cleared");
            }
            return Ok(SwapOutcome::NoAction);
        };

        if action.status == SwapActionStatus::Pending {
            action.status = SwapActionStatus::Process;
            self.swaps.update_action(&action).await?;
        }
        let before = self.audit_balance(&action.asset).await;
        info!(
            "[swap-exec] action {} ({}) on order {order_id}: {} {}",
            action.id, action.swap_type, action.start_quantity, action.asset
        );

        for level in 0..3u8 {
            match self.run_leg(&mut action, level).await? {
                LegResult::Filled => {}
                LegResult::Canceled => {
                    self.cancel_action(&mut action, &mut order).await?;
                    return Ok(SwapOutcome::Canceled);
                }
                LegResult::Interrupted => return Ok(SwapOutcome::Interrupted),
            }
        }

        self.complete(&mut action, &mut order, before).await?;
        Ok(SwapOutcome::Success)
    }

    async fn run_leg(&self, action: &mut SwapAction, level: u8) -> EngineResult<LegResult> {
        if action.leg(level).is_filled() {
            return Ok(LegResult::Filled);
        }

        let mut current = match action.leg(level).external_id {
            Some(external_id) => {
                let symbol = action.leg(level).symbol.clone();
                match self.exchange.query_order(&symbol, external_id).await {
                    Ok(order) if !order.status.is_dead() => order,
                    Ok(order) => {
                        warn!(
                            "[swap-exec] action {} leg {level} order {external_id} is {}",
                            action.id, order.status
                        );
                        self.reset_leg(action, level).await?;
                        return Ok(LegResult::Interrupted);
                    }
                    Err(e) if tb_core::error::is_unknown_order(&e) => {
                        warn!(
                            "[swap-exec] action {} leg {level} order {external_id} unknown",
                            action.id
                        );
                        self.reset_leg(action, level).await?;
                        return Ok(LegResult::Interrupted);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => match self.submit_leg(action, level).await {
                Ok(order) => {
                    let leg = action.leg_mut(level);
                    leg.external_id = Some(order.order_id);
                    leg.quantity = order.orig_qty;
                    leg.timestamp = Some(now_ms());
                    self.record(action, level, &order).await?;
                    order
                }
                Err(e) => {
                    warn!("[swap-exec] action {} leg {level} placement failed: {e}", action.id);
                    return Ok(LegResult::Canceled);
                }
            },
        };

        loop {
            self.record(action, level, &current).await?;
            if current.is_filled() {
                info!(
                    "[swap-exec] action {} leg {level} {} filled {}",
                    action.id, current.symbol, current.executed_qty
                );
                return Ok(LegResult::Filled);
            }
            if current.status.is_dead() {
                warn!(
                    "[swap-exec] action {} leg {level} {} ended {}",
                    action.id, current.symbol, current.status
                );
                return Ok(LegResult::Canceled);
            }

            let now = now_ms();
            let submitted_at = action.start_timestamp.max(action.leg(level).timestamp.unwrap_or(0));
            let new_timeout_ms = self.config.new_leg_timeout_secs * 1000;
            if current.is_new() && now.saturating_sub(submitted_at) > new_timeout_ms {
                info!(
                    "[swap-exec] action {} leg {level} {} still NEW, canceling",
                    action.id, current.symbol
                );
                return self.cancel_leg(action, level, &current).await;
            }

            if level == 2
                && current.is_partially_filled()
                && action.elapsed_ms(now) > self.config.partial_accept_secs * 1000
                && current.fill_ratio() >= self.config.nearly_complete_ratio
            {
                info!(
                    "[swap-exec] action {} last leg {:.1}% filled, accepting",
                    action.id,
                    current.fill_ratio() * 100.0
                );
                let canceled = self.exchange.cancel_order(&current.symbol, current.order_id).await;
                if let Err(e) = canceled {
                    warn!("[swap-exec] action {} remainder cancel failed: {e:#}", action.id);
                }
                return Ok(LegResult::Filled);
            }

            let poll = if current.is_partially_filled() {
                self.config.poll_partial_ms
            } else {
                self.config.poll_new_ms
            };
            tokio::time::sleep(std::time::Duration::from_millis(poll)).await;

            match self.exchange.query_order(&current.symbol, current.order_id).await {
                Ok(order) => current = order,
                Err(e) if tb_core::error::is_unknown_order(&e) => {
                    warn!(
                        "[swap-exec] action {} leg {level} order {} vanished",
                        action.id, current.order_id
                    );
                    return Ok(LegResult::Canceled);
                }
                Err(e) => warn!("[swap-exec] action {} leg {level} query failed: {e:#}", action.id),
            }
        }
    }

    /// Size and place the order of one leg.
    async fn submit_leg(&self, action: &SwapAction, level: u8) -> EngineResult<ExchangeOrder> {
        let leg = action.leg(level);
        let pair = self
            .swaps
            .swap_pair(&leg.symbol)
            .await?
            .ok_or_else(|| EngineError::Validation(format!("unknown swap pair {}", leg.symbol)))?;

        let available = self.balances.asset_balance(leg.source_asset(), true).await?;
        let amount = if level == 0 {
            action.start_quantity.min(available)
        } else {
            let proceeds = action.leg(level - 1).proceeds() * (1.0 - self.config.fee);
            proceeds.min(available)
        };
        let quantity = match leg.operation {
            Side::Sell => amount,
            Side::Buy => amount / leg.price,
        };
        let quantity = floor_to_tick(quantity, pair.min_quantity);
        if quantity <= 0.0 {
            return Err(EngineError::InsufficientBalance {
                asset: leg.source_asset().to_string(),
                available,
                required: amount,
            });
        }

        let request = LimitOrderRequest::gtc(&leg.symbol, leg.operation, quantity, leg.price);
        let order = self.exchange.place_limit_order(&request).await?;
        info!(
            "[swap-exec] action {} leg {level} placed {} {} {quantity} @ {} (id {})",
            action.id, leg.operation, leg.symbol, leg.price, order.order_id
        );
        Ok(order)
    }

    /// Cancel a stuck leg. A fill that wins the race counts as filled.
    async fn cancel_leg(
        &self,
        action: &mut SwapAction,
        level: u8,
        current: &ExchangeOrder,
    ) -> EngineResult<LegResult> {
        match self.exchange.cancel_order(&current.symbol, current.order_id).await {
            Ok(canceled) => {
                self.record(action, level, &canceled).await?;
                Ok(LegResult::Canceled)
            }
            Err(e) => {
                warn!("[swap-exec] action {} leg {level} cancel failed: {e:#}", action.id);
                match self.exchange.query_order(&current.symbol, current.order_id).await {
                    Ok(order) => {
                        self.record(action, level, &order).await?;
                        Ok(if order.is_filled() { LegResult::Filled } else { LegResult::Canceled })
                    }
                    Err(_) => Ok(LegResult::Canceled),
                }
            }
        }
    }

    /// Copy the exchange state of a leg into the action and persist it.
    async fn record(
        &self,
        action: &mut SwapAction,
        level: u8,
        order: &ExchangeOrder,
    ) -> EngineResult<()> {
        let leg = action.leg_mut(level);
        let unchanged = leg.external_status == Some(order.status)
            && leg.executed_quantity == order.executed_qty;
        if unchanged {
            return Ok(());
        }
        leg.external_status = Some(order.status);
        leg.executed_quantity = order.executed_qty;
        debug!(
            "[swap-exec] action {} leg {level} {} {} executed {}",
            action.id, order.symbol, order.status, order.executed_qty
        );
        self.swaps.update_action(action).await
    }

    async fn reset_leg(&self, action: &mut SwapAction, level: u8) -> EngineResult<()> {
        let leg = action.leg_mut(level);
        leg.external_id = None;
        leg.external_status = None;
        leg.executed_quantity = 0.0;
        leg.timestamp = None;
        self.swaps.update_action(action).await
    }

    async fn cancel_action(&self, action: &mut SwapAction, order: &mut Order) -> EngineResult<()> {
        action.status = SwapActionStatus::Canceled;
        action.end_timestamp = Some(now_ms());
        self.swaps.update_action(action).await?;

        order.swap = false;
        self.orders.update(order).await?;
        self.invalidate_balances(action);
        warn!("[swap-exec] action {} canceled, order {} released", action.id, order.id);
        Ok(())
    }

    async fn complete(
        &self,
        action: &mut SwapAction,
        order: &mut Order,
        before: Option<f64>,
    ) -> EngineResult<()> {
        let end_quantity = action.swap_three.proceeds() * (1.0 - self.config.fee);
        action.status = SwapActionStatus::Success;
        action.end_timestamp = Some(now_ms());
        action.end_quantity = Some(end_quantity);
        self.swaps.update_action(action).await?;

        // keep the cost basis, spread over the new quantity
        if end_quantity > 0.0 {
            let cost = order.executed_quantity * order.price;
            order.quantity = end_quantity;
            order.executed_quantity = end_quantity;
            order.price = cost / end_quantity;
        }
        order.swap = false;
        self.orders.update(order).await?;

        self.invalidate_balances(action);
        let after = self.audit_balance(&action.asset).await;
        info!(
            "[swap-exec] action {} success: {} {} -> {end_quantity} \
             (balance {before:?} -> {after:?})",
            action.id, action.start_quantity, action.asset
        );
        Ok(())
    }

    fn invalidate_balances(&self, action: &SwapAction) {
        for level in 0..3u8 {
            let leg = action.leg(level);
            self.balances.invalidate(&leg.base_asset);
            self.balances.invalidate(&leg.quote_asset);
        }
    }

    async fn audit_balance(&self, asset: &str) -> Option<f64> {
        match self.balances.asset_balance(asset, true).await {
            Ok(free) => Some(free),
            Err(e) => {
                debug!("[swap-exec] {asset} balance unavailable: {e:#}");
                None
            }
        }
    }
}
