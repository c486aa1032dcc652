//! Turns a validated chain into a durable swap action.

use std::sync::Arc;

use tb_core::enums::SwapActionStatus;
use tb_core::swap::{SwapAction, SwapChain, SwapLeg};
use tb_core::time_util::now_ms;
use tb_core::trading::Order;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::ports::{OrderRepository, SwapRepository};

pub struct SwapBuilder {
    bot_id: String,
    orders: Arc<dyn OrderRepository>,
    swaps: Arc<dyn SwapRepository>,
}

impl SwapBuilder {
    pub fn new(
        bot_id: &str,
        orders: Arc<dyn OrderRepository>,
        swaps: Arc<dyn SwapRepository>,
    ) -> Self {
        Self { bot_id: bot_id.to_string(), orders, swaps }
    }

    /// Persist `chain`, open a pending action for `order` and flag the order
    /// as swapping. Refuses when the order already has an active action.
    pub async fn build(&self, chain: &SwapChain, order: &mut Order) -> EngineResult<SwapAction> {
        if let Some(active) = self.swaps.active_action(order.id).await? {
            return Err(EngineError::Validation(format!(
                "order {} already has active swap action {}",
                order.id, active.id
            )));
        }

        let stored = self.swaps.save_chain(chain).await?;
        let action = SwapAction {
            id: 0,
            order_id: order.id,
            bot_id: self.bot_id.clone(),
            swap_chain_id: stored.id,
            swap_type: stored.swap_type,
            asset: stored.root_asset().to_string(),
            status: SwapActionStatus::Pending,
            start_timestamp: now_ms(),
            end_timestamp: None,
            start_quantity: order.executed_quantity,
            end_quantity: None,
            swap_one: SwapLeg::from_transition(&stored.swap_one),
            swap_two: SwapLeg::from_transition(&stored.swap_two),
            swap_three: SwapLeg::from_transition(&stored.swap_three),
        };
        let action = self.swaps.create_action(action).await?;

        order.swap = true;
        self.orders.update(order).await?;
        info!(
            "[swap-build] order {} -> action {} ({} {:.2}%, {} {})",
            order.id,
            action.id,
            stored.swap_type,
            stored.percent,
            action.start_quantity,
            action.asset
        );
        Ok(action)
    }
}
