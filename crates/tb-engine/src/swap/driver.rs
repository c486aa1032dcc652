//! Background driving of swap actions.
//!
//! ```text
//!  route_to_swap ──┐
//!  startup sweep ──┼──► spawn(order) ──► running? ──yes──► skip
//!  periodic sweep ─┘                        │ no
//!                                           ▼
//!                                  task: SwapExecutor::execute
//! ```
//!
//! An order is driven by at most one task at a time. An action that ended
//! `Interrupted` keeps its order flagged as swapping, so the next sweep picks
//! it up and submits the cleared leg again.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::EngineResult;
use crate::ports::OrderRepository;
use crate::swap::executor::{SwapExecutor, SwapOutcome};

pub struct SwapDriver {
    orders: Arc<dyn OrderRepository>,
    executor: Arc<SwapExecutor>,
    running: Arc<Mutex<AHashSet<i64>>>,
}

/// Frees the running slot of an order when its task ends, panics included.
struct RunningSlot {
    running: Arc<Mutex<AHashSet<i64>>>,
    order_id: i64,
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        self.running.lock().remove(&self.order_id);
    }
}

impl SwapDriver {
    pub fn new(orders: Arc<dyn OrderRepository>, executor: Arc<SwapExecutor>) -> Self {
        Self { orders, executor, running: Arc::new(Mutex::new(AHashSet::new())) }
    }

    /// Execute the action of `order_id` on a background task. Returns
    /// `false` when a task already drives it.
    pub fn spawn(&self, order_id: i64) -> bool {
        if !self.running.lock().insert(order_id) {
            debug!("[swap-driver] order {order_id} already driven");
            return false;
        }
        let slot = RunningSlot { running: Arc::clone(&self.running), order_id };
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            let _slot = slot;
            match executor.execute(order_id).await {
                Ok(SwapOutcome::Interrupted) => {
                    warn!("[swap-driver] swap of order {order_id} interrupted, retried next sweep")
                }
                Ok(outcome) => info!("[swap-driver] swap of order {order_id} ended {outcome:?}"),
                Err(e) => warn!("[swap-driver] swap of order {order_id} failed: {e}"),
            }
        });
        true
    }

    pub fn is_running(&self, order_id: i64) -> bool {
        self.running.lock().contains(&order_id)
    }

    /// Spawn a task for every swapping order that has none. Returns how many
    /// were started.
    pub async fn sweep(&self) -> EngineResult<usize> {
        let swapping = self.orders.find_swapping().await?;
        let started = swapping.iter().filter(|order| self.spawn(order.id)).count();
        if started > 0 {
            info!("[swap-driver] {started} of {} swapping order(s) started", swapping.len());
        }
        Ok(started)
    }

    /// Sweep forever every `every`.
    pub async fn run(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep().await {
                warn!("[swap-driver] sweep failed: {e}");
            }
        }
    }
}
