//! In-memory order and swap stores.
//!
//! Used by the runner when no database is configured and by the tests. Both
//! stores enforce the same constraints a relational backend would: unique
//! exchange order ids for orders, unique route hashes for chains.

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;
use tb_core::enums::Side;
use tb_core::swap::{SwapAction, SwapChain, SwapPair};
use tb_core::trading::Order;

use crate::error::{EngineError, EngineResult};
use crate::ports::{OrderRepository, SwapRepository};

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Default)]
struct OrderTable {
    next_id: i64,
    rows: AHashMap<i64, Order>,
}

#[derive(Default)]
pub struct MemoryOrderRepository {
    table: RwLock<OrderTable>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored order, by id.
    pub fn all(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.table.read().rows.values().cloned().collect();
        orders.sort_by_key(|o| o.id);
        orders
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn create(&self, mut order: Order) -> EngineResult<Order> {
        let mut table = self.table.write();
        if let Some(external_id) = order.external_id {
            if table.rows.values().any(|o| o.external_id == Some(external_id)) {
                return Err(EngineError::DuplicateExternalId(external_id));
            }
        }
        table.next_id += 1;
        order.id = table.next_id;
        table.rows.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update(&self, order: &Order) -> EngineResult<()> {
        let mut table = self.table.write();
        match table.rows.get_mut(&order.id) {
            Some(row) => {
                *row = order.clone();
                Ok(())
            }
            None => Err(EngineError::Persistence(format!("order {} not found", order.id))),
        }
    }

    async fn find(&self, id: i64) -> EngineResult<Option<Order>> {
        Ok(self.table.read().rows.get(&id).cloned())
    }

    async fn find_opened(&self, symbol: &str) -> EngineResult<Option<Order>> {
        let table = self.table.read();
        Ok(table
            .rows
            .values()
            .filter(|o| {
                o.symbol == symbol
                    && o.side == Side::Buy
                    && o.closes_order.is_none()
                    && o.is_opened()
                    && !o.swap
            })
            .max_by_key(|o| o.id)
            .cloned())
    }

    async fn find_sells(&self, parent_id: i64) -> EngineResult<Vec<Order>> {
        let table = self.table.read();
        let mut sells: Vec<Order> = table
            .rows
            .values()
            .filter(|o| o.side == Side::Sell && o.closes_order == Some(parent_id))
            .cloned()
            .collect();
        sells.sort_by_key(|o| o.id);
        Ok(sells)
    }

    async fn find_swapping(&self) -> EngineResult<Vec<Order>> {
        let table = self.table.read();
        let mut orders: Vec<Order> =
            table.rows.values().filter(|o| o.swap && o.is_opened()).cloned().collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }
}

// ---------------------------------------------------------------------------
// Swaps
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SwapTables {
    pairs: AHashMap<String, SwapPair>,
    chains: AHashMap<String, SwapChain>,
    next_chain_id: i64,
    actions: AHashMap<i64, SwapAction>,
    next_action_id: i64,
}

#[derive(Default)]
pub struct MemorySwapRepository {
    tables: RwLock<SwapTables>,
}

impl MemorySwapRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<SwapAction> {
        let mut actions: Vec<SwapAction> = self.tables.read().actions.values().cloned().collect();
        actions.sort_by_key(|a| a.id);
        actions
    }

    pub fn chain(&self, hash: &str) -> Option<SwapChain> {
        self.tables.read().chains.get(hash).cloned()
    }
}

#[async_trait]
impl SwapRepository for MemorySwapRepository {
    async fn swap_pairs(&self) -> EngineResult<Vec<SwapPair>> {
        let mut pairs: Vec<SwapPair> = self.tables.read().pairs.values().cloned().collect();
        pairs.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(pairs)
    }

    async fn swap_pair(&self, symbol: &str) -> EngineResult<Option<SwapPair>> {
        Ok(self.tables.read().pairs.get(symbol).cloned())
    }

    async fn save_swap_pair(&self, pair: &SwapPair) -> EngineResult<()> {
        self.tables.write().pairs.insert(pair.symbol.clone(), pair.clone());
        Ok(())
    }

    async fn save_chain(&self, chain: &SwapChain) -> EngineResult<SwapChain> {
        let mut tables = self.tables.write();
        let max_seen = chain.max_percent.max(chain.percent);
        let existing = tables.chains.get(&chain.hash).map(|c| (c.id, c.max_percent));
        let stored = match existing {
            Some((id, max_percent)) => {
                SwapChain { id, max_percent: max_percent.max(max_seen), ..chain.clone() }
            }
            None => {
                tables.next_chain_id += 1;
                SwapChain { id: tables.next_chain_id, max_percent: max_seen, ..chain.clone() }
            }
        };
        tables.chains.insert(stored.hash.clone(), stored.clone());
        Ok(stored)
    }

    async fn create_action(&self, mut action: SwapAction) -> EngineResult<SwapAction> {
        let mut tables = self.tables.write();
        tables.next_action_id += 1;
        action.id = tables.next_action_id;
        tables.actions.insert(action.id, action.clone());
        Ok(action)
    }

    async fn update_action(&self, action: &SwapAction) -> EngineResult<()> {
        let mut tables = self.tables.write();
        match tables.actions.get_mut(&action.id) {
            Some(row) => {
                *row = action.clone();
                Ok(())
            }
            None => Err(EngineError::Persistence(format!("swap action {} not found", action.id))),
        }
    }

    async fn active_action(&self, order_id: i64) -> EngineResult<Option<SwapAction>> {
        let tables = self.tables.read();
        Ok(tables
            .actions
            .values()
            .filter(|a| a.order_id == order_id && a.status.is_active())
            .max_by_key(|a| a.id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_external_id_is_rejected() {
        let repo = MemoryOrderRepository::new();
        let mut order = Order::opened("ETHUSDT", Side::Buy, 1.0, 100.0, 0);
        order.external_id = Some(42);
        let stored = repo.create(order.clone()).await.unwrap();
        assert_eq!(stored.id, 1);

        let err = repo.create(order).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateExternalId(42)));
    }

    #[tokio::test]
    async fn opened_and_sells() {
        let repo = MemoryOrderRepository::new();
        let buy = repo.create(Order::opened("ETHUSDT", Side::Buy, 1.0, 100.0, 0)).await.unwrap();
        let mut sell = Order::opened("ETHUSDT", Side::Sell, 0.5, 102.0, 0);
        sell.closes_order = Some(buy.id);
        repo.create(sell).await.unwrap();

        assert_eq!(repo.find_opened("ETHUSDT").await.unwrap().map(|o| o.id), Some(buy.id));
        assert!(repo.find_opened("BTCUSDT").await.unwrap().is_none());
        assert_eq!(repo.find_sells(buy.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn swapping_position_is_not_opened() {
        let repo = MemoryOrderRepository::new();
        let mut buy =
            repo.create(Order::opened("ETHUSDT", Side::Buy, 1.0, 100.0, 0)).await.unwrap();
        buy.swap = true;
        repo.update(&buy).await.unwrap();

        assert!(repo.find_opened("ETHUSDT").await.unwrap().is_none());
        assert_eq!(repo.find_swapping().await.unwrap().len(), 1);
    }
}
