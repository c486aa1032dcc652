//! Swap pair seeding and price refresh.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tb_core::swap::SwapPair;
use tb_core::time_util::now_ms;
use tb_td::Exchange;
use tracing::{info, warn};

use crate::events::{EngineEvent, EventDispatcher};
use crate::ports::SwapRepository;

pub struct SwapPairRefresher {
    exchange: Arc<dyn Exchange>,
    swaps: Arc<dyn SwapRepository>,
    events: Arc<EventDispatcher>,
}

impl SwapPairRefresher {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        swaps: Arc<dyn SwapRepository>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self { exchange, swaps, events }
    }

    /// Load trading rules for every tradable symbol. Existing pairs keep
    /// their prices.
    pub async fn seed(&self) -> Result<usize> {
        let symbols = self.exchange.symbols().await?;
        for info in &symbols {
            let pair = match self.swaps.swap_pair(&info.symbol).await? {
                Some(existing) => SwapPair {
                    min_price: info.tick_size,
                    min_quantity: info.step_size,
                    min_notional: info.min_notional,
                    ..existing
                },
                None => SwapPair {
                    symbol: info.symbol.clone(),
                    base_asset: info.base_asset.clone(),
                    quote_asset: info.quote_asset.clone(),
                    buy_price: 0.0,
                    sell_price: 0.0,
                    min_price: info.tick_size,
                    min_quantity: info.step_size,
                    min_notional: info.min_notional,
                    price_change_percent: 0.0,
                    price_timestamp: 0,
                },
            };
            self.swaps.save_swap_pair(&pair).await?;
        }
        info!("[swap-pairs] seeded {} pairs", symbols.len());
        Ok(symbols.len())
    }

    /// Fetch 24h tickers and publish them as price ticks.
    pub async fn refresh(&self) -> Result<usize> {
        let tickers = self.exchange.tickers().await?;
        let timestamp = now_ms();
        let mut updated = 0;
        for ticker in tickers {
            let event = EngineEvent::PriceTick {
                symbol: ticker.symbol,
                bid: ticker.bid_price,
                ask: ticker.ask_price,
                price_change_percent: ticker.price_change_percent,
                timestamp,
            };
            updated += self.events.dispatch(&event).await;
        }
        Ok(updated)
    }

    /// Refresh forever every `every`.
    pub async fn run(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.refresh().await {
                warn!("[swap-pairs] refresh failed: {e:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, SwapPairPriceHandler};
    use crate::storage::memory::MemorySwapRepository;
    use crate::testing::MockExchange;
    use tb_core::market_data::{SymbolInfo, Ticker};

    #[tokio::test]
    async fn seed_then_refresh_prices() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_symbols(vec![SymbolInfo {
            symbol: "ETHBTC".into(),
            base_asset: "ETH".into(),
            quote_asset: "BTC".into(),
            tick_size: 0.00001,
            step_size: 0.0001,
            min_notional: 0.0001,
        }]);
        exchange.set_tickers(vec![
            Ticker {
                symbol: "ETHBTC".into(),
                bid_price: 0.0501,
                ask_price: 0.0502,
                last_price: 0.0501,
                price_change_percent: -0.8,
                close_time: 0,
            },
            Ticker {
                symbol: "DOGEBTC".into(),
                bid_price: 0.000001,
                ask_price: 0.0000011,
                last_price: 0.000001,
                price_change_percent: 3.0,
                close_time: 0,
            },
        ]);

        let swaps = Arc::new(MemorySwapRepository::new());
        let events = Arc::new(EventDispatcher::new());
        events.register(EventKind::PriceTick, Arc::new(SwapPairPriceHandler::new(swaps.clone())));
        let refresher = SwapPairRefresher::new(exchange, swaps.clone(), events);

        assert_eq!(refresher.seed().await.unwrap(), 1);
        assert_eq!(refresher.refresh().await.unwrap(), 2);

        let pairs = swaps.swap_pairs().await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].sell_price, 0.0501);
        assert!(pairs[0].is_bear_market());
        assert!(!pairs[0].is_price_expired(now_ms(), 60_000));
    }
}
