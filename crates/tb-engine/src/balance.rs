//! Exchange-backed balance service with a short TTL cache.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tb_core::cache::{CacheKey, CacheKeys, TtlCache};
use tb_td::Exchange;
use tracing::debug;

use crate::ports::BalanceService;

pub struct ExchangeBalances {
    exchange: Arc<dyn Exchange>,
    keys: CacheKeys,
    cache: TtlCache<CacheKey, f64>,
    ttl: Duration,
}

impl ExchangeBalances {
    pub fn new(exchange: Arc<dyn Exchange>, keys: CacheKeys, ttl: Duration) -> Self {
        Self { exchange, keys, cache: TtlCache::new(), ttl }
    }

    /// Fetch the whole account and refresh every cached asset.
    async fn refresh(&self) -> Result<()> {
        let balances = self.exchange.balances().await?;
        for b in &balances {
            self.cache.set(self.keys.balance(&b.asset), b.free, self.ttl);
        }
        debug!("[balance] refreshed {} assets", balances.len());
        Ok(())
    }
}

#[async_trait]
impl BalanceService for ExchangeBalances {
    async fn asset_balance(&self, asset: &str, force_fresh: bool) -> Result<f64> {
        let key = self.keys.balance(asset);
        if !force_fresh {
            if let Some(free) = self.cache.get(&key) {
                return Ok(free);
            }
        }
        self.refresh().await?;
        // assets missing from the account have zero balance
        let free = self.cache.get(&key).unwrap_or(0.0);
        self.cache.set(key, free, self.ttl);
        Ok(free)
    }

    fn invalidate(&self, asset: &str) {
        self.cache.remove(&self.keys.balance(asset));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockExchange;

    #[tokio::test]
    async fn cached_until_invalidated() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_balance("USDT", 100.0);
        let balances =
            ExchangeBalances::new(exchange.clone(), CacheKeys::new("bot"), Duration::from_secs(60));

        assert_eq!(balances.asset_balance("USDT", false).await.unwrap(), 100.0);
        exchange.set_balance("USDT", 40.0);
        assert_eq!(balances.asset_balance("USDT", false).await.unwrap(), 100.0);
        assert_eq!(balances.asset_balance("USDT", true).await.unwrap(), 40.0);

        exchange.set_balance("USDT", 10.0);
        balances.invalidate("USDT");
        assert_eq!(balances.asset_balance("USDT", false).await.unwrap(), 10.0);
        assert_eq!(balances.asset_balance("DOGE", false).await.unwrap(), 0.0);
    }
}
