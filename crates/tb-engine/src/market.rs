//! Cache-first market data.
//!
//! Order books and candle windows are read through a short TTL cache. A miss
//! calls the exchange and repopulates the cache; depth ticks from the event
//! stream write straight into it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tb_core::cache::{CacheKey, CacheKeys, TtlCache};
use tb_core::market_data::{Candle, OrderBook};
use tb_td::Exchange;
use tracing::debug;

/// Interval used for "last price" lookups.
pub const LAST_PRICE_INTERVAL: &str = "1m";

pub struct MarketData {
    exchange: Arc<dyn Exchange>,
    keys: CacheKeys,
    depth: TtlCache<CacheKey, OrderBook>,
    klines: TtlCache<CacheKey, Arc<Vec<Candle>>>,
    ttl: Duration,
    depth_limit: u32,
}

impl MarketData {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        keys: CacheKeys,
        ttl: Duration,
        depth_limit: u32,
    ) -> Self {
        Self { exchange, keys, depth: TtlCache::new(), klines: TtlCache::new(), ttl, depth_limit }
    }

    /// Order book of `symbol`, cache first.
    pub async fn depth(&self, symbol: &str) -> Result<OrderBook> {
        let key = self.keys.depth(symbol);
        if let Some(book) = self.depth.get(&key) {
            return Ok(book);
        }
        debug!("[market] depth miss for {symbol}");
        let book = self.exchange.depth(symbol, self.depth_limit).await?;
        self.depth.set(key, book.clone(), self.ttl);
        Ok(book)
    }

    /// Store a book received from the event stream.
    pub fn put_depth(&self, book: OrderBook) {
        let key = self.keys.depth(&book.symbol);
        self.depth.set(key, book, self.ttl);
    }

    /// Candle window of `symbol`, cache first. Oldest candle first.
    pub async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Arc<Vec<Candle>>> {
        let key = self.keys.klines(symbol, interval, limit);
        if let Some(candles) = self.klines.get(&key) {
            return Ok(candles);
        }
        let candles = Arc::new(self.exchange.klines(symbol, interval, limit).await?);
        self.klines.set(key, Arc::clone(&candles), self.ttl);
        Ok(candles)
    }

    /// Most recent one-minute candle.
    pub async fn last_candle(&self, symbol: &str) -> Result<Option<Candle>> {
        let candles = self.klines(symbol, LAST_PRICE_INTERVAL, 1).await?;
        Ok(candles.last().cloned())
    }

    /// Most recent close price, `None` if the exchange returned no candle.
    pub async fn last_close(&self, symbol: &str) -> Result<Option<f64>> {
        Ok(self.last_candle(symbol).await?.map(|c| c.close).filter(|c| *c > 0.0))
    }

    /// Lowest low over the last `minutes` one-minute candles.
    pub async fn period_min_low(&self, symbol: &str, minutes: u32) -> Result<Option<f64>> {
        let candles = self.klines(symbol, LAST_PRICE_INTERVAL, minutes).await?;
        Ok(candles.iter().map(|c| c.low).filter(|l| *l > 0.0).reduce(f64::min))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockExchange, book, candle};

    #[tokio::test]
    async fn depth_is_cache_first() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_depth(book("ETHUSDT", &[99.0], &[101.0]));
        let market =
            MarketData::new(exchange.clone(), CacheKeys::new("bot"), Duration::from_secs(60), 20);

        assert_eq!(market.depth("ETHUSDT").await.unwrap().best_bid(), Some(99.0));
        exchange.set_depth(book("ETHUSDT", &[50.0], &[51.0]));
        // still served from cache
        assert_eq!(market.depth("ETHUSDT").await.unwrap().best_bid(), Some(99.0));
        assert_eq!(exchange.depth_calls(), 1);

        market.put_depth(book("ETHUSDT", &[98.0], &[100.0]));
        assert_eq!(market.depth("ETHUSDT").await.unwrap().best_bid(), Some(98.0));
    }

    #[tokio::test]
    async fn last_close_and_period_min() {
        let exchange = Arc::new(MockExchange::new());
        let candles = vec![candle(10.0, 12.0, 9.0, 11.0), candle(11.0, 11.5, 8.5, 10.5)];
        exchange.set_klines("ETHUSDT", "1m", candles);
        let market = MarketData::new(exchange, CacheKeys::new("bot"), Duration::from_secs(60), 20);

        assert_eq!(market.last_close("ETHUSDT").await.unwrap(), Some(10.5));
        assert_eq!(market.period_min_low("ETHUSDT", 200).await.unwrap(), Some(8.5));
        assert_eq!(market.last_close("BTCUSDT").await.unwrap(), None);
    }
}
