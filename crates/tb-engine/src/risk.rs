//! Loss security: the risk gate in front of every BUY.
//!
//! Three independent signals can mark a BUY as overpriced:
//!
//! | Signal         | Source                                    | Used by             |
//! |----------------|-------------------------------------------|---------------------|
//! | last low       | most recent 1m candle                     | price correction    |
//! | ML prediction  | [`Predictor`] (only when `ml_enabled`)    | correction and gate |
//! | interpolation  | symbol close scaled by BTC/ETH movement   | correction and gate |
//!
//! The gate additionally checks whether the market has fallen through its
//! historical minimum. Every signal is best effort: a failed lookup is logged
//! at debug level and the signal is treated as absent.

use std::sync::Arc;

use tb_core::config::RiskConfig;
use tb_core::enums::Side;
use tb_core::trading::{ExchangeOrder, TradeLimit};
use tracing::{debug, info};

use crate::market::MarketData;
use crate::ports::Predictor;

/// Downward price signals available for one symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskSignals {
    pub last_low: Option<f64>,
    pub predicted: Option<f64>,
    pub interpolations: Vec<f64>,
}

impl RiskSignals {
    /// Clamp `price` to the lowest available signal. Never raises the price,
    /// and applying it twice gives the same result.
    pub fn correct(&self, price: f64) -> f64 {
        self.last_low
            .into_iter()
            .chain(self.predicted)
            .chain(self.interpolations.iter().copied())
            .filter(|signal| *signal > 0.0)
            .fold(price, f64::min)
    }
}

pub struct LossSecurity {
    market: Arc<MarketData>,
    predictor: Arc<dyn Predictor>,
    ml_enabled: bool,
    config: RiskConfig,
}

impl LossSecurity {
    pub fn new(
        market: Arc<MarketData>,
        predictor: Arc<dyn Predictor>,
        ml_enabled: bool,
        config: RiskConfig,
    ) -> Self {
        Self { market, predictor, ml_enabled, config }
    }

    /// Collect every available signal for `symbol`.
    pub async fn signals(&self, symbol: &str) -> RiskSignals {
        let last_low = match self.market.last_candle(symbol).await {
            Ok(candle) => candle.map(|c| c.low).filter(|l| *l > 0.0),
            Err(e) => {
                debug!("[risk] {symbol} last candle unavailable: {e:#}");
                None
            }
        };
        RiskSignals {
            last_low,
            predicted: self.prediction(symbol).await,
            interpolations: self.interpolations(symbol).await,
        }
    }

    /// Lower `price` to the cheapest signal that is available.
    pub async fn buy_price_correction(&self, price: f64, limit: &TradeLimit) -> f64 {
        let corrected = self.signals(&limit.symbol).await.correct(price);
        if corrected < price {
            debug!("[risk] {} buy price corrected {price} -> {corrected}", limit.symbol);
        }
        corrected
    }

    /// Whether a still-open BUY should be pulled from the book.
    pub async fn is_risky_buy(&self, order: &ExchangeOrder, limit: &TradeLimit) -> bool {
        if order.side != Side::Buy || !order.is_open() {
            return false;
        }
        let symbol = &order.symbol;

        if let Some(predicted) = self.prediction(symbol).await {
            if predicted < order.price - limit.min_price {
                info!("[risk] {symbol} BUY {} is risky: predicted {predicted}", order.price);
                return true;
            }
        }

        if self.fell_below_history(order).await {
            info!(
                "[risk] {symbol} BUY {} is risky: market fell below its historical minimum",
                order.price
            );
            return true;
        }

        let interpolations = self.interpolations(symbol).await;
        if !interpolations.is_empty() && interpolations.iter().all(|fair| order.price > *fair) {
            info!(
                "[risk] {symbol} BUY {} is risky: above interpolated prices {interpolations:?}",
                order.price
            );
            return true;
        }
        false
    }

    async fn prediction(&self, symbol: &str) -> Option<f64> {
        if !self.ml_enabled {
            return None;
        }
        match self.predictor.predict(symbol).await {
            Ok(price) if price > 0.0 => Some(price),
            Ok(_) => None,
            Err(e) => {
                debug!("[risk] {symbol} prediction unavailable: {e:#}");
                None
            }
        }
    }

    /// Close has dropped below the order price and below the historical low.
    async fn fell_below_history(&self, order: &ExchangeOrder) -> bool {
        let factor = 1.0 - self.config.drop_percent / 100.0;
        let close = match self.market.last_close(&order.symbol).await {
            Ok(Some(close)) => close,
            Ok(None) => return false,
            Err(e) => {
                debug!("[risk] {} close unavailable: {e:#}", order.symbol);
                return false;
            }
        };
        if close > order.price * factor {
            return false;
        }

        let history = self
            .market
            .klines(&order.symbol, &self.config.history_interval, self.config.history_period)
            .await;
        let min_low = match history {
            Ok(candles) => candles.iter().map(|c| c.low).filter(|l| *l > 0.0).reduce(f64::min),
            Err(e) => {
                debug!("[risk] {} history unavailable: {e:#}", order.symbol);
                None
            }
        };
        min_low.is_some_and(|low| close < low * factor)
    }

    /// Fair prices of `symbol` implied by the movement of each reference symbol.
    async fn interpolations(&self, symbol: &str) -> Vec<f64> {
        let interval = &self.config.interpolation_interval;
        let period = self.config.interpolation_period;

        let own = match self.market.klines(symbol, interval, period).await {
            Ok(candles) => candles,
            Err(e) => {
                debug!("[risk] {symbol} interpolation window unavailable: {e:#}");
                return Vec::new();
            }
        };
        let Some(own_first) = own.first().map(|c| c.close).filter(|c| *c > 0.0) else {
            return Vec::new();
        };

        let mut fair = Vec::new();
        for reference in self.config.reference_symbols.iter().filter(|r| r.as_str() != symbol) {
            let candles = match self.market.klines(reference, interval, period).await {
                Ok(candles) => candles,
                Err(e) => {
                    debug!("[risk] {reference} reference window unavailable: {e:#}");
                    continue;
                }
            };
            if let (Some(first), Some(last)) = (candles.first(), candles.last()) {
                if first.close > 0.0 && last.close > 0.0 {
                    fair.push(own_first * last.close / first.close);
                }
            }
        }
        fair
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedPredictor, MockExchange, candle, exchange_order, trade_limit};
    use std::time::Duration;
    use tb_core::cache::CacheKeys;

    fn security(
        exchange: Arc<MockExchange>,
        predicted: Option<f64>,
        ml_enabled: bool,
    ) -> LossSecurity {
        let market =
            Arc::new(MarketData::new(exchange, CacheKeys::new("bot"), Duration::from_secs(60), 20));
        let predictor = Arc::new(FixedPredictor(predicted));
        LossSecurity::new(market, predictor, ml_enabled, RiskConfig::default())
    }

    #[test]
    fn correction_is_monotonic_and_idempotent() {
        let signals = RiskSignals {
            last_low: Some(99.0),
            predicted: Some(97.5),
            interpolations: vec![98.0, 101.0],
        };
        for price in [50.0, 97.5, 98.0, 100.0, 150.0] {
            let once = signals.correct(price);
            assert!(once <= price);
            assert_eq!(signals.correct(once), once);
        }
        assert_eq!(signals.correct(100.0), 97.5);
        assert_eq!(RiskSignals::default().correct(100.0), 100.0);
    }

    #[tokio::test]
    async fn ml_prediction_marks_buy_risky() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_klines("BTCUSDT", "1m", vec![candle(95.0, 95.0, 95.0, 95.0)]);
        let risk = security(exchange, Some(90.0), true);

        let order = exchange_order("BTCUSDT", Side::Buy, 95.0, 1.0);
        assert!(risk.is_risky_buy(&order, &trade_limit("BTCUSDT")).await);
    }

    #[tokio::test]
    async fn prediction_ignored_without_ml() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_klines("BTCUSDT", "1m", vec![candle(95.0, 95.0, 95.0, 95.0)]);
        let risk = security(exchange, Some(90.0), false);

        let order = exchange_order("BTCUSDT", Side::Buy, 95.0, 1.0);
        assert!(!risk.is_risky_buy(&order, &trade_limit("BTCUSDT")).await);
        // sells are never gated
        let sell = exchange_order("BTCUSDT", Side::Sell, 95.0, 1.0);
        assert!(!risk.is_risky_buy(&sell, &trade_limit("BTCUSDT")).await);
    }

    #[tokio::test]
    async fn fall_through_history_is_risky() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_klines("ETHUSDT", "1m", vec![candle(90.0, 90.0, 89.0, 89.0)]);
        let hourly = vec![candle(100.0, 101.0, 95.0, 99.0), candle(99.0, 100.0, 92.0, 90.0)];
        exchange.set_klines("ETHUSDT", "1h", hourly);
        let risk = security(exchange, None, false);

        let order = exchange_order("ETHUSDT", Side::Buy, 95.0, 1.0);
        assert!(risk.is_risky_buy(&order, &trade_limit("ETHUSDT")).await);
    }

    #[tokio::test]
    async fn interpolation_above_fair_price_is_risky() {
        let exchange = Arc::new(MockExchange::new());
        // own window flat at 100, BTC dropped 10%, ETH dropped 5%
        let flat = candle(100.0, 100.0, 100.0, 100.0);
        exchange.set_klines("SOLUSDT", "1h", vec![flat.clone(), flat]);
        let close = |price| candle(1.0, 1.0, 1.0, price);
        exchange.set_klines("BTCUSDT", "1h", vec![close(1000.0), close(900.0)]);
        exchange.set_klines("ETHUSDT", "1h", vec![close(100.0), close(95.0)]);
        let risk = security(exchange, None, false);

        let signals = risk.signals("SOLUSDT").await;
        assert_eq!(signals.interpolations.len(), 2);
        assert!((signals.interpolations[0] - 90.0).abs() < 1e-9);

        let limit = trade_limit("SOLUSDT");
        assert!(risk.is_risky_buy(&exchange_order("SOLUSDT", Side::Buy, 96.0, 1.0), &limit).await);
        assert!(!risk.is_risky_buy(&exchange_order("SOLUSDT", Side::Buy, 92.0, 1.0), &limit).await);
        assert_eq!(risk.buy_price_correction(96.0, &limit).await, 90.0);
    }
}
