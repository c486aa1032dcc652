//! Pre-commit validation of a found swap chain.
//!
//! A chain is checked against the live pair prices before any capital is
//! committed. The first failing check rejects the whole chain; callers
//! search again instead of patching a leg.

use std::sync::Arc;

use tb_core::config::SwapConfig;
use tb_core::enums::Side;
use tb_core::format::round_percent;
use tb_core::swap::{SwapChain, SwapPair, SwapTransition};
use tb_core::time_util::now_ms;
use tb_core::trading::Order;
use tracing::{debug, warn};

use super::finder::{leg_balance, leg_price};
use crate::error::{EngineResult, SwapChainError};
use crate::market::MarketData;
use crate::ports::SwapRepository;

/// Candle interval of the plausibility window.
const DAILY_INTERVAL: &str = "1d";

pub struct SwapValidator {
    swaps: Arc<dyn SwapRepository>,
    market: Arc<MarketData>,
    config: SwapConfig,
}

impl SwapValidator {
    pub fn new(
        swaps: Arc<dyn SwapRepository>,
        market: Arc<MarketData>,
        config: SwapConfig,
    ) -> Self {
        Self { swaps, market, config }
    }

    pub async fn validate(&self, chain: &SwapChain, order: &Order) -> EngineResult<()> {
        let now = now_ms();
        let mut pairs = Vec::with_capacity(3);
        for leg in chain.legs() {
            let pair = self
                .swaps
                .swap_pair(&leg.symbol)
                .await?
                .filter(|p| p.price_for(leg.operation) > 0.0)
                .ok_or_else(|| SwapChainError::PriceUnknown { symbol: leg.symbol.clone() })?;
            if pair.is_price_expired(now, self.config.price_max_age_ms()) {
                return Err(SwapChainError::PriceExpired { symbol: leg.symbol.clone() }.into());
            }
            pairs.push(pair);
        }

        if chain.percent < self.config.min_percent {
            let min = self.config.min_percent;
            return Err(SwapChainError::PercentTooLow { percent: chain.percent, min }.into());
        }

        // legs were sized for the searched quantity, the order may hold a different one
        let scale = if chain.swap_one.quantity > 0.0 {
            order.executed_quantity / chain.swap_one.quantity
        } else {
            1.0
        };

        for (leg, pair) in chain.legs().into_iter().zip(&pairs) {
            self.check_price_moved(leg, pair)?;

            let notional = leg.quantity * scale * leg.price;
            if notional < pair.min_notional {
                return Err(SwapChainError::NotionalTooLow {
                    symbol: leg.symbol.clone(),
                    notional,
                    min: pair.min_notional,
                }
                .into());
            }

            self.check_history(leg).await?;
        }
        debug!("[swap-validate] {} ({:.2}%) passed", chain.title, chain.percent);
        Ok(())
    }

    fn check_price_moved(
        &self,
        leg: &SwapTransition,
        pair: &SwapPair,
    ) -> Result<(), SwapChainError> {
        let live = pair.price_for(leg.operation);
        let tolerance = self.config.price_tolerance_percent / 100.0;
        let moved = match leg.operation {
            Side::Buy => leg.price > live * (1.0 + tolerance),
            Side::Sell => leg.price < live * (1.0 - tolerance),
        };
        if moved {
            let symbol = leg.symbol.clone();
            return Err(SwapChainError::PriceMoved { symbol, recorded: leg.price, live });
        }
        Ok(())
    }

    /// At least half of the recent daily candles must have traded at the leg price.
    async fn check_history(&self, leg: &SwapTransition) -> Result<(), SwapChainError> {
        let days = self.config.history_days;
        let candles = match self.market.klines(&leg.symbol, DAILY_INTERVAL, days).await {
            Ok(candles) => candles,
            Err(e) => {
                warn!("[swap-validate] {} daily history unavailable: {e:#}", leg.symbol);
                return Ok(());
            }
        };
        if candles.is_empty() {
            return Ok(());
        }
        let permitted = candles
            .iter()
            .filter(|c| match leg.operation {
                Side::Sell => c.high >= leg.price,
                Side::Buy => c.low <= leg.price,
            })
            .count();
        if permitted * 2 < candles.len() {
            let symbol = leg.symbol.clone();
            return Err(SwapChainError::ImplausibleHistory { symbol, price: leg.price });
        }
        Ok(())
    }

    /// Expected percent of `chain` at live prices.
    pub async fn calculate_percent(&self, chain: &SwapChain) -> EngineResult<f64> {
        let start = if chain.swap_one.quantity > 0.0 { chain.swap_one.quantity } else { 1.0 };
        let mut amount = start;
        for leg in chain.legs() {
            let pair = self
                .swaps
                .swap_pair(&leg.symbol)
                .await?
                .ok_or_else(|| SwapChainError::PriceUnknown { symbol: leg.symbol.clone() })?;
            let price = leg_price(&pair, leg.operation);
            if price <= 0.0 {
                return Err(SwapChainError::PriceUnknown { symbol: leg.symbol.clone() }.into());
            }
            amount = leg_balance(leg.operation, amount, price, self.config.fee);
        }
        Ok(round_percent((amount / start - 1.0) * 100.0))
    }
}
