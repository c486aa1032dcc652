//! Three-level swap search.
//!
//! Rooted at asset `A`, every search walks the pair graph three legs deep
//! and returns to `A`:
//!
//! | Type | Level 0            | Level 1                     | Level 2                         |
//! |------|--------------------|-----------------------------|---------------------------------|
//! | SBS  | SELL `A/X`         | BUY `Y/X` (`Y != A`)        | SELL `Y/A`                      |
//! | SBB  | SELL `A/X`         | BUY `Y/X` (`Y != A`)        | BUY `A/Y`, falling pairs only   |
//! | SSB  | SELL `A/X`         | SELL `X/Y` (`Y != A`)       | BUY `A/Y`, falling pairs only   |
//!
//! Each leg pays the flat fee once: a SELL yields `amount × price × (1 − fee)`
//! of the quote, a BUY yields `amount / price × (1 − fee)` of the base. Prices
//! are floored to the traded pair's tick. Pairs with a stale or non-positive
//! price are skipped.

use std::sync::Arc;

use md5::{Digest, Md5};
use tb_core::config::SwapConfig;
use tb_core::enums::{Side, SwapType};
use tb_core::format::{floor_to_tick, round_percent};
use tb_core::swap::{SwapChain, SwapPair, SwapTransition};
use tb_core::time_util::now_ms;
use tracing::{debug, info};

use crate::cache::EngineCache;
use crate::error::EngineResult;
use crate::ports::SwapRepository;

/// Amount of the received asset after one leg.
pub fn leg_balance(operation: Side, amount: f64, price: f64, fee: f64) -> f64 {
    match operation {
        Side::Sell => amount * price * (1.0 - fee),
        Side::Buy => amount / price * (1.0 - fee),
    }
}

/// Quoted price of `pair` for `operation`, floored to the pair's tick.
pub fn leg_price(pair: &SwapPair, operation: Side) -> f64 {
    floor_to_tick(pair.price_for(operation), pair.min_price)
}

/// `title` and `hash` of a route.
pub fn chain_identity(legs: [&SwapTransition; 3]) -> (String, String) {
    let title = legs.iter().map(|t| t.title()).collect::<Vec<_>>().join(" | ");
    let hash = hex::encode(Md5::digest(title.as_bytes()));
    (title, hash)
}

#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub fee: f64,
    pub max_age_ms: u64,
    pub now_ms: u64,
}

/// Best chain plus the explored candidate tree (level-0 roots).
#[derive(Debug, Clone, Default)]
pub struct SwapSearch {
    pub best: Option<SwapChain>,
    pub tree: Vec<SwapTransition>,
}

/// Exhaustive search of one swap type.
pub fn search(
    swap_type: SwapType,
    asset: &str,
    quantity: f64,
    pairs: &[SwapPair],
    params: SearchParams,
) -> SwapSearch {
    let mut result = SwapSearch::default();
    if quantity <= 0.0 {
        return result;
    }

    let fresh = |pair: &&SwapPair, operation: Side| {
        !pair.is_price_expired(params.now_ms, params.max_age_ms) && leg_price(pair, operation) > 0.0
    };

    for p0 in pairs.iter().filter(|p| p.base_asset == asset).filter(|p| fresh(p, Side::Sell)) {
        let mut t0 = transition(swap_type, p0, Side::Sell, quantity, 0, params.fee);
        let x = p0.quote_asset.as_str();

        let op1 = swap_type.operation(1);
        let level1 = pairs.iter().filter(|p| match op1 {
            Side::Buy => p.quote_asset == x && p.base_asset != asset,
            Side::Sell => p.base_asset == x && p.quote_asset != asset,
        });
        for p1 in level1.filter(|p| fresh(p, op1)) {
            let q1 = leg_quantity(op1, t0.balance, leg_price(p1, op1));
            let mut t1 = transition(swap_type, p1, op1, q1, 1, params.fee);
            let y = t1.to_asset().to_string();

            let op2 = swap_type.operation(2);
            let level2 = pairs.iter().filter(|p| match op2 {
                Side::Sell => p.base_asset == y && p.quote_asset == asset,
                Side::Buy => p.base_asset == asset && p.quote_asset == y && p.is_bear_market(),
            });
            for p2 in level2.filter(|p| fresh(p, op2)) {
                let q2 = leg_quantity(op2, t1.balance, leg_price(p2, op2));
                let t2 = transition(swap_type, p2, op2, q2, 2, params.fee);
                let percent = round_percent((t2.balance / quantity - 1.0) * 100.0);

                if result.best.as_ref().is_none_or(|best| percent > best.percent) {
                    let legs = [&t0, &t1, &t2];
                    result.best = Some(build_chain(swap_type, legs, percent, params.now_ms));
                }
                t1.transitions.push(t2);
            }
            t0.transitions.push(t1);
        }
        result.tree.push(t0);
    }
    result
}

/// Base quantity traded by a leg that spends `amount` of its source asset.
fn leg_quantity(operation: Side, amount: f64, price: f64) -> f64 {
    match operation {
        Side::Sell => amount,
        Side::Buy => amount / price,
    }
}

fn transition(
    swap_type: SwapType,
    pair: &SwapPair,
    operation: Side,
    quantity: f64,
    level: u8,
    fee: f64,
) -> SwapTransition {
    let price = leg_price(pair, operation);
    let spent = match operation {
        Side::Sell => quantity,
        Side::Buy => quantity * price,
    };
    SwapTransition {
        swap_type,
        symbol: pair.symbol.clone(),
        base_asset: pair.base_asset.clone(),
        quote_asset: pair.quote_asset.clone(),
        operation,
        quantity,
        price,
        balance: leg_balance(operation, spent, price, fee),
        level,
        transitions: Vec::new(),
    }
}

fn build_chain(
    swap_type: SwapType,
    legs: [&SwapTransition; 3],
    percent: f64,
    timestamp: u64,
) -> SwapChain {
    let (title, hash) = chain_identity(legs);
    SwapChain {
        id: 0,
        title,
        swap_type,
        hash,
        percent,
        max_percent: percent,
        swap_one: legs[0].leaf(),
        swap_two: legs[1].leaf(),
        swap_three: legs[2].leaf(),
        timestamp,
    }
}

// ---------------------------------------------------------------------------
// SwapFinder
// ---------------------------------------------------------------------------

/// Runs every swap type against the stored pairs, with a short per-asset cache.
pub struct SwapFinder {
    swaps: Arc<dyn SwapRepository>,
    cache: Arc<EngineCache>,
    config: SwapConfig,
}

impl SwapFinder {
    pub fn new(
        swaps: Arc<dyn SwapRepository>,
        cache: Arc<EngineCache>,
        config: SwapConfig,
    ) -> Self {
        Self { swaps, cache, config }
    }

    pub async fn find_best(&self, asset: &str, quantity: f64) -> EngineResult<Option<SwapChain>> {
        if let Some(chain) = self.cache.swap_chain(asset) {
            return Ok(Some(chain));
        }

        let pairs = self.swaps.swap_pairs().await?;
        let params = SearchParams {
            fee: self.config.fee,
            max_age_ms: self.config.price_max_age_ms(),
            now_ms: now_ms(),
        };

        let mut best: Option<SwapChain> = None;
        for swap_type in SwapType::ALL {
            let found = search(swap_type, asset, quantity, &pairs, params);
            debug!(
                "[swap-find] {asset} {swap_type}: {} roots, best {:?}",
                found.tree.len(),
                found.best.as_ref().map(|c| c.percent)
            );
            if let Some(chain) = found.best {
                if best.as_ref().is_none_or(|b| chain.percent > b.percent) {
                    best = Some(chain);
                }
            }
        }

        if let Some(chain) = &best {
            info!(
                "[swap-find] {asset} best {} {:.2}%: {}",
                chain.swap_type, chain.percent, chain.title
            );
            self.cache.set_swap_chain(asset, chain);
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::pair;

    const NOW: u64 = 1_700_000_000_000;

    fn params() -> SearchParams {
        SearchParams { fee: 0.002, max_age_ms: 60_000, now_ms: NOW }
    }

    fn sbs_pairs() -> Vec<SwapPair> {
        vec![
            pair("ETHBTC", "ETH", "BTC", 0.051, 0.05, NOW),
            pair("XRPBTC", "XRP", "BTC", 0.00002, 0.0000199, NOW),
            pair("XRPETH", "XRP", "ETH", 0.00042, 0.000415, NOW),
        ]
    }

    #[test]
    fn sbs_final_balance_is_fee_consistent() {
        let found = search(SwapType::Sbs, "ETH", 2.0, &sbs_pairs(), params());
        let chain = found.best.unwrap();
        assert_eq!(chain.swap_one.symbol, "ETHBTC");
        assert_eq!(chain.swap_two.symbol, "XRPBTC");
        assert_eq!(chain.swap_three.symbol, "XRPETH");

        let f = 0.002;
        let expected =
            2.0 * (0.05 * (1.0 - f)) * (1.0 / 0.00002 * (1.0 - f)) * (0.000415 * (1.0 - f));
        assert!((chain.swap_three.balance - expected).abs() < 1e-9);
        assert_eq!(chain.percent, round_percent((expected / 2.0 - 1.0) * 100.0));
        assert!(chain.percent > 0.0);
        assert_eq!(found.tree.len(), 1);
        assert_eq!(found.tree[0].transitions[0].transitions.len(), 1);
    }

    #[test]
    fn sbb_requires_falling_last_pair() {
        let mut pairs = vec![
            pair("ETHUSDT", "ETH", "USDT", 2000.0, 1990.0, NOW),
            pair("BNBUSDT", "BNB", "USDT", 300.0, 299.0, NOW),
            pair("ETHBNB", "ETH", "BNB", 6.5, 6.4, NOW),
        ];
        assert!(search(SwapType::Sbb, "ETH", 1.0, &pairs, params()).best.is_some());

        pairs[2].price_change_percent = 1.5;
        assert!(search(SwapType::Sbb, "ETH", 1.0, &pairs, params()).best.is_none());
    }

    #[test]
    fn ssb_sells_twice_then_buys() {
        let pairs = vec![
            pair("ETHBTC", "ETH", "BTC", 0.051, 0.05, NOW),
            pair("BTCUSDT", "BTC", "USDT", 40_100.0, 40_000.0, NOW),
            pair("ETHUSDT", "ETH", "USDT", 1_950.0, 1_940.0, NOW),
        ];
        let chain = search(SwapType::Ssb, "ETH", 1.0, &pairs, params()).best.unwrap();
        assert_eq!(
            [chain.swap_one.operation, chain.swap_two.operation, chain.swap_three.operation],
            [Side::Sell, Side::Sell, Side::Buy]
        );
        assert_eq!(chain.swap_three.symbol, "ETHUSDT");
        assert_eq!(chain.root_asset(), "ETH");
    }

    #[test]
    fn stale_pairs_are_skipped() {
        let mut pairs = sbs_pairs();
        pairs[1].price_timestamp = NOW - 61_000;
        let found = search(SwapType::Sbs, "ETH", 2.0, &pairs, params());
        assert!(found.best.is_none());
        assert!(found.tree[0].transitions.is_empty());
    }

    #[test]
    fn hash_depends_on_route_only() {
        let a = search(SwapType::Sbs, "ETH", 2.0, &sbs_pairs(), params()).best.unwrap();
        let mut repriced = sbs_pairs();
        repriced[0].sell_price = 0.0501;
        let b = search(SwapType::Sbs, "ETH", 5.0, &repriced, params()).best.unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 32);
        assert_eq!(
            a.title,
            "SELL ETH -> BTC (ETHBTC) | BUY BTC -> XRP (XRPBTC) | SELL XRP -> ETH (XRPETH)"
        );

        let reordered = [&a.swap_two, &a.swap_one, &a.swap_three];
        assert_ne!(chain_identity(reordered).1, a.hash);
    }

    #[test]
    fn ties_keep_first_found() {
        let mut pairs = sbs_pairs();
        // a second identical route through another intermediate asset
        pairs.push(pair("ADABTC", "ADA", "BTC", 0.00002, 0.0000199, NOW));
        pairs.push(pair("ADAETH", "ADA", "ETH", 0.00042, 0.000415, NOW));
        let chain = search(SwapType::Sbs, "ETH", 2.0, &pairs, params()).best.unwrap();
        assert_eq!(chain.swap_two.symbol, "XRPBTC");
    }
}
