//! Market data structures: candles, order books, tickers and price frames.
//!
//! # Timestamp convention
//!
//! All timestamps are **milliseconds since Unix epoch**, as Binance reports them.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Candle (K-line)
// ---------------------------------------------------------------------------

/// One K-line bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub interval: String,
    pub open_time: u64,
    pub close_time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Close at or above open.
    pub fn is_positive(&self) -> bool {
        self.close >= self.open
    }
}

// ---------------------------------------------------------------------------
// Order book
// ---------------------------------------------------------------------------

/// A single price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Order book snapshot. `bids[0]` is the best (highest) bid, `asks[0]` the
/// best (lowest) ask.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub update_id: u64,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Mean price of the ask side, `None` if it is empty.
    pub fn avg_ask(&self) -> Option<f64> {
        if self.asks.is_empty() {
            return None;
        }
        Some(self.asks.iter().map(|l| l.price).sum::<f64>() / self.asks.len() as f64)
    }
}

// ---------------------------------------------------------------------------
// 24h ticker
// ---------------------------------------------------------------------------

/// Rolling 24h ticker, used to refresh swap pair prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub bid_price: f64,
    pub ask_price: f64,
    pub last_price: f64,
    pub price_change_percent: f64,
    pub close_time: u64,
}

// ---------------------------------------------------------------------------
// Symbol filters
// ---------------------------------------------------------------------------

/// Trading rules of one symbol, from the exchange's `exchangeInfo` filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// `PRICE_FILTER.tickSize`.
    pub tick_size: f64,
    /// `LOT_SIZE.stepSize`.
    pub step_size: f64,
    /// `NOTIONAL.minNotional` (or legacy `MIN_NOTIONAL`).
    pub min_notional: f64,
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Price band derived from recent candle highs and lows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub high: f64,
    pub low: f64,
    /// Mean high of bullish candles.
    pub avg_high: f64,
    /// Mean low of bearish candles.
    pub avg_low: f64,
}

impl Frame {
    /// Build a frame from a candle window. `None` for an empty window.
    pub fn from_candles(candles: &[Candle]) -> Option<Self> {
        if candles.is_empty() {
            return None;
        }

        let high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);

        let avg_high = mean(candles.iter().filter(|c| c.is_positive()).map(|c| c.high))
            .or_else(|| mean(candles.iter().map(|c| c.high)))?;
        let avg_low = mean(candles.iter().filter(|c| !c.is_positive()).map(|c| c.low))
            .or_else(|| mean(candles.iter().map(|c| c.low)))?;

        Some(Self { high, low, avg_high, avg_low })
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            interval: "2h".into(),
            open_time: 0,
            close_time: 0,
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn frame_from_mixed_candles() {
        let candles = vec![
            candle(100.0, 110.0, 95.0, 105.0), // bullish
            candle(105.0, 108.0, 90.0, 92.0),  // bearish
            candle(92.0, 104.0, 91.0, 100.0),  // bullish
        ];
        let frame = Frame::from_candles(&candles).unwrap();
        assert_eq!(frame.high, 110.0);
        assert_eq!(frame.low, 90.0);
        assert_eq!(frame.avg_high, 107.0);
        assert_eq!(frame.avg_low, 90.0);
    }

    #[test]
    fn frame_falls_back_to_all_candles() {
        let candles = vec![candle(100.0, 110.0, 95.0, 105.0)];
        let frame = Frame::from_candles(&candles).unwrap();
        assert_eq!(frame.avg_low, 95.0);
        assert!(Frame::from_candles(&[]).is_none());
    }

    #[test]
    fn avg_ask() {
        let book = OrderBook {
            symbol: "BTCUSDT".into(),
            bids: vec![],
            asks: vec![
                PriceLevel { price: 101.0, quantity: 1.0 },
                PriceLevel { price: 103.0, quantity: 1.0 },
            ],
            update_id: 1,
        };
        assert_eq!(book.avg_ask(), Some(102.0));
        assert_eq!(book.best_bid(), None);
    }
}
