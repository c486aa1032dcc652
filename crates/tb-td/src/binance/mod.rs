//! Binance trading module.
//!
//! Implements the [`Exchange`](crate::Exchange) trait for the Binance spot
//! market over signed REST.
//!
//! # Architecture
//!
//! ```text
//! BinanceTd
//! ├── SpotClient        (REST transport, HMAC signing)
//! └── parse_* helpers   (Binance JSON → tb-core types)
//! ```
//!
//! Binance encodes prices and quantities as decimal strings; they are parsed
//! into `f64` here and formatted back with [`format_decimal`] on the way out.

pub mod auth;
pub mod config;
pub mod spot;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tb_core::enums::{ExchangeOrderStatus, Side};
use tb_core::error::TbError;
use tb_core::format;
use tb_core::market_data::{Candle, OrderBook, PriceLevel, SymbolInfo, Ticker};
use tb_core::trading::{AssetBalance, ExchangeOrder};
use tracing::{info, warn};
use uuid::Uuid;

use self::config::BinanceTdConfig;
use self::spot::SpotClient;
use crate::{Commission, Exchange, LimitOrderRequest};

/// Binance spot exchange client.
pub struct BinanceTd {
    spot: SpotClient,
}

impl BinanceTd {
    pub fn new(config: BinanceTdConfig) -> Result<Self> {
        if config.api_key.is_empty() || config.secret_key.is_empty() {
            warn!("[binance-td] API credentials missing, signed requests will be rejected");
        }
        let spot = SpotClient::new(
            config.api_key,
            config.secret_key,
            config.rest_url,
            config.recv_window,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self { spot })
    }
}

#[async_trait]
impl Exchange for BinanceTd {
    async fn place_limit_order(&self, request: &LimitOrderRequest) -> Result<ExchangeOrder> {
        let client_order_id = Uuid::new_v4().simple().to_string();
        let resp = self
            .spot
            .place_order(
                &request.symbol,
                request.side.as_str(),
                &format_decimal(request.quantity),
                &format_decimal(request.price),
                request.time_in_force.as_str(),
                &client_order_id,
            )
            .await?;

        let order = parse_order(&resp)?;
        info!(
            "[binance-td] order placed: {} {} qty={} price={} → id={} status={}",
            request.symbol,
            request.side,
            request.quantity,
            request.price,
            order.order_id,
            order.status,
        );
        Ok(order)
    }

    async fn query_order(&self, symbol: &str, order_id: u64) -> Result<ExchangeOrder> {
        let resp = self.spot.get_order(symbol, order_id).await?;
        parse_order(&resp)
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<ExchangeOrder> {
        let resp = self.spot.cancel_order(symbol, order_id).await?;
        let order = parse_order(&resp)?;
        info!(
            "[binance-td] order cancelled: {symbol} id={order_id} executed={}",
            order.executed_qty
        );
        Ok(order)
    }

    async fn order_commission(&self, symbol: &str, order_id: u64) -> Result<Commission> {
        let resp = self.spot.get_my_trades(symbol, order_id).await?;
        parse_trades_commission(&resp)
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<ExchangeOrder>> {
        let resp = self.spot.get_open_orders(symbol).await?;
        let arr =
            resp.as_array().ok_or_else(|| TbError::Parse("openOrders: expected array".into()))?;
        arr.iter().map(parse_order).collect()
    }

    async fn depth(&self, symbol: &str, limit: u32) -> Result<OrderBook> {
        let resp = self.spot.get_depth(symbol, limit).await?;
        parse_depth(symbol, &resp)
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let resp = self.spot.get_klines(symbol, interval, limit).await?;
        parse_klines(symbol, interval, &resp)
    }

    async fn balances(&self) -> Result<Vec<AssetBalance>> {
        let resp = self.spot.get_account_info().await?;
        parse_balances(&resp)
    }

    async fn tickers(&self) -> Result<Vec<Ticker>> {
        let resp = self.spot.get_tickers().await?;
        let arr =
            resp.as_array().ok_or_else(|| TbError::Parse("ticker/24hr: expected array".into()))?;
        Ok(arr.iter().filter_map(parse_ticker).collect())
    }

    async fn symbols(&self) -> Result<Vec<SymbolInfo>> {
        let resp = self.spot.get_exchange_info().await?;
        let symbols = parse_exchange_info(&resp);
        info!("[binance-td] loaded {} trading symbols", symbols.len());
        Ok(symbols)
    }
}

// ---------------------------------------------------------------------------
// JSON → typed helpers
// ---------------------------------------------------------------------------

/// Format a price or quantity for the wire: at most 8 decimals, no exponent.
pub fn format_decimal(value: f64) -> String {
    format!("{}", format::round_to(value, 8))
}

fn str_f64(v: &serde_json::Value, key: &str) -> Option<f64> {
    v.get(key)?.as_str()?.parse().ok()
}

fn parse_err(what: &str, v: &serde_json::Value) -> anyhow::Error {
    TbError::Parse(format!("{what}: {v}")).into()
}

/// Parse a Binance order object (place/query/cancel/openOrders responses).
///
/// Commission is summed from `fills` when present (FULL placement responses).
pub fn parse_order(v: &serde_json::Value) -> Result<ExchangeOrder> {
    let symbol =
        v.get("symbol").and_then(|s| s.as_str()).ok_or_else(|| parse_err("order.symbol", v))?;
    let order_id =
        v.get("orderId").and_then(|s| s.as_u64()).ok_or_else(|| parse_err("order.orderId", v))?;
    let side = v
        .get("side")
        .and_then(|s| s.as_str())
        .and_then(Side::parse)
        .ok_or_else(|| parse_err("order.side", v))?;
    let status = v
        .get("status")
        .and_then(|s| s.as_str())
        .map(ExchangeOrderStatus::parse)
        .ok_or_else(|| parse_err("order.status", v))?;

    let Commission { amount: commission, asset: commission_asset } = v
        .get("fills")
        .and_then(|f| f.as_array())
        .map(|fills| sum_commission(fills.as_slice()))
        .unwrap_or_default();

    let transact_time = ["transactTime", "time", "updateTime"]
        .iter()
        .find_map(|k| v.get(*k).and_then(|t| t.as_u64()))
        .unwrap_or(0);

    Ok(ExchangeOrder {
        order_id,
        client_order_id: v
            .get("clientOrderId")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string(),
        symbol: symbol.to_string(),
        side,
        status,
        price: str_f64(v, "price").unwrap_or(0.0),
        orig_qty: str_f64(v, "origQty").unwrap_or(0.0),
        executed_qty: str_f64(v, "executedQty").unwrap_or(0.0),
        commission,
        commission_asset,
        transact_time,
    })
}

/// Parse a `/api/v3/myTrades` response into the order's total commission.
pub fn parse_trades_commission(v: &serde_json::Value) -> Result<Commission> {
    let trades = v.as_array().ok_or_else(|| parse_err("myTrades", v))?;
    Ok(sum_commission(trades))
}

/// Placement `fills` and `myTrades` rows share the commission fields.
fn sum_commission(rows: &[serde_json::Value]) -> Commission {
    let mut total = Commission::default();
    for row in rows {
        total.amount += str_f64(row, "commission").unwrap_or(0.0);
        if total.asset.is_none() {
            total.asset = row.get("commissionAsset").and_then(|a| a.as_str()).map(str::to_string);
        }
    }
    total
}

fn parse_levels(v: &serde_json::Value) -> Vec<PriceLevel> {
    v.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|lvl| {
                    let price = lvl.get(0)?.as_str()?.parse().ok()?;
                    let quantity = lvl.get(1)?.as_str()?.parse().ok()?;
                    Some(PriceLevel { price, quantity })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a `/api/v3/depth` snapshot.
pub fn parse_depth(symbol: &str, v: &serde_json::Value) -> Result<OrderBook> {
    let bids = v.get("bids").ok_or_else(|| parse_err("depth.bids", v))?;
    let asks = v.get("asks").ok_or_else(|| parse_err("depth.asks", v))?;
    Ok(OrderBook {
        symbol: symbol.to_string(),
        bids: parse_levels(bids),
        asks: parse_levels(asks),
        update_id: v.get("lastUpdateId").and_then(|u| u.as_u64()).unwrap_or(0),
    })
}

/// Parse `/api/v3/klines` rows:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`.
pub fn parse_klines(symbol: &str, interval: &str, v: &serde_json::Value) -> Result<Vec<Candle>> {
    let rows = v.as_array().ok_or_else(|| parse_err("klines", v))?;
    rows.iter()
        .map(|row| {
            let num = |i: usize| {
                row.get(i).and_then(|x| x.as_str()).and_then(|s| s.parse::<f64>().ok())
            };
            let open_time = row
                .get(0)
                .and_then(|t| t.as_u64())
                .ok_or_else(|| parse_err("kline.openTime", row))?;
            let candle = Candle {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
                open_time,
                open: num(1).ok_or_else(|| parse_err("kline.open", row))?,
                high: num(2).ok_or_else(|| parse_err("kline.high", row))?,
                low: num(3).ok_or_else(|| parse_err("kline.low", row))?,
                close: num(4).ok_or_else(|| parse_err("kline.close", row))?,
                volume: num(5).unwrap_or(0.0),
                close_time: row.get(6).and_then(|t| t.as_u64()).unwrap_or(0),
            };
            Ok(candle)
        })
        .collect()
}

/// Parse the `balances` array of `/api/v3/account`, dropping empty assets.
pub fn parse_balances(v: &serde_json::Value) -> Result<Vec<AssetBalance>> {
    let arr = v
        .get("balances")
        .and_then(|b| b.as_array())
        .ok_or_else(|| parse_err("account.balances", v))?;
    Ok(arr
        .iter()
        .filter_map(|b| {
            let asset = b.get("asset")?.as_str()?.to_string();
            let free = str_f64(b, "free")?;
            let locked = str_f64(b, "locked").unwrap_or(0.0);
            (free > 0.0 || locked > 0.0).then_some(AssetBalance { asset, free, locked })
        })
        .collect())
}

/// Parse one `/api/v3/ticker/24hr` entry. Entries without a book are skipped.
pub fn parse_ticker(v: &serde_json::Value) -> Option<Ticker> {
    let bid_price = str_f64(v, "bidPrice")?;
    let ask_price = str_f64(v, "askPrice")?;
    if bid_price <= 0.0 || ask_price <= 0.0 {
        return None;
    }
    Some(Ticker {
        symbol: v.get("symbol")?.as_str()?.to_string(),
        bid_price,
        ask_price,
        last_price: str_f64(v, "lastPrice").unwrap_or(0.0),
        price_change_percent: str_f64(v, "priceChangePercent").unwrap_or(0.0),
        close_time: v.get("closeTime").and_then(|t| t.as_u64()).unwrap_or(0),
    })
}

/// Parse the `symbols` array of `/api/v3/exchangeInfo`.
///
/// Only symbols in `TRADING` status with a usable price filter are kept.
pub fn parse_exchange_info(info: &serde_json::Value) -> Vec<SymbolInfo> {
    let Some(symbols) = info.get("symbols").and_then(|s| s.as_array()) else {
        return Vec::new();
    };

    symbols
        .iter()
        .filter_map(|sym| {
            if sym.get("status").and_then(|s| s.as_str()) != Some("TRADING") {
                return None;
            }
            let filters = sym.get("filters")?.as_array()?;
            let filter = |kind: &str, key: &str| {
                filters
                    .iter()
                    .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(kind))
                    .and_then(|f| str_f64(f, key))
            };

            let tick_size = filter("PRICE_FILTER", "tickSize").filter(|t| *t > 0.0)?;
            Some(SymbolInfo {
                symbol: sym.get("symbol")?.as_str()?.to_string(),
                base_asset: sym.get("baseAsset")?.as_str()?.to_string(),
                quote_asset: sym.get("quoteAsset")?.as_str()?.to_string(),
                tick_size,
                step_size: filter("LOT_SIZE", "stepSize").unwrap_or(0.0),
                min_notional: filter("NOTIONAL", "minNotional")
                    .or_else(|| filter("MIN_NOTIONAL", "minNotional"))
                    .unwrap_or(0.0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_order_response() {
        let v = json!({
            "symbol": "ETHUSDT", "orderId": 28, "clientOrderId": "abc",
            "transactTime": 1507725176595u64, "price": "2000.00", "origQty": "0.50000000",
            "executedQty": "0.25000000", "status": "PARTIALLY_FILLED", "side": "BUY",
            "fills": [
                {
                    "price": "2000.00", "qty": "0.1",
                    "commission": "0.0001", "commissionAsset": "ETH"
                },
                {
                    "price": "2000.00", "qty": "0.15",
                    "commission": "0.00015", "commissionAsset": "ETH"
                }
            ]
        });
        let order = parse_order(&v).unwrap();
        assert_eq!(order.order_id, 28);
        assert_eq!(order.side, Side::Buy);
        assert!(order.is_partially_filled());
        assert!((order.commission - 0.00025).abs() < 1e-12);
        assert_eq!(order.commission_asset.as_deref(), Some("ETH"));
        assert_eq!(order.transact_time, 1507725176595);
    }

    #[test]
    fn parses_query_order_time_field() {
        let v = json!({
            "symbol": "ETHUSDT", "orderId": 1, "clientOrderId": "x", "price": "1.0",
            "origQty": "1.0", "executedQty": "0.0", "status": "NEW", "side": "SELL", "time": 42
        });
        let order = parse_order(&v).unwrap();
        assert_eq!(order.transact_time, 42);
        assert_eq!(order.commission, 0.0);
    }

    #[test]
    fn sums_trade_commissions() {
        let v = json!([
            {
                "symbol": "ETHUSDT", "orderId": 1, "qty": "0.2",
                "commission": "0.0002", "commissionAsset": "ETH"
            },
            {
                "symbol": "ETHUSDT", "orderId": 1, "qty": "0.3",
                "commission": "0.0003", "commissionAsset": "ETH"
            }
        ]);
        let commission = parse_trades_commission(&v).unwrap();
        assert!((commission.amount - 0.0005).abs() < 1e-12);
        assert_eq!(commission.asset.as_deref(), Some("ETH"));

        assert_eq!(parse_trades_commission(&json!([])).unwrap(), Commission::default());
        assert!(parse_trades_commission(&json!({ "code": -1 })).is_err());
    }

    #[test]
    fn rejects_order_without_id() {
        assert!(parse_order(&json!({ "symbol": "ETHUSDT" })).is_err());
    }

    #[test]
    fn parses_depth_and_klines() {
        let depth = json!({
            "lastUpdateId": 7,
            "bids": [["100.0", "1.0"], ["99.5", "2.0"]],
            "asks": [["100.5", "1.0"]]
        });
        let book = parse_depth("BTCUSDT", &depth).unwrap();
        assert_eq!(book.best_bid(), Some(100.0));
        assert_eq!(book.best_ask(), Some(100.5));
        assert_eq!(book.update_id, 7);

        let rows = json!([[1000, "1.0", "2.0", "0.5", "1.5", "10.0", 1999, "0", 0, "0", "0", "0"]]);
        let candles = parse_klines("BTCUSDT", "1h", &rows).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].high, 2.0);
        assert_eq!(candles[0].close_time, 1999);
    }

    #[test]
    fn parses_balances_and_tickers() {
        let account = json!({ "balances": [
            { "asset": "BTC", "free": "0.5", "locked": "0.0" },
            { "asset": "LTC", "free": "0.0", "locked": "0.0" }
        ]});
        let balances = parse_balances(&account).unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].asset, "BTC");

        let ticker = parse_ticker(&json!({
            "symbol": "ETHBTC", "bidPrice": "0.05", "askPrice": "0.051",
            "lastPrice": "0.0505", "priceChangePercent": "-1.2", "closeTime": 5
        }))
        .unwrap();
        assert_eq!(ticker.price_change_percent, -1.2);
        let empty = json!({ "symbol": "X", "bidPrice": "0", "askPrice": "0" });
        assert!(parse_ticker(&empty).is_none());
    }

    #[test]
    fn parses_exchange_info_filters() {
        let info = json!({ "symbols": [
            {
                "symbol": "ETHBTC", "status": "TRADING", "baseAsset": "ETH", "quoteAsset": "BTC",
                "filters": [
                    { "filterType": "PRICE_FILTER", "tickSize": "0.00001000" },
                    { "filterType": "LOT_SIZE", "stepSize": "0.00010000" },
                    { "filterType": "NOTIONAL", "minNotional": "0.00010000" }
                ]
            },
            {
                "symbol": "OLDBTC", "status": "BREAK", "baseAsset": "OLD", "quoteAsset": "BTC",
                "filters": []
            }
        ]});
        let symbols = parse_exchange_info(&info);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].tick_size, 0.00001);
        assert_eq!(symbols[0].step_size, 0.0001);
        assert_eq!(symbols[0].min_notional, 0.0001);
    }

    #[test]
    fn decimal_formatting() {
        assert_eq!(format_decimal(0.1 + 0.2), "0.3");
        assert_eq!(format_decimal(0.00000001), "0.00000001");
        assert_eq!(format_decimal(2000.0), "2000");
    }
}
