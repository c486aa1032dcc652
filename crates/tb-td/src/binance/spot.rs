//! Binance Spot REST client.
//!
//! Thin transport layer: builds (and signs where required) each request,
//! maps HTTP/API failures to [`TbError`] and returns the raw JSON body.
//! Typed parsing lives in the parent module.
//!
//! # REST endpoints
//!
//! | Operation        | Method  | Path                  | Signed |
//! |------------------|---------|-----------------------|--------|
//! | Place order      | POST    | `/api/v3/order`       | yes    |
//! | Query order      | GET     | `/api/v3/order`       | yes    |
//! | Cancel order     | DELETE  | `/api/v3/order`       | yes    |
//! | Open orders      | GET     | `/api/v3/openOrders`  | yes    |
//! | Account info     | GET     | `/api/v3/account`     | yes    |
//! | Order book       | GET     | `/api/v3/depth`       | no     |
//! | Candles          | GET     | `/api/v3/klines`      | no     |
//! | 24h tickers      | GET     | `/api/v3/ticker/24hr` | no     |
//! | Exchange info    | GET     | `/api/v3/exchangeInfo`| no     |

use std::time::Duration;

use anyhow::Result;
use reqwest::{Method, StatusCode};
use tb_core::error::TbError;
use tracing::debug;

use super::auth;

/// Binance Spot account client.
pub struct SpotClient {
    http: reqwest::Client,
    /// API key (sent in `X-MBX-APIKEY` header).
    api_key: String,
    secret_key: String,
    /// REST base URL (e.g. `https://api.binance.com`).
    base_url: String,
    recv_window: u64,
}

impl SpotClient {
    pub fn new(
        api_key: String,
        secret_key: String,
        base_url: String,
        recv_window: u64,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, api_key, secret_key, base_url, recv_window })
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Place a LIMIT order and request the FULL response (includes fills).
    pub async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        quantity: &str,
        price: &str,
        time_in_force: &str,
        client_order_id: &str,
    ) -> Result<serde_json::Value> {
        let params = [
            ("symbol", symbol),
            ("side", side),
            ("type", "LIMIT"),
            ("timeInForce", time_in_force),
            ("quantity", quantity),
            ("price", price),
            ("newClientOrderId", client_order_id),
            ("newOrderRespType", "FULL"),
        ];
        self.signed(Method::POST, "/api/v3/order", &params).await
    }

    pub async fn get_order(&self, symbol: &str, order_id: u64) -> Result<serde_json::Value> {
        let id = order_id.to_string();
        self.signed(Method::GET, "/api/v3/order", &[("symbol", symbol), ("orderId", &id)]).await
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<serde_json::Value> {
        let id = order_id.to_string();
        self.signed(Method::DELETE, "/api/v3/order", &[("symbol", symbol), ("orderId", &id)]).await
    }

    /// Trades that filled `order_id`.
    pub async fn get_my_trades(&self, symbol: &str, order_id: u64) -> Result<serde_json::Value> {
        let id = order_id.to_string();
        self.signed(Method::GET, "/api/v3/myTrades", &[("symbol", symbol), ("orderId", &id)]).await
    }

    /// Query all open orders (optionally filtered by symbol).
    pub async fn get_open_orders(&self, symbol: Option<&str>) -> Result<serde_json::Value> {
        match symbol {
            Some(sym) => self.signed(Method::GET, "/api/v3/openOrders", &[("symbol", sym)]).await,
            None => self.signed(Method::GET, "/api/v3/openOrders", &[]).await,
        }
    }

    // -----------------------------------------------------------------------
    // Account / market data
    // -----------------------------------------------------------------------

    /// Query spot account information (balances, permissions).
    pub async fn get_account_info(&self) -> Result<serde_json::Value> {
        self.signed(Method::GET, "/api/v3/account", &[("omitZeroBalances", "true")]).await
    }

    pub async fn get_depth(&self, symbol: &str, limit: u32) -> Result<serde_json::Value> {
        let limit = limit.to_string();
        self.public("/api/v3/depth", &[("symbol", symbol), ("limit", &limit)]).await
    }

    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<serde_json::Value> {
        let limit = limit.to_string();
        let params = [("symbol", symbol), ("interval", interval), ("limit", &limit)];
        self.public("/api/v3/klines", &params).await
    }

    pub async fn get_tickers(&self) -> Result<serde_json::Value> {
        self.public("/api/v3/ticker/24hr", &[]).await
    }

    /// Fetch exchange info (symbol list, filters, etc.).
    pub async fn get_exchange_info(&self) -> Result<serde_json::Value> {
        self.public("/api/v3/exchangeInfo", &[]).await
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Send a signed request. `timestamp` and `recvWindow` are appended.
    async fn signed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value> {
        let timestamp = tb_core::time_util::now_ms().to_string();
        let recv_window = self.recv_window.to_string();
        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.push(("recvWindow", &recv_window));
        all.push(("timestamp", &timestamp));

        let query = auth::build_signed_query(&all, &self.secret_key)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!("[spot] {method} {path}");

        let request = self.http.request(method, &url).header("X-MBX-APIKEY", &self.api_key);
        Self::execute(request).await
    }

    async fn public(&self, path: &str, params: &[(&str, &str)]) -> Result<serde_json::Value> {
        let url = if params.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, auth::encode_query(params))
        };
        Self::execute(self.http.get(&url)).await
    }

    async fn execute(request: reqwest::RequestBuilder) -> Result<serde_json::Value> {
        let resp = request.send().await.map_err(|e| TbError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| TbError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(api_error(status, &body).into());
        }
        serde_json::from_str(&body).map_err(|e| TbError::Parse(format!("{e}: {body}")).into())
    }
}

/// Map a non-2xx response to a [`TbError`].
///
/// Binance reports API errors as `{"code": -2013, "msg": "..."}`. Anything
/// else (gateway errors, rate-limit pages) is treated as a transport failure.
fn api_error(status: StatusCode, body: &str) -> TbError {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok().and_then(|v| {
        let code = v.get("code")?.as_i64()?;
        let msg = v.get("msg")?.as_str()?.to_string();
        Some((code, msg))
    });

    match parsed {
        Some((code, msg)) if !status.is_server_error() => TbError::Exchange { code, msg },
        _ => TbError::Transport(format!("HTTP {status}: {body}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_mapping() {
        let body = r#"{"code":-2013,"msg":"Order does not exist."}"#;
        let err = api_error(StatusCode::BAD_REQUEST, body);
        assert!(err.is_unknown_order());

        let err = api_error(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert!(matches!(err, TbError::Transport(_)));
    }
}
