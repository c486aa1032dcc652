//! Binance trading module configuration.
//!
//! Holds API credentials, the REST endpoint and request timing. Only
//! `api_key` and `secret_key` need to be specified; the rest has production
//! defaults.

use serde::Deserialize;

/// Configuration for the Binance spot client.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceTdConfig {
    /// Binance API key.
    pub api_key: String,

    /// Binance API secret (HMAC-SHA256 signing).
    pub secret_key: String,

    /// Spot REST API base URL.
    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    /// `recvWindow` for signed requests (milliseconds).
    #[serde(default = "default_recv_window")]
    pub recv_window: u64,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for BinanceTdConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            rest_url: default_rest_url(),
            recv_window: default_recv_window(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_rest_url() -> String {
    "https://api.binance.com".into()
}

fn default_recv_window() -> u64 {
    5000
}

fn default_request_timeout() -> u64 {
    10
}
