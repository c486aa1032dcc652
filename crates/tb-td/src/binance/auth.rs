//! Binance request signing.
//!
//! Signed endpoints (orders, account) take a `signature` parameter: the
//! HMAC-SHA256 of the URL-encoded query string, keyed by the API secret and
//! hex encoded.

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute an HMAC-SHA256 signature and return it as a lowercase hex string.
pub fn hmac_sha256_sign(secret: &str, message: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).context("invalid HMAC key")?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// URL-encode `params` joined with `&`.
pub fn encode_query(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build a URL-encoded, HMAC-SHA256–signed query string.
///
/// `params` must already include `timestamp`.
///
/// ```ignore
/// let params = [("symbol", "BTCUSDT"), ("timestamp", "1234567890")];
/// let query = build_signed_query(&params, "my_secret")?;
/// assert!(query.contains("signature="));
/// ```
pub fn build_signed_query(params: &[(&str, &str)], secret: &str) -> Result<String> {
    let query = encode_query(params);
    let signature = hmac_sha256_sign(secret, &query)?;
    Ok(format!("{query}&signature={signature}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_known_vector() {
        // Example from the Binance API documentation.
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let message = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1\
                       &price=0.1&recvWindow=5000&timestamp=1499827319559";
        let sig = hmac_sha256_sign(secret, message).unwrap();
        assert_eq!(sig, "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71");
    }

    #[test]
    fn build_signed_query_includes_signature() {
        let params = [("symbol", "BTCUSDT"), ("timestamp", "1234567890")];
        let query = build_signed_query(&params, "test_secret").unwrap();
        assert!(query.starts_with("symbol=BTCUSDT&timestamp=1234567890&signature="));
    }
}
