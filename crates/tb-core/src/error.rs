//! Typed error definitions shared by the exchange client and the engine.
//!
//! Provides [`TbError`] for errors that callers need to tell apart (an
//! authoritative exchange rejection vs. a transport hiccup). All variants
//! implement `std::error::Error` via `thiserror`, so they travel inside
//! `anyhow::Error` and can be recovered with `downcast_ref`.

use thiserror::Error;

/// Binance: "Unknown order sent."
pub const CODE_UNKNOWN_ORDER: i64 = -2011;

/// Binance: "Order does not exist."
pub const CODE_NO_SUCH_ORDER: i64 = -2013;

/// Domain-specific errors for the trading bot.
#[derive(Debug, Error)]
pub enum TbError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Exchange response parsing error.
    #[error("parse error: {0}")]
    Parse(String),

    /// The exchange rejected the request with an API error code.
    #[error("exchange error {code}: {msg}")]
    Exchange { code: i64, msg: String },

    /// Network or HTTP level failure; the request may be retried.
    #[error("transport error: {0}")]
    Transport(String),
}

impl TbError {
    /// The exchange says the order does not exist (terminal for a watchdog).
    pub fn is_unknown_order(&self) -> bool {
        matches!(
            self,
            Self::Exchange { code, .. }
                if *code == CODE_UNKNOWN_ORDER || *code == CODE_NO_SUCH_ORDER
        )
    }
}

/// `true` if `err` carries a [`TbError`] for a non-existent order.
pub fn is_unknown_order(err: &anyhow::Error) -> bool {
    err.downcast_ref::<TbError>().is_some_and(TbError::is_unknown_order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_order_detection() {
        let err = anyhow::Error::new(TbError::Exchange {
            code: -2013,
            msg: "Order does not exist.".into(),
        });
        assert!(is_unknown_order(&err));

        let err = anyhow::Error::new(TbError::Transport("timeout".into()));
        assert!(!is_unknown_order(&err));

        let err = anyhow::anyhow!("plain");
        assert!(!is_unknown_order(&err));
    }
}
