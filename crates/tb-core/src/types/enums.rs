//! Enumerations used throughout the trading engine.
//!
//! Exchange-facing enums carry `as_str()` / `parse()` helpers that map 1:1 to
//! the Binance wire strings (`"BUY"`, `"PARTIALLY_FILLED"`, ...).

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Order side
// ---------------------------------------------------------------------------

/// Buy or sell direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Binance wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Bot-owned order status
// ---------------------------------------------------------------------------

/// Lifecycle of a bot-owned [`Order`](crate::trading::Order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Opened,
    Closed,
}

// ---------------------------------------------------------------------------
// Exchange order status
// ---------------------------------------------------------------------------

/// Status of the remote exchange order, unified across endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    PendingCancel,
}

impl ExchangeOrderStatus {
    /// Map a Binance order status string.
    ///
    /// Unknown strings map to `New` so that the watchdog keeps polling.
    pub fn parse(status: &str) -> Self {
        match status {
            "NEW" => Self::New,
            "PARTIALLY_FILLED" => Self::PartiallyFilled,
            "FILLED" => Self::Filled,
            "CANCELED" => Self::Canceled,
            "REJECTED" => Self::Rejected,
            "EXPIRED" | "EXPIRED_IN_MATCH" => Self::Expired,
            "PENDING_CANCEL" => Self::PendingCancel,
            _ => Self::New,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
            Self::PendingCancel => "PENDING_CANCEL",
        }
    }

    /// No further fills can happen once the order reaches one of these.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected | Self::Expired)
    }

    /// Canceled, expired or rejected: the order left the book unfilled
    /// (possibly with a partial fill).
    pub fn is_dead(self) -> bool {
        matches!(self, Self::Canceled | Self::Rejected | Self::Expired)
    }
}

impl std::fmt::Display for ExchangeOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time in force for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

impl TimeInForce {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gtc => "GTC",
            Self::Ioc => "IOC",
            Self::Fok => "FOK",
        }
    }
}

// ---------------------------------------------------------------------------
// Swap enums
// ---------------------------------------------------------------------------

/// Leg-operation pattern of a three-leg swap chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapType {
    /// Sell → Buy → Sell.
    Sbs,
    /// Sell → Buy → Buy.
    Sbb,
    /// Sell → Sell → Buy.
    Ssb,
}

impl SwapType {
    pub const ALL: [SwapType; 3] = [SwapType::Sbs, SwapType::Sbb, SwapType::Ssb];

    /// Operation performed at leg `level` (0, 1 or 2).
    pub fn operation(self, level: u8) -> Side {
        match (self, level) {
            (_, 0) => Side::Sell,
            (Self::Ssb, 1) => Side::Sell,
            (_, 1) => Side::Buy,
            (Self::Sbs, _) => Side::Sell,
            (_, _) => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sbs => "SBS",
            Self::Sbb => "SBB",
            Self::Ssb => "SSB",
        }
    }
}

impl std::fmt::Display for SwapType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall status of a [`SwapAction`](crate::swap::SwapAction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapActionStatus {
    Pending,
    Process,
    Success,
    Canceled,
}

impl SwapActionStatus {
    /// Pending or in process.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Process)
    }
}
