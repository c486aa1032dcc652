//! Engine error taxonomy.
//!
//! | Class       | Variant(s)                                | Handling                        |
//! |-------------|-------------------------------------------|---------------------------------|
//! | balance     | `InsufficientBalance`                     | notifier alert, aborted         |
//! | validation  | `Validation`, `LossSell`, `BelowMinClose` | abort before any network call   |
//! | ownership   | `SwapInProgress`                          | retried once the swap ends      |
//! | pricing     | `FrameNotFound`, `PriceUnknown`           | logged, retried next cycle      |
//! | swap chain  | `SwapChain(SwapChainError)`               | chain discarded, fresh search   |
//! | persistence | `DuplicateExternalId`                     | stale mirror entry deleted      |
//! | exchange    | `Exchange(anyhow::Error)`                 | retry decided by `TbError`      |

use thiserror::Error;

/// Reasons a swap chain is rejected before capital is committed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SwapChainError {
    #[error("swap percent {percent:.2} is below minimum {min:.2}")]
    PercentTooLow { percent: f64, min: f64 },

    #[error("price of {symbol} is unknown")]
    PriceUnknown { symbol: String },

    #[error("price of {symbol} is expired")]
    PriceExpired { symbol: String },

    #[error("price of {symbol} moved: recorded {recorded}, live {live}")]
    PriceMoved { symbol: String, recorded: f64, live: f64 },

    #[error("notional {notional} of {symbol} is below minimum {min}")]
    NotionalTooLow { symbol: String, notional: f64, min: f64 },

    #[error("price {price} of {symbol} is implausible on daily history")]
    ImplausibleHistory { symbol: String, price: f64 },
}

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient balance of {asset}: available {available}, required {required}")]
    InsufficientBalance { asset: String, available: f64, required: f64 },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("loss sell rejected: price {price} <= opened price {opened}")]
    LossSell { price: f64, opened: f64 },

    #[error("price {price} is below minimum close price {min_close}")]
    BelowMinClose { price: f64, min_close: f64 },

    #[error("order {0} is being swapped")]
    SwapInProgress(i64),

    #[error("buys on {0} are temporarily locked")]
    BuyLocked(String),

    #[error("frame not found for {0}")]
    FrameNotFound(String),

    #[error("current price unknown for {0}")]
    PriceUnknown(String),

    #[error("swap chain rejected: {0}")]
    SwapChain(#[from] SwapChainError),

    #[error("duplicate external id {0}")]
    DuplicateExternalId(u64),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("order {order_id} on {symbol} was canceled ({reason})")]
    OrderCanceled { symbol: String, order_id: u64, reason: String },

    #[error("position rerouted through swap action {action_id}")]
    RoutedToSwap { action_id: i64 },

    #[error("engine is shutting down")]
    Shutdown,

    #[error(transparent)]
    Exchange(#[from] anyhow::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// The exchange reported that the order does not exist.
    pub fn is_unknown_order(&self) -> bool {
        matches!(self, Self::Exchange(e) if tb_core::error::is_unknown_order(e))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
