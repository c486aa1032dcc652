//! Order lifecycle: placement, watching and persistence.

pub mod executor;
pub mod watchdog;

pub use executor::{OrderExecutor, SwapRoute};
pub use watchdog::{CancelReason, WatchContext, WatchOutcome, WatchState, Watchdog};
