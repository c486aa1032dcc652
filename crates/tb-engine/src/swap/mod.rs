//! Swap arbitrage: search, validation, action building and execution.
//!
//! ```text
//!  SwapPairRefresher ──► pairs ──► SwapFinder ──► SwapValidator ──► SwapBuilder
//!   (tickers)                      (SBS/SBB/SSB)   (live prices)     (action)
//!                                                                       │
//!                              SwapDriver ──► SwapExecutor ◄────────────┘
//!                          (one task per order)  (3 legs)
//! ```

pub mod builder;
pub mod driver;
pub mod executor;
pub mod finder;
pub mod pairs;
pub mod validator;

pub use builder::SwapBuilder;
pub use driver::SwapDriver;
pub use executor::{SwapExecutor, SwapOutcome};
pub use finder::SwapFinder;
pub use pairs::SwapPairRefresher;
pub use validator::SwapValidator;
