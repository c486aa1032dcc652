//! # tb-core
//!
//! Core crate for the trading bot, providing:
//!
//! - **Types** (`types`): enums, orders, exchange orders, trade limits,
//!   candles, order books, swap pairs/chains/actions
//! - **Configuration** (`config`): JSON config deserialization
//! - **Error types** (`error`): `TbError` via thiserror
//! - **Cache** (`cache`): bot-scoped typed cache keys and a TTL cache
//! - **Formatting** (`format`): tick-size rounding and percentage math
//! - **Time utilities** (`time_util`): millisecond timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
