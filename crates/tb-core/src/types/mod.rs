//! Core data types, enums, market data and swap structures.

pub mod enums;
pub mod market_data;
pub mod swap;
pub mod trading;

pub use enums::*;
pub use market_data::*;
pub use swap::*;
pub use trading::*;
