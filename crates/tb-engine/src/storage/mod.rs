//! Persistence port implementations.

pub mod memory;

pub use memory::{MemoryOrderRepository, MemorySwapRepository};
