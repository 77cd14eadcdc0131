//! Tessera Core Library
//!
//! Network constants, budget parameters, and the chain-view boundary the
//! governance engine reads fee transactions and block heights through.

pub mod chain;
pub mod constants;
pub mod params;

pub use chain::{ChainView, FeeTx, MemoryChain};
pub use params::BudgetParams;
