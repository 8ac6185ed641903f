//! Rebalancing strategy.
//!
//! Contains the core logic for:
//! - Coin selection from market liquidity
//! - Exposure planning across the selected coins
//! - Order sizing against thresholds and venue limits
//! - The per-cycle rebalance driver

mod planner;
mod rebalancer;
mod scanner;
mod sizer;

pub use planner::{AllocationPlan, ExposurePlanner, SymbolTarget, WeightTable};
pub use rebalancer::{CycleReport, RebalanceOrchestrator, SymbolOutcome};
pub use scanner::MarketScanner;
pub use sizer::{OrderSizer, SizingOutcome, SkipReason, TradeDecision};
