//! Exchange integrations for the futures rebalancer.
//!
//! ## Binance
//! REST connectivity for USDT-margined perpetuals:
//! - Market data (prices, funding rates, 24h tickers, symbol filters)
//! - Account operations (margin balance, positions, leverage, market orders)
//!
//! ## Paper trading
//! [`MockBinanceClient`] fills orders locally against fed prices.

mod client;
pub mod mock;
mod traits;
mod types;

pub use client::BinanceClient;
pub use mock::MockBinanceClient;
pub use traits::*;
pub use types::*;
