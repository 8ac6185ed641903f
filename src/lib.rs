//! # Futures Rebalancer
//!
//! Keeps a portfolio of leveraged USDT-M futures positions on Binance close to
//! target exposures, behind an account-level hard stop.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Exchange gateway trait, Binance REST client and paper exchange
//! - `strategy`: Coin scanning, exposure planning, order sizing and the cycle driver
//! - `risk`: Hard stop, order validation and structured alerts
//! - `scheduler`: Fixed-period cycle loop with cooperative shutdown
//! - `persistence`: SQLite trade journal
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod exchange;
pub mod persistence;
pub mod risk;
pub mod scheduler;
pub mod strategy;
pub mod utils;

pub use config::Config;
