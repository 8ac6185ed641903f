//! The exchange capability set the rebalancer is written against.
//!
//! Every call returns a tagged [`ExchangeResult`]. Callers decide the
//! substitute value on failure; implementations never fabricate defaults.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

use super::types::{AccountState, MarketOrder, OrderAck, SymbolLimits, Ticker24h};

/// Failure at the exchange boundary.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("exchange rejected request ({code}): {msg}")]
    Api { code: i64, msg: String },

    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("unknown symbol {0}")]
    UnknownSymbol(String),

    #[error("API credentials are not configured")]
    MissingCredentials,

    #[error("order rejected: {0}")]
    Rejected(String),
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Exchange operations consumed by the scanner and the rebalance cycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Cheap round trip used to validate connectivity at startup.
    async fn ping(&self) -> ExchangeResult<()>;

    /// Current equity and free margin.
    async fn get_account_state(&self) -> ExchangeResult<AccountState>;

    /// Last prices for the requested symbols.
    ///
    /// Symbols the venue has no price for are absent from the map.
    async fn get_prices(&self, symbols: &[String]) -> ExchangeResult<HashMap<String, Decimal>>;

    /// Signed position quantity per symbol; flat symbols are absent.
    async fn get_positions(&self) -> ExchangeResult<HashMap<String, Decimal>>;

    /// Order constraints for a symbol, cached by the implementation.
    async fn get_symbol_limits(&self, symbol: &str) -> ExchangeResult<SymbolLimits>;

    /// Submit an immediate-execution market order.
    async fn submit_order(&self, order: &MarketOrder) -> ExchangeResult<OrderAck>;

    /// Last funding rate per perpetual symbol.
    async fn get_funding_rates(&self) -> ExchangeResult<HashMap<String, Decimal>>;

    /// 24h statistics for every listed contract.
    async fn get_24h_tickers(&self) -> ExchangeResult<Vec<Ticker24h>>;

    /// Set account leverage for a symbol.
    async fn set_leverage(&self, symbol: &str, leverage: u8) -> ExchangeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ExchangeError::Api {
            code: -2019,
            msg: "Margin is insufficient.".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "exchange rejected request (-2019): Margin is insufficient."
        );
        assert_eq!(
            ExchangeError::UnknownSymbol("FOOUSDT".into()).to_string(),
            "unknown symbol FOOUSDT"
        );
    }
}
