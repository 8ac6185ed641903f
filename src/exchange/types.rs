//! Type definitions for the exchange boundary and Binance API responses.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::decimal::{round_down_to_lot, truncate_to_precision};

// ==================== Gateway Types ====================

/// Account-level figures the rebalancer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountState {
    /// Total margin balance (wallet balance + unrealized PnL) in USDT
    pub equity: Decimal,
    /// Margin still available for new positions in USDT
    pub free_margin: Decimal,
}

/// Venue-imposed order constraints for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolLimits {
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    /// Smallest order value accepted by the venue
    pub min_notional: Decimal,
    /// Number of decimal places allowed in the order quantity
    pub quantity_precision: u32,
    /// Quantity increment (zero when only the precision applies)
    pub step_size: Decimal,
}

impl SymbolLimits {
    /// Limits used when the venue's own cannot be fetched.
    ///
    /// Small enough to let ordinary rebalances through, bounded so a bad
    /// lookup never permits unlimited size or a zero notional floor.
    pub fn conservative() -> Self {
        Self {
            min_quantity: dec!(0.001),
            max_quantity: dec!(1_000_000),
            min_notional: dec!(5),
            quantity_precision: 3,
            step_size: dec!(0.001),
        }
    }

    /// Round a quantity down to what the venue accepts.
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        let stepped = round_down_to_lot(quantity, self.step_size);
        truncate_to_precision(stepped, self.quantity_precision)
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immediate-execution market order request.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Client-chosen identifier, recorded in the trade journal
    pub client_order_id: Option<String>,
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    ExpiredInMatch,
}

/// Exchange acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: i64,
    pub symbol: String,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    /// Average fill price (zero when the venue has not reported one yet)
    pub avg_price: Decimal,
}

// ==================== Binance Wire Types ====================

/// Server time, used as a connectivity check.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

/// Error body returned by Binance on rejected requests.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

/// Futures account summary (`/fapi/v2/account`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesAccount {
    #[serde(with = "rust_decimal::serde::str")]
    pub total_margin_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub available_balance: Decimal,
}

/// Latest trade price for a symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerPrice {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// Futures position information (`/fapi/v2/positionRisk`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub position_amt: Decimal,
}

/// Exchange information for futures.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesExchangeInfo {
    pub symbols: Vec<FuturesSymbolInfo>,
}

/// Symbol information for futures.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesSymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub contract_type: String,
    pub status: String,
    pub quantity_precision: u32,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// Order filters attached to a futures symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        #[serde(with = "rust_decimal::serde::str")]
        min_qty: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        max_qty: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        step_size: Decimal,
    },
    #[serde(rename = "MARKET_LOT_SIZE", rename_all = "camelCase")]
    MarketLotSize {
        #[serde(with = "rust_decimal::serde::str")]
        min_qty: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        max_qty: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        step_size: Decimal,
    },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional {
        #[serde(with = "rust_decimal::serde::str")]
        notional: Decimal,
    },
    #[serde(other)]
    Other,
}

impl FuturesSymbolInfo {
    /// Perpetual contract currently open for trading.
    pub fn is_tradable_perpetual(&self) -> bool {
        self.status == "TRADING" && self.contract_type == "PERPETUAL"
    }

    /// Derive market-order limits from the symbol's filters.
    ///
    /// Market orders are bound by `MARKET_LOT_SIZE` when present, otherwise by
    /// `LOT_SIZE`. Missing filters fall back to the conservative defaults.
    pub fn market_limits(&self) -> SymbolLimits {
        let fallback = SymbolLimits::conservative();
        let mut limits = SymbolLimits {
            quantity_precision: self.quantity_precision,
            ..fallback
        };

        let mut market_lot = None;
        for filter in &self.filters {
            match filter {
                SymbolFilter::LotSize {
                    min_qty,
                    max_qty,
                    step_size,
                } => {
                    limits.min_quantity = *min_qty;
                    limits.max_quantity = *max_qty;
                    limits.step_size = *step_size;
                }
                SymbolFilter::MarketLotSize {
                    min_qty,
                    max_qty,
                    step_size,
                } => market_lot = Some((*min_qty, *max_qty, *step_size)),
                SymbolFilter::MinNotional { notional } => limits.min_notional = *notional,
                SymbolFilter::Other => {}
            }
        }

        if let Some((min_qty, max_qty, step_size)) = market_lot {
            if max_qty > Decimal::ZERO {
                limits.min_quantity = min_qty;
                limits.max_quantity = max_qty;
                if step_size > Decimal::ZERO {
                    limits.step_size = step_size;
                }
            }
        }

        limits
    }
}

/// Funding rate information for a perpetual contract (`/fapi/v1/premiumIndex`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRate {
    pub symbol: String,
    #[serde(rename = "lastFundingRate", with = "rust_decimal::serde::str")]
    pub funding_rate: Decimal,
}

/// 24-hour ticker statistics.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quote_volume: Decimal,
}

/// Order response from the exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub avg_price: Option<Decimal>,
}

impl From<OrderResponse> for OrderAck {
    fn from(response: OrderResponse) -> Self {
        Self {
            order_id: response.order_id,
            symbol: response.symbol,
            status: response.status,
            executed_qty: response.executed_qty,
            avg_price: response.avg_price.unwrap_or(Decimal::ZERO),
        }
    }
}
