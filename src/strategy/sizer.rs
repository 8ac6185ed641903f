//! Order sizing against the hysteresis band and venue limits.

use crate::exchange::{OrderSide, SymbolLimits};
use rust_decimal::Decimal;
use std::fmt;
use tracing::debug;

/// Why no order was produced for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Deviation inside the hysteresis band
    BelowThreshold,
    /// Absolute deviation smaller than the global minimum trade
    BelowMinOrderValue,
    /// Price not positive
    InvalidPrice,
    /// Quantity below the venue minimum (before or after rounding)
    BelowMinQuantity,
    /// Notional after clipping below the venue minimum
    BelowMinNotional,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::BelowThreshold => "below_threshold",
            SkipReason::BelowMinOrderValue => "below_min_order_value",
            SkipReason::InvalidPrice => "invalid_price",
            SkipReason::BelowMinQuantity => "below_min_quantity",
            SkipReason::BelowMinNotional => "below_min_notional",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sized order, consumed immediately by the cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeDecision {
    pub symbol: String,
    pub side: OrderSide,
    /// Positive quantity within the venue's [min, max]
    pub quantity: Decimal,
    pub price: Decimal,
    /// quantity * price
    pub notional: Decimal,
    /// current - target, before clipping
    pub diff_value: Decimal,
    /// Whether the quantity was cut to the venue maximum
    pub clipped: bool,
}

/// Result of sizing one symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum SizingOutcome {
    Trade(TradeDecision),
    Skip(SkipReason),
}

/// Converts a value deviation into an order quantity.
#[derive(Debug, Clone)]
pub struct OrderSizer {
    /// Relative deviation required before trading (0.05 = 5%)
    rebalance_threshold: Decimal,
    /// Global minimum trade value in USDT
    min_order_value: Decimal,
}

impl OrderSizer {
    pub fn new(rebalance_threshold: Decimal, min_order_value: Decimal) -> Self {
        Self {
            rebalance_threshold,
            min_order_value,
        }
    }

    /// Size the trade that moves `current_value` toward `target_value`.
    pub fn size(
        &self,
        symbol: &str,
        current_value: Decimal,
        target_value: Decimal,
        price: Decimal,
        limits: &SymbolLimits,
    ) -> SizingOutcome {
        // Positive = overweight (sell), negative = underweight (buy)
        let diff_value = current_value - target_value;
        let denominator = if target_value > Decimal::ZERO {
            target_value
        } else {
            Decimal::ONE
        };
        let diff_pct = diff_value / denominator;

        if diff_pct.abs() < self.rebalance_threshold {
            return self.skip(symbol, SkipReason::BelowThreshold, diff_value);
        }
        if diff_value.abs() < self.min_order_value {
            return self.skip(symbol, SkipReason::BelowMinOrderValue, diff_value);
        }
        if price <= Decimal::ZERO {
            return self.skip(symbol, SkipReason::InvalidPrice, diff_value);
        }

        let mut quantity = diff_value.abs() / price;
        if quantity < limits.min_quantity {
            return self.skip(symbol, SkipReason::BelowMinQuantity, diff_value);
        }

        let clipped = quantity > limits.max_quantity;
        if clipped {
            debug!(%symbol, %quantity, max = %limits.max_quantity, "Clipping to max quantity");
            quantity = limits.max_quantity;
        }

        quantity = limits.round_quantity(quantity);
        if quantity <= Decimal::ZERO || quantity < limits.min_quantity {
            return self.skip(symbol, SkipReason::BelowMinQuantity, diff_value);
        }

        let notional = quantity * price;
        if notional < limits.min_notional {
            return self.skip(symbol, SkipReason::BelowMinNotional, diff_value);
        }

        let side = if diff_value < Decimal::ZERO {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };

        SizingOutcome::Trade(TradeDecision {
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            notional,
            diff_value,
            clipped,
        })
    }

    fn skip(&self, symbol: &str, reason: SkipReason, diff_value: Decimal) -> SizingOutcome {
        debug!(%symbol, %reason, %diff_value, "Sizing skipped");
        SizingOutcome::Skip(reason)
    }
}
