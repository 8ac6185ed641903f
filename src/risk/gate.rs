//! Account-level hard stop and last-line order validation.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::alert::{RiskAlert, RiskAlertType};
use crate::config::RiskConfig;
use crate::utils::decimal::safe_div;

/// Evaluates the hard-stop and minimum-order policies.
///
/// The stop level is measured against a fixed reference equity, not a
/// trailing peak, and is computed once at construction.
#[derive(Debug, Clone)]
pub struct RiskGate {
    reference_equity: Decimal,
    max_drawdown: Decimal,
    stop_loss_equity: Decimal,
    min_order_value: Decimal,
}

impl RiskGate {
    /// Create a gate from the reference equity and risk settings.
    pub fn new(reference_equity: Decimal, config: &RiskConfig) -> Self {
        let stop_loss_equity = reference_equity * (Decimal::ONE - config.max_drawdown);

        Self {
            reference_equity,
            max_drawdown: config.max_drawdown,
            stop_loss_equity,
            min_order_value: config.min_order_value,
        }
    }

    /// Equity below which all trading is skipped.
    pub fn stop_loss_equity(&self) -> Decimal {
        self.stop_loss_equity
    }

    pub fn min_order_value(&self) -> Decimal {
        self.min_order_value
    }

    /// Returns true when `current_equity` is strictly below the stop level.
    ///
    /// Emits a critical alert when triggered.
    pub fn check_hard_stop(&self, current_equity: Decimal) -> bool {
        if current_equity >= self.stop_loss_equity {
            return false;
        }

        let drawdown = safe_div(self.reference_equity - current_equity, self.reference_equity);

        RiskAlert::new(
            RiskAlertType::HardStop {
                equity: current_equity,
                stop_loss_equity: self.stop_loss_equity,
            },
            format!(
                "Equity {} below hard stop {} ({}% max drawdown)",
                current_equity,
                self.stop_loss_equity,
                self.max_drawdown * Decimal::ONE_HUNDRED
            ),
            "Trading skipped this cycle",
        )
        .with_metric("drawdown", drawdown.round_dp(4))
        .with_metric("reference_equity", self.reference_equity)
        .emit();

        true
    }

    /// Final check before submission: positive quantity and enough notional.
    pub fn validate_order(&self, symbol: &str, quantity: Decimal, price: Decimal) -> bool {
        if quantity <= Decimal::ZERO {
            warn!(%symbol, %quantity, "Order rejected: non-positive quantity");
            return false;
        }

        let notional = quantity * price;
        if notional < self.min_order_value {
            warn!(
                %symbol,
                %notional,
                min = %self.min_order_value,
                "Order rejected: below minimum order value"
            );
            return false;
        }

        debug!(%symbol, %quantity, %notional, "Order validated");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn gate() -> RiskGate {
        RiskGate::new(
            dec!(200),
            &RiskConfig {
                max_drawdown: dec!(0.30),
                min_order_value: dec!(5.1),
                halt_after_consecutive_stops: 0,
            },
        )
    }

    #[test]
    fn test_stop_loss_equity() {
        assert_eq!(gate().stop_loss_equity(), dec!(140));
    }

    #[test]
    fn test_hard_stop_boundary() {
        let gate = gate();
        assert!(gate.check_hard_stop(dec!(139.99)));
        assert!(!gate.check_hard_stop(dec!(140)));
        assert!(!gate.check_hard_stop(dec!(140.01)));
        assert!(!gate.check_hard_stop(dec!(250)));
    }

    #[test]
    fn test_zero_equity_triggers() {
        assert!(gate().check_hard_stop(Decimal::ZERO));
    }

    #[test]
    fn test_validate_order() {
        let gate = gate();
        assert!(gate.validate_order("BTCUSDT", dec!(0.001), dec!(60000)));
        assert!(!gate.validate_order("BTCUSDT", Decimal::ZERO, dec!(60000)));
        assert!(!gate.validate_order("BTCUSDT", dec!(-1), dec!(60000)));
        // 0.5 * 10 = 5 < 5.1
        assert!(!gate.validate_order("XRPUSDT", dec!(0.5), dec!(10)));
        // exactly at the minimum passes
        assert!(gate.validate_order("XRPUSDT", dec!(0.51), dec!(10)));
    }
}
