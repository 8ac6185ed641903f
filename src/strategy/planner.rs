//! Exposure planning: equity and a ranked coin list in, per-symbol targets out.

use crate::config::{AccountConfig, RebalanceConfig};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Explicit per-symbol weight overrides, as fractions of total exposure.
///
/// Symbols are stored uppercased so lookups are insensitive to how the
/// configuration source cased its keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightTable {
    weights: HashMap<String, Decimal>,
}

impl WeightTable {
    pub fn new(weights: &HashMap<String, Decimal>) -> Self {
        Self {
            weights: weights
                .iter()
                .map(|(symbol, weight)| (symbol.to_uppercase(), *weight))
                .collect(),
        }
    }

    /// Explicit weight for a symbol, clamped to [0, 1].
    pub fn get(&self, symbol: &str) -> Option<Decimal> {
        self.weights
            .get(&symbol.to_uppercase())
            .map(|w| (*w).clamp(Decimal::ZERO, Decimal::ONE))
    }
}

/// Target notional for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolTarget {
    pub symbol: String,
    /// Fraction of total exposure assigned to this symbol
    pub weight: Decimal,
    /// Target position value in USDT
    pub target_value: Decimal,
    /// Whether the weight came from the weight table
    pub explicit: bool,
}

/// Per-cycle allocation. Recomputed every cycle, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPlan {
    pub total_exposure_target: Decimal,
    /// True when the margin-utilization cap, not effective leverage, set the exposure
    pub margin_cap_binding: bool,
    /// Targets in priority order
    pub targets: Vec<SymbolTarget>,
}

impl AllocationPlan {
    /// Target value for a symbol, if it is part of the plan.
    pub fn target_value(&self, symbol: &str) -> Option<Decimal> {
        self.targets
            .iter()
            .find(|t| t.symbol == symbol)
            .map(|t| t.target_value)
    }

    /// Sum of all per-symbol targets.
    pub fn total_allocated(&self) -> Decimal {
        self.targets.iter().map(|t| t.target_value).sum()
    }

    /// True when explicit weights sum past 1 and targets overshoot the cap.
    pub fn exceeds_exposure(&self) -> bool {
        self.total_allocated() > self.total_exposure_target
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|t| t.symbol.as_str())
    }
}

/// Turns equity into per-symbol target exposure.
#[derive(Debug, Clone)]
pub struct ExposurePlanner {
    effective_leverage: Decimal,
    account_leverage: Decimal,
    max_margin_utilization: Decimal,
    max_open_positions: usize,
}

impl ExposurePlanner {
    pub fn new(account: &AccountConfig, rebalance: &RebalanceConfig) -> Self {
        Self {
            effective_leverage: account.effective_leverage,
            account_leverage: Decimal::from(account.account_leverage),
            max_margin_utilization: account.max_margin_utilization,
            max_open_positions: rebalance.max_open_positions,
        }
    }

    /// Exposure cap and whether the margin constraint is the binding one.
    pub fn exposure_target(&self, equity: Decimal) -> (Decimal, bool) {
        let equity = equity.max(Decimal::ZERO);
        let by_leverage = equity * self.effective_leverage;
        let by_margin = equity * self.max_margin_utilization * self.account_leverage;

        if by_margin < by_leverage {
            (by_margin, true)
        } else {
            (by_leverage, false)
        }
    }

    /// Build the allocation plan.
    ///
    /// The input order of `target_coins` is priority: only the first
    /// `max_open_positions` are kept. Symbols without an explicit weight
    /// share the remaining weight equally.
    pub fn plan(
        &self,
        equity: Decimal,
        target_coins: &[String],
        weights: &WeightTable,
    ) -> AllocationPlan {
        let coins = &target_coins[..target_coins.len().min(self.max_open_positions)];
        if coins.len() < target_coins.len() {
            debug!(
                requested = target_coins.len(),
                kept = coins.len(),
                "Target list truncated to max open positions"
            );
        }

        let (total_exposure_target, margin_cap_binding) = self.exposure_target(equity);
        if margin_cap_binding {
            info!(
                %equity,
                exposure = %total_exposure_target,
                "Margin utilization cap is binding"
            );
        }

        let used_weight_sum: Decimal = coins.iter().filter_map(|s| weights.get(s)).sum();
        let unweighted = coins.iter().filter(|s| weights.get(s).is_none()).count();

        let implicit_weight = if unweighted > 0 {
            (Decimal::ONE - used_weight_sum).max(Decimal::ZERO) / Decimal::from(unweighted)
        } else {
            Decimal::ZERO
        };

        let targets = coins
            .iter()
            .map(|symbol| {
                let explicit = weights.get(symbol);
                let weight = explicit.unwrap_or(implicit_weight);
                SymbolTarget {
                    symbol: symbol.clone(),
                    weight,
                    target_value: total_exposure_target * weight,
                    explicit: explicit.is_some(),
                }
            })
            .collect();

        debug!(
            %equity,
            exposure = %total_exposure_target,
            %used_weight_sum,
            %implicit_weight,
            "Allocation planned"
        );

        let plan = AllocationPlan {
            total_exposure_target,
            margin_cap_binding,
            targets,
        };
        if used_weight_sum > Decimal::ONE {
            warn!(
                %used_weight_sum,
                exposure = %total_exposure_target,
                allocated = %plan.total_allocated(),
                "Explicit weights exceed 1, allocation breaches the exposure cap"
            );
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn planner(
        effective: Decimal,
        account: u8,
        utilization: Decimal,
        max: usize,
    ) -> ExposurePlanner {
        ExposurePlanner::new(
            &AccountConfig {
                reference_equity: dec!(200),
                account_leverage: account,
                effective_leverage: effective,
                max_margin_utilization: utilization,
            },
            &RebalanceConfig {
                threshold: dec!(0.05),
                max_open_positions: max,
                weights: HashMap::new(),
            },
        )
    }

    fn planner_default() -> ExposurePlanner {
        planner(dec!(2), 5, dec!(0.8), 20)
    }

    fn coins(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    fn weights(entries: &[(&str, Decimal)]) -> WeightTable {
        WeightTable::new(
            &entries
                .iter()
                .map(|(s, w)| (s.to_string(), *w))
                .collect(),
        )
    }

    #[test]
    fn test_explicit_and_implicit_weights() {
        // equity 50 * effective 2 = 100 total exposure
        let planner = planner(dec!(2), 5, dec!(0.8), 20);
        let plan = planner.plan(dec!(50), &coins(&["A", "B"]), &weights(&[("A", dec!(0.4))]));

        assert_eq!(plan.total_exposure_target, dec!(100));
        assert_eq!(plan.target_value("A"), Some(dec!(40)));
        assert_eq!(plan.target_value("B"), Some(dec!(60)));
        assert!(!plan.margin_cap_binding);
    }

    #[test]
    fn test_exposure_takes_smaller_cap() {
        // leverage cap: 100 * 3 = 300, margin cap: 100 * 0.5 * 2 = 100
        let planner = planner(dec!(3), 2, dec!(0.5), 20);
        let (exposure, margin_binding) = planner.exposure_target(dec!(100));

        assert_eq!(exposure, dec!(100));
        assert!(margin_binding);

        let planner = planner_default();
        let (exposure, margin_binding) = planner.exposure_target(dec!(200));
        assert_eq!(exposure, dec!(400));
        assert!(!margin_binding);
    }

    #[test]
    fn test_exposure_never_exceeds_either_cap() {
        let planner = planner(dec!(2.5), 3, dec!(0.7), 20);
        for equity in [dec!(1), dec!(37.5), dec!(200), dec!(12345.67)] {
            let (exposure, _) = planner.exposure_target(equity);
            assert!(exposure <= equity * dec!(2.5));
            assert!(exposure <= equity * dec!(0.7) * dec!(3));
        }
    }

    #[test]
    fn test_plan_is_idempotent() {
        let planner = planner_default();
        let list = coins(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
        let table = weights(&[("ETHUSDT", dec!(0.25))]);

        let first = planner.plan(dec!(200), &list, &table);
        let second = planner.plan(dec!(200), &list, &table);
        assert_eq!(first, second);
    }

    #[test]
    fn test_truncates_preserving_order() {
        let planner = planner(dec!(2), 5, dec!(0.8), 2);
        let plan = planner.plan(
            dec!(100),
            &coins(&["C", "A", "B"]),
            &WeightTable::default(),
        );

        let symbols: Vec<&str> = plan.symbols().collect();
        assert_eq!(symbols, vec!["C", "A"]);
        assert_eq!(plan.target_value("C"), Some(dec!(100)));
    }

    #[test]
    fn test_overweight_table_clamps_remaining_to_zero() {
        let planner = planner_default();
        let plan = planner.plan(
            dec!(100),
            &coins(&["A", "B", "C"]),
            &weights(&[("A", dec!(0.7)), ("B", dec!(0.6))]),
        );

        assert_eq!(plan.target_value("C"), Some(Decimal::ZERO));
        assert_eq!(plan.target_value("A"), Some(dec!(140)));
        // 0.7 + 0.6 of 200 exposure
        assert_eq!(plan.total_allocated(), dec!(260));
        assert!(plan.exceeds_exposure());
    }

    #[test]
    fn test_allocated_within_exposure() {
        let planner = planner_default();
        let plan = planner.plan(
            dec!(200),
            &coins(&["A", "B", "C", "D"]),
            &weights(&[("A", dec!(0.1))]),
        );

        let slack = plan.total_exposure_target - plan.total_allocated();
        assert!(slack.abs() < dec!(0.000001));
        assert!(!plan.exceeds_exposure());
    }

    #[test]
    fn test_weights_outside_target_list_ignored() {
        let planner = planner_default();
        let plan = planner.plan(
            dec!(100),
            &coins(&["A", "B"]),
            &weights(&[("Z", dec!(0.9))]),
        );

        assert_eq!(plan.target_value("A"), Some(dec!(50)));
        assert_eq!(plan.target_value("B"), Some(dec!(50)));
    }

    #[test]
    fn test_weight_lookup_case_insensitive() {
        let table = weights(&[("btcusdt", dec!(0.3))]);
        assert_eq!(table.get("BTCUSDT"), Some(dec!(0.3)));
        assert_eq!(weights(&[("X", dec!(1.5))]).get("X"), Some(Decimal::ONE));
    }

    #[test]
    fn test_negative_equity_plans_nothing() {
        let plan = planner_default().plan(dec!(-10), &coins(&["A"]), &WeightTable::default());
        assert_eq!(plan.total_exposure_target, Decimal::ZERO);
        assert_eq!(plan.target_value("A"), Some(Decimal::ZERO));
    }

    #[test]
    fn test_empty_target_list() {
        let plan = planner_default().plan(dec!(100), &[], &WeightTable::default());
        assert!(plan.targets.is_empty());
        assert_eq!(plan.total_exposure_target, dec!(200));
    }
}
