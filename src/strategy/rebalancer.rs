//! Rebalance cycle driver.
//!
//! One cycle: fetch account → hard-stop check → plan → fetch prices for the
//! planned symbols and positions → size and submit per symbol, sequentially.

use crate::config::Config;
use crate::exchange::{
    AccountState, ExchangeGateway, ExchangeResult, MarketOrder, OrderSide, SymbolLimits,
};
use crate::persistence::{TradeJournal, TradeRecord};
use crate::risk::{RiskAlert, RiskAlertType, RiskGate};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::planner::{AllocationPlan, ExposurePlanner, WeightTable};
use super::sizer::{OrderSizer, SizingOutcome, SkipReason, TradeDecision};

/// Binance caps client order ids at 36 characters.
const MAX_CLIENT_ORDER_ID_LEN: usize = 36;

/// What happened to one symbol during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    /// Order accepted by the exchange
    Submitted {
        side: OrderSide,
        quantity: Decimal,
        order_id: i64,
    },
    /// Sizing produced no order
    Skipped(SkipReason),
    /// No price returned for the symbol
    NoPrice,
    /// Sized order failed the final risk validation
    RejectedByRiskGate,
    /// Exchange refused or the request failed
    SubmitFailed(String),
}

/// Summary of one rebalance cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub account: AccountState,
    pub hard_stop: bool,
    /// Absent when the hard stop skipped planning
    pub plan: Option<AllocationPlan>,
    /// Per-symbol results in processing order
    pub outcomes: Vec<(String, SymbolOutcome)>,
}

impl CycleReport {
    pub fn submitted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SymbolOutcome::Submitted { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SymbolOutcome::SubmitFailed(_)))
            .count()
    }

    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.outcomes
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, o)| o)
    }
}

/// Drives rebalance cycles against an exchange.
pub struct RebalanceOrchestrator<E: ExchangeGateway + ?Sized> {
    exchange: Arc<E>,
    risk_gate: RiskGate,
    planner: ExposurePlanner,
    sizer: OrderSizer,
    weights: WeightTable,
    account_leverage: u8,
    journal: Option<TradeJournal>,
    /// Symbols whose leverage has been set this session
    leverage_applied: HashSet<String>,
    /// Distinguishes client order ids across restarts
    session_id: i64,
    halt_after_consecutive_stops: u32,
    consecutive_hard_stops: u32,
}

impl<E: ExchangeGateway + ?Sized> RebalanceOrchestrator<E> {
    /// Build the orchestrator and its components from configuration.
    pub fn new(exchange: Arc<E>, config: &Config) -> Self {
        Self {
            exchange,
            risk_gate: RiskGate::new(config.account.reference_equity, &config.risk),
            planner: ExposurePlanner::new(&config.account, &config.rebalance),
            sizer: OrderSizer::new(config.rebalance.threshold, config.risk.min_order_value),
            weights: WeightTable::new(&config.rebalance.weights),
            account_leverage: config.account.account_leverage,
            journal: None,
            leverage_applied: HashSet::new(),
            session_id: Utc::now().timestamp(),
            halt_after_consecutive_stops: config.risk.halt_after_consecutive_stops,
            consecutive_hard_stops: 0,
        }
    }

    /// Record every submitted order in `journal`.
    pub fn with_journal(mut self, journal: TradeJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn risk_gate(&self) -> &RiskGate {
        &self.risk_gate
    }

    pub fn consecutive_hard_stops(&self) -> u32 {
        self.consecutive_hard_stops
    }

    /// Reason to stop the process, once the hard stop has held for the
    /// configured number of consecutive cycles (never when set to zero).
    pub fn escalation(&self) -> Option<String> {
        let limit = self.halt_after_consecutive_stops;
        if limit == 0 || self.consecutive_hard_stops < limit {
            return None;
        }

        RiskAlert::new(
            RiskAlertType::HardStopEscalation {
                consecutive: self.consecutive_hard_stops,
                limit,
            },
            format!(
                "Hard stop held for {} consecutive cycles",
                self.consecutive_hard_stops
            ),
            "Stopping the process; manual review required",
        )
        .emit();

        Some(format!(
            "hard stop triggered {} cycles in a row (limit {})",
            self.consecutive_hard_stops, limit
        ))
    }

    /// Run one cycle over the ranked `target_coins`.
    ///
    /// Returns `Err` only for cycle-level failures (prices or positions
    /// unavailable). Symbol-level problems are reported in the outcomes.
    #[instrument(skip(self, target_coins), fields(coins = target_coins.len()))]
    pub async fn run_cycle(&mut self, cycle: u64, target_coins: &[String]) -> Result<CycleReport> {
        let started_at = Utc::now();
        let timer = Instant::now();

        let account = account_or_zero(self.exchange.get_account_state().await);
        info!(
            equity = %account.equity,
            free_margin = %account.free_margin,
            "Account state"
        );

        if self.risk_gate.check_hard_stop(account.equity) {
            self.consecutive_hard_stops += 1;
            warn!(
                consecutive = self.consecutive_hard_stops,
                stop_loss_equity = %self.risk_gate.stop_loss_equity(),
                "Hard stop active, skipping trading this cycle"
            );
            return Ok(CycleReport {
                cycle,
                started_at,
                account,
                hard_stop: true,
                plan: None,
                outcomes: Vec::new(),
            });
        }
        self.consecutive_hard_stops = 0;

        let plan = self
            .planner
            .plan(account.equity, target_coins, &self.weights);

        let planned: Vec<String> = plan.symbols().map(str::to_string).collect();
        let prices = self
            .exchange
            .get_prices(&planned)
            .await
            .context("Failed to fetch prices")?;
        let positions = self
            .exchange
            .get_positions()
            .await
            .context("Failed to fetch positions")?;

        let mut outcomes = Vec::with_capacity(plan.targets.len());
        for target in &plan.targets {
            let symbol = target.symbol.as_str();

            let Some(price) = prices.get(symbol).copied() else {
                warn!(%symbol, "No price available, skipping");
                outcomes.push((symbol.to_string(), SymbolOutcome::NoPrice));
                continue;
            };

            let quantity = positions.get(symbol).copied().unwrap_or(Decimal::ZERO);
            let current_value = quantity * price;

            let limits =
                limits_or_conservative(symbol, self.exchange.get_symbol_limits(symbol).await);

            let outcome = match self
                .sizer
                .size(symbol, current_value, target.target_value, price, &limits)
            {
                SizingOutcome::Skip(reason) => {
                    info!(
                        %symbol,
                        %reason,
                        current = %current_value.round_dp(2),
                        target = %target.target_value.round_dp(2),
                        "No trade"
                    );
                    SymbolOutcome::Skipped(reason)
                }
                SizingOutcome::Trade(decision) => {
                    if self
                        .risk_gate
                        .validate_order(symbol, decision.quantity, decision.price)
                    {
                        self.execute(cycle, decision).await
                    } else {
                        SymbolOutcome::RejectedByRiskGate
                    }
                }
            };

            outcomes.push((symbol.to_string(), outcome));
        }

        let report = CycleReport {
            cycle,
            started_at,
            account,
            hard_stop: false,
            plan: Some(plan),
            outcomes,
        };

        info!(
            exposure = %report
                .plan
                .as_ref()
                .map(|p| p.total_exposure_target)
                .unwrap_or_default()
                .round_dp(2),
            symbols = report.outcomes.len(),
            submitted = report.submitted(),
            failed = report.failed(),
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "Rebalance cycle complete"
        );

        Ok(report)
    }

    /// Submit a validated decision. Failures stay local to the symbol.
    async fn execute(&mut self, cycle: u64, decision: TradeDecision) -> SymbolOutcome {
        self.ensure_leverage(&decision.symbol).await;

        let client_order_id = self.client_order_id(cycle, &decision.symbol);
        let order = MarketOrder {
            symbol: decision.symbol.clone(),
            side: decision.side,
            quantity: decision.quantity,
            client_order_id: Some(client_order_id.clone()),
        };

        info!(
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.quantity,
            notional = %decision.notional.round_dp(2),
            clipped = decision.clipped,
            %client_order_id,
            "Submitting rebalance order"
        );

        let result = self.exchange.submit_order(&order).await;

        let (outcome, record_price, order_id, error) = match result {
            Ok(ack) => {
                info!(
                    symbol = %ack.symbol,
                    order_id = ack.order_id,
                    status = ?ack.status,
                    executed_qty = %ack.executed_qty,
                    avg_price = %ack.avg_price,
                    "Order accepted"
                );
                let price = if ack.avg_price > Decimal::ZERO {
                    ack.avg_price
                } else {
                    decision.price
                };
                (
                    SymbolOutcome::Submitted {
                        side: decision.side,
                        quantity: decision.quantity,
                        order_id: ack.order_id,
                    },
                    price,
                    Some(ack.order_id),
                    None,
                )
            }
            Err(e) => {
                error!(symbol = %order.symbol, error = %e, "Order submission failed");
                (
                    SymbolOutcome::SubmitFailed(e.to_string()),
                    decision.price,
                    None,
                    Some(e.to_string()),
                )
            }
        };

        if let Some(journal) = &self.journal {
            let record = TradeRecord {
                timestamp: Utc::now(),
                cycle,
                symbol: decision.symbol.clone(),
                side: decision.side,
                quantity: decision.quantity,
                price: record_price,
                notional: decision.quantity * record_price,
                client_order_id,
                order_id,
                success: order_id.is_some(),
                error,
            };
            if let Err(e) = journal.record(&record) {
                warn!(symbol = %decision.symbol, error = %e, "Failed to journal trade");
            }
        }

        outcome
    }

    /// Set account leverage once per symbol per session. Best effort.
    async fn ensure_leverage(&mut self, symbol: &str) {
        if !self.leverage_applied.insert(symbol.to_string()) {
            return;
        }

        match self
            .exchange
            .set_leverage(symbol, self.account_leverage)
            .await
        {
            Ok(()) => debug!(%symbol, leverage = self.account_leverage, "Leverage set"),
            Err(e) => warn!(%symbol, error = %e, "Failed to set leverage, continuing"),
        }
    }

    fn client_order_id(&self, cycle: u64, symbol: &str) -> String {
        let mut id = format!("rb-{}-{}-{}", self.session_id, cycle, symbol);
        id.truncate(MAX_CLIENT_ORDER_ID_LEN);
        id
    }
}

/// Unknown equity is treated as zero, which trips the hard stop.
fn account_or_zero(result: ExchangeResult<AccountState>) -> AccountState {
    result.unwrap_or_else(|e| {
        error!(error = %e, "Failed to fetch account state, assuming zero equity");
        AccountState {
            equity: Decimal::ZERO,
            free_margin: Decimal::ZERO,
        }
    })
}

/// Unknown limits fall back to the conservative defaults.
fn limits_or_conservative(symbol: &str, result: ExchangeResult<SymbolLimits>) -> SymbolLimits {
    result.unwrap_or_else(|e| {
        warn!(%symbol, error = %e, "Symbol limits unavailable, using conservative defaults");
        SymbolLimits::conservative()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{
        ExchangeError, MockBinanceClient, MockExchangeGateway, OrderAck, OrderStatus,
    };
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.account.reference_equity = dec!(200);
        config.account.account_leverage = 5;
        config.account.effective_leverage = dec!(2);
        config.account.max_margin_utilization = dec!(0.8);
        config.risk.max_drawdown = dec!(0.30);
        config.risk.min_order_value = dec!(5.1);
        config.rebalance.threshold = dec!(0.05);
        config.rebalance.max_open_positions = 20;
        config
    }

    fn coins(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    async fn paper(prices: &[(&str, Decimal)]) -> Arc<MockBinanceClient> {
        let client = MockBinanceClient::new(dec!(200)).with_fee_rate(Decimal::ZERO);
        client
            .update_market_data(
                prices
                    .iter()
                    .map(|(s, p)| (s.to_string(), *p))
                    .collect(),
            )
            .await;
        Arc::new(client)
    }

    #[tokio::test]
    async fn test_cycle_opens_target_positions() {
        let exchange = paper(&[("BTCUSDT", dec!(50000)), ("ETHUSDT", dec!(2500))]).await;
        let mut orchestrator = RebalanceOrchestrator::new(exchange.clone(), &test_config());

        // 200 equity * 2 = 400 exposure, 200 each
        let report = orchestrator
            .run_cycle(1, &coins(&["BTCUSDT", "ETHUSDT"]))
            .await
            .unwrap();

        assert!(!report.hard_stop);
        assert_eq!(report.submitted(), 2);

        let positions = exchange.get_positions().await.unwrap();
        assert_eq!(positions["BTCUSDT"], dec!(0.004));
        assert_eq!(positions["ETHUSDT"], dec!(0.08));
        assert_eq!(exchange.leverage_for("BTCUSDT").await, 5);
    }

    #[tokio::test]
    async fn test_second_cycle_is_within_band() {
        let exchange = paper(&[("ETHUSDT", dec!(2500))]).await;
        let mut orchestrator = RebalanceOrchestrator::new(exchange.clone(), &test_config());
        let list = coins(&["ETHUSDT"]);

        orchestrator.run_cycle(1, &list).await.unwrap();
        let report = orchestrator.run_cycle(2, &list).await.unwrap();

        assert_eq!(
            report.outcome("ETHUSDT"),
            Some(&SymbolOutcome::Skipped(SkipReason::BelowThreshold))
        );
        assert_eq!(exchange.get_state().await.order_count, 1);
    }

    #[tokio::test]
    async fn test_hard_stop_skips_all_trading() {
        let exchange = paper(&[("ETHUSDT", dec!(2500))]).await;
        let mut config = test_config();
        config.account.reference_equity = dec!(1000); // stop at 700, equity 200

        let mut orchestrator = RebalanceOrchestrator::new(exchange.clone(), &config);
        let report = orchestrator.run_cycle(1, &coins(&["ETHUSDT"])).await.unwrap();

        assert!(report.hard_stop);
        assert!(report.plan.is_none());
        assert!(report.outcomes.is_empty());
        assert_eq!(exchange.get_state().await.order_count, 0);
        assert_eq!(orchestrator.consecutive_hard_stops(), 1);
    }

    #[tokio::test]
    async fn test_account_failure_treated_as_zero_equity() {
        let mut exchange = MockExchangeGateway::new();
        exchange
            .expect_get_account_state()
            .returning(|| Err(ExchangeError::Status { status: 500, body: String::new() }));
        exchange.expect_get_prices().never();
        exchange.expect_submit_order().never();

        let mut orchestrator = RebalanceOrchestrator::new(Arc::new(exchange), &test_config());
        let report = orchestrator.run_cycle(1, &coins(&["BTCUSDT"])).await.unwrap();

        assert!(report.hard_stop);
        assert_eq!(report.account.equity, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_price_failure_is_cycle_level() {
        let mut exchange = MockExchangeGateway::new();
        exchange.expect_get_account_state().returning(|| {
            Ok(AccountState {
                equity: dec!(200),
                free_margin: dec!(200),
            })
        });
        exchange
            .expect_get_prices()
            .returning(|_| Err(ExchangeError::Status { status: 502, body: String::new() }));
        exchange.expect_submit_order().never();

        let mut orchestrator = RebalanceOrchestrator::new(Arc::new(exchange), &test_config());
        let result = orchestrator.run_cycle(1, &coins(&["BTCUSDT"])).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_price_skips_only_that_symbol() {
        let exchange = paper(&[("ETHUSDT", dec!(2500))]).await;
        let mut orchestrator = RebalanceOrchestrator::new(exchange.clone(), &test_config());

        let report = orchestrator
            .run_cycle(1, &coins(&["NEWUSDT", "ETHUSDT"]))
            .await
            .unwrap();

        assert_eq!(report.outcome("NEWUSDT"), Some(&SymbolOutcome::NoPrice));
        assert!(matches!(
            report.outcome("ETHUSDT"),
            Some(SymbolOutcome::Submitted { side: OrderSide::Buy, .. })
        ));
    }

    #[tokio::test]
    async fn test_order_failure_does_not_abort_cycle() {
        let exchange = paper(&[("BTCUSDT", dec!(50000)), ("ETHUSDT", dec!(2500))]).await;
        exchange.reject_orders_for("BTCUSDT").await;

        let journal = TradeJournal::open(":memory:").unwrap();
        let mut orchestrator =
            RebalanceOrchestrator::new(exchange.clone(), &test_config()).with_journal(journal);

        let report = orchestrator
            .run_cycle(3, &coins(&["BTCUSDT", "ETHUSDT"]))
            .await
            .unwrap();

        assert!(matches!(
            report.outcome("BTCUSDT"),
            Some(SymbolOutcome::SubmitFailed(_))
        ));
        assert_eq!(report.submitted(), 1);
        assert_eq!(report.failed(), 1);

        let journal = orchestrator.journal.as_ref().unwrap();
        let trades = journal.recent(10).unwrap();
        assert_eq!(trades.len(), 2);
        assert!(trades.iter().any(|t| t.symbol == "BTCUSDT" && !t.success));
        assert!(trades.iter().all(|t| t.client_order_id.contains("-3-")));
    }

    #[tokio::test]
    async fn test_limits_failure_uses_conservative_defaults() {
        let mut exchange = MockExchangeGateway::new();
        exchange.expect_get_account_state().returning(|| {
            Ok(AccountState {
                equity: dec!(200),
                free_margin: dec!(200),
            })
        });
        exchange
            .expect_get_prices()
            .returning(|_| Ok(HashMap::from([("ETHUSDT".to_string(), dec!(2500))])));
        exchange.expect_get_positions().returning(|| Ok(HashMap::new()));
        exchange
            .expect_get_symbol_limits()
            .returning(|s| Err(ExchangeError::UnknownSymbol(s.to_string())));
        exchange.expect_set_leverage().times(1).returning(|_, _| Ok(()));
        exchange
            .expect_submit_order()
            .withf(|o| {
                o.symbol == "ETHUSDT"
                    && o.side == OrderSide::Buy
                    && o.quantity == dec!(0.16)
                    && o.client_order_id.is_some()
            })
            .times(1)
            .returning(|o| {
                Ok(OrderAck {
                    order_id: 9,
                    symbol: o.symbol.clone(),
                    status: OrderStatus::Filled,
                    executed_qty: o.quantity,
                    avg_price: dec!(2500),
                })
            });

        let mut orchestrator = RebalanceOrchestrator::new(Arc::new(exchange), &test_config());
        // 400 exposure / 2500 = 0.16
        let report = orchestrator.run_cycle(1, &coins(&["ETHUSDT"])).await.unwrap();
        assert_eq!(report.submitted(), 1);
    }

    #[tokio::test]
    async fn test_leverage_set_once_per_symbol() {
        let mut exchange = MockExchangeGateway::new();
        exchange.expect_get_account_state().returning(|| {
            Ok(AccountState {
                equity: dec!(200),
                free_margin: dec!(200),
            })
        });
        exchange
            .expect_get_prices()
            .returning(|_| Ok(HashMap::from([("SOLUSDT".to_string(), dec!(100))])));
        // Position never moves, so both cycles trade
        exchange.expect_get_positions().returning(|| Ok(HashMap::new()));
        exchange
            .expect_get_symbol_limits()
            .returning(|_| Ok(SymbolLimits::conservative()));
        exchange
            .expect_set_leverage()
            .times(1)
            .returning(|_, _| {
                Err(ExchangeError::Api {
                    code: -4028,
                    msg: "Leverage not valid".into(),
                })
            });
        exchange.expect_submit_order().times(2).returning(|o| {
            Ok(OrderAck {
                order_id: 1,
                symbol: o.symbol.clone(),
                status: OrderStatus::New,
                executed_qty: Decimal::ZERO,
                avg_price: Decimal::ZERO,
            })
        });

        let mut orchestrator = RebalanceOrchestrator::new(Arc::new(exchange), &test_config());
        let list = coins(&["SOLUSDT"]);
        orchestrator.run_cycle(1, &list).await.unwrap();
        orchestrator.run_cycle(2, &list).await.unwrap();
    }

    #[tokio::test]
    async fn test_prices_fetched_for_planned_symbols_only() {
        let mut exchange = MockExchangeGateway::new();
        exchange.expect_get_account_state().returning(|| {
            Ok(AccountState {
                equity: dec!(200),
                free_margin: dec!(200),
            })
        });
        exchange
            .expect_get_prices()
            .withf(|symbols| {
                symbols.len() == 2 && symbols[0] == "BTCUSDT" && symbols[1] == "ETHUSDT"
            })
            .times(1)
            .returning(|_| Ok(HashMap::new()));
        exchange.expect_get_positions().returning(|| Ok(HashMap::new()));
        exchange.expect_submit_order().never();

        let mut config = test_config();
        config.rebalance.max_open_positions = 2;
        let mut orchestrator = RebalanceOrchestrator::new(Arc::new(exchange), &config);

        let report = orchestrator
            .run_cycle(1, &coins(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]))
            .await
            .unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcome("BTCUSDT"), Some(&SymbolOutcome::NoPrice));
    }

    #[tokio::test]
    async fn test_lot_rounding_below_min_order_value_rejected_by_gate() {
        // Exposure 2.6 * 2 = 5.2 at price 1, step 1: sized to 5 units, notional 5.
        // Venue minimum of 5 passes, the 5.1 order-value floor does not.
        let exchange = Arc::new(MockBinanceClient::new(dec!(2.6)).with_fee_rate(Decimal::ZERO));
        exchange
            .update_market_data(HashMap::from([("DOGEUSDT".to_string(), dec!(1))]))
            .await;
        exchange
            .set_limits(
                "DOGEUSDT",
                SymbolLimits {
                    min_quantity: dec!(1),
                    max_quantity: dec!(1_000_000),
                    min_notional: dec!(5),
                    quantity_precision: 0,
                    step_size: dec!(1),
                },
            )
            .await;

        let mut config = test_config();
        config.account.reference_equity = dec!(2.6);
        let mut orchestrator = RebalanceOrchestrator::new(exchange.clone(), &config);

        let report = orchestrator.run_cycle(1, &coins(&["DOGEUSDT"])).await.unwrap();

        assert!(!report.hard_stop);
        assert_eq!(report.plan.as_ref().unwrap().total_exposure_target, dec!(5.2));
        assert_eq!(
            report.outcome("DOGEUSDT"),
            Some(&SymbolOutcome::RejectedByRiskGate)
        );
        assert_eq!(report.submitted(), 0);
        assert_eq!(exchange.get_state().await.order_count, 0);
    }

    #[tokio::test]
    async fn test_overweight_position_is_reduced() {
        let exchange = paper(&[("SOLUSDT", dec!(100))]).await;
        // 6 SOL = 600 value against a 400 target
        exchange.seed_position("SOLUSDT", dec!(6), dec!(100)).await;

        let mut orchestrator = RebalanceOrchestrator::new(exchange.clone(), &test_config());
        let report = orchestrator.run_cycle(1, &coins(&["SOLUSDT"])).await.unwrap();

        assert_eq!(
            report.outcome("SOLUSDT"),
            Some(&SymbolOutcome::Submitted {
                side: OrderSide::Sell,
                quantity: dec!(2),
                order_id: 1,
            })
        );
        assert_eq!(exchange.get_positions().await.unwrap()["SOLUSDT"], dec!(4));
    }

    #[tokio::test]
    async fn test_escalation_after_consecutive_stops() {
        let exchange = paper(&[]).await;
        let mut config = test_config();
        config.account.reference_equity = dec!(1000);
        config.risk.halt_after_consecutive_stops = 2;

        let mut orchestrator = RebalanceOrchestrator::new(exchange, &config);
        orchestrator.run_cycle(1, &[]).await.unwrap();
        assert!(orchestrator.escalation().is_none());

        orchestrator.run_cycle(2, &[]).await.unwrap();
        assert!(orchestrator.escalation().is_some());
    }

    #[tokio::test]
    async fn test_escalation_disabled_by_default() {
        let exchange = paper(&[]).await;
        let mut config = test_config();
        config.account.reference_equity = dec!(1000);

        let mut orchestrator = RebalanceOrchestrator::new(exchange, &config);
        for cycle in 1..=5 {
            orchestrator.run_cycle(cycle, &[]).await.unwrap();
        }
        assert_eq!(orchestrator.consecutive_hard_stops(), 5);
        assert!(orchestrator.escalation().is_none());
    }

    #[test]
    fn test_client_order_id_bounded() {
        let orchestrator =
            RebalanceOrchestrator::new(Arc::new(MockBinanceClient::new(dec!(1))), &test_config());
        let id = orchestrator.client_order_id(123456, "1000SHIBUSDTLONGNAMEUSDT");
        assert!(id.len() <= MAX_CLIENT_ORDER_ID_LEN);
        assert!(id.starts_with("rb-"));
    }
}
