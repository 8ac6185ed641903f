//! Paper-trading exchange that simulates a Binance futures account.
//!
//! Orders fill immediately at the last price fed through
//! [`MockBinanceClient::update_market_data`], minus a taker fee.

use super::traits::{ExchangeError, ExchangeGateway, ExchangeResult};
use super::types::*;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Simulated futures position.
#[derive(Debug, Clone, Default)]
pub struct MockPosition {
    pub symbol: String,
    /// Signed quantity (negative = short)
    pub quantity: Decimal,
    /// Average entry price of the open quantity
    pub entry_price: Decimal,
}

impl MockPosition {
    /// Apply a fill and return the realized PnL.
    fn apply_fill(&mut self, signed_qty: Decimal, price: Decimal) -> Decimal {
        let same_direction = self.quantity == Decimal::ZERO
            || (self.quantity > Decimal::ZERO) == (signed_qty > Decimal::ZERO);

        if same_direction {
            let new_qty = self.quantity + signed_qty;
            self.entry_price =
                (self.quantity * self.entry_price + signed_qty * price) / new_qty;
            self.quantity = new_qty;
            return Decimal::ZERO;
        }

        // Reducing, closing or flipping
        let closed = signed_qty.abs().min(self.quantity.abs());
        let direction = if self.quantity > Decimal::ZERO {
            Decimal::ONE
        } else {
            -Decimal::ONE
        };
        let realized = closed * (price - self.entry_price) * direction;

        self.quantity += signed_qty;
        if self.quantity == Decimal::ZERO {
            self.entry_price = Decimal::ZERO;
        } else if (self.quantity > Decimal::ZERO) != (direction > Decimal::ZERO) {
            // Flipped through zero: the remainder opened at this price
            self.entry_price = price;
        }
        realized
    }
}

/// Mock trading state for paper trading.
#[derive(Debug, Clone)]
pub struct MockTradingState {
    pub initial_balance: Decimal,
    /// Wallet balance: deposits + realized PnL - fees
    pub balance: Decimal,
    pub positions: HashMap<String, MockPosition>,
    pub total_trading_fees: Decimal,
    pub realized_pnl: Decimal,
    pub order_count: u64,
}

#[derive(Debug, Default)]
struct MarketData {
    prices: HashMap<String, Decimal>,
    funding_rates: HashMap<String, Decimal>,
    tickers: Vec<Ticker24h>,
    limits: HashMap<String, SymbolLimits>,
}

/// Mock client that simulates Binance API responses.
pub struct MockBinanceClient {
    state: RwLock<MockTradingState>,
    market: RwLock<MarketData>,
    leverage: RwLock<HashMap<String, u8>>,
    rejected_symbols: RwLock<HashSet<String>>,
    order_id_counter: AtomicU64,
    default_leverage: u8,
    /// Trading fee rate (0.04% taker)
    fee_rate: Decimal,
}

impl MockBinanceClient {
    /// Create a new mock client with initial balance.
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            state: RwLock::new(MockTradingState {
                initial_balance,
                balance: initial_balance,
                positions: HashMap::new(),
                total_trading_fees: Decimal::ZERO,
                realized_pnl: Decimal::ZERO,
                order_count: 0,
            }),
            market: RwLock::new(MarketData::default()),
            leverage: RwLock::new(HashMap::new()),
            rejected_symbols: RwLock::new(HashSet::new()),
            order_id_counter: AtomicU64::new(1),
            default_leverage: 1,
            fee_rate: dec!(0.0004),
        }
    }

    /// Override the taker fee rate.
    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Merge new prices into the simulated market.
    pub async fn update_market_data(&self, prices: HashMap<String, Decimal>) {
        self.market.write().await.prices.extend(prices);
    }

    /// Replace the scanner inputs (tickers and funding rates).
    pub async fn set_scanner_data(
        &self,
        tickers: Vec<Ticker24h>,
        funding_rates: HashMap<String, Decimal>,
    ) {
        let mut market = self.market.write().await;
        market.tickers = tickers;
        market.funding_rates = funding_rates;
    }

    /// Set the order limits for a symbol (conservative limits apply otherwise).
    pub async fn set_limits(&self, symbol: &str, limits: SymbolLimits) {
        self.market
            .write()
            .await
            .limits
            .insert(symbol.to_string(), limits);
    }

    /// Make every order on `symbol` fail, emulating a venue rejection.
    pub async fn reject_orders_for(&self, symbol: &str) {
        self.rejected_symbols
            .write()
            .await
            .insert(symbol.to_string());
    }

    /// Seed an open position without going through an order.
    pub async fn seed_position(&self, symbol: &str, quantity: Decimal, entry_price: Decimal) {
        self.state.write().await.positions.insert(
            symbol.to_string(),
            MockPosition {
                symbol: symbol.to_string(),
                quantity,
                entry_price,
            },
        );
    }

    /// Get current mock state for logging.
    pub async fn get_state(&self) -> MockTradingState {
        self.state.read().await.clone()
    }

    /// Leverage last set for a symbol.
    pub async fn leverage_for(&self, symbol: &str) -> u8 {
        self.leverage
            .read()
            .await
            .get(symbol)
            .copied()
            .unwrap_or(self.default_leverage)
    }

    /// Unrealized PnL of all positions at current prices.
    pub async fn unrealized_pnl(&self) -> Decimal {
        let state = self.state.read().await;
        let market = self.market.read().await;
        state
            .positions
            .values()
            .map(|p| {
                let mark = market.prices.get(&p.symbol).copied().unwrap_or(p.entry_price);
                p.quantity * (mark - p.entry_price)
            })
            .sum()
    }

    fn next_order_id(&self) -> u64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeGateway for MockBinanceClient {
    async fn ping(&self) -> ExchangeResult<()> {
        Ok(())
    }

    async fn get_account_state(&self) -> ExchangeResult<AccountState> {
        let unrealized = self.unrealized_pnl().await;
        let state = self.state.read().await;
        let market = self.market.read().await;
        let leverage = self.leverage.read().await;

        let equity = state.balance + unrealized;
        let initial_margin: Decimal = state
            .positions
            .values()
            .map(|p| {
                let mark = market.prices.get(&p.symbol).copied().unwrap_or(p.entry_price);
                let lev = leverage
                    .get(&p.symbol)
                    .copied()
                    .unwrap_or(self.default_leverage)
                    .max(1);
                (p.quantity.abs() * mark) / Decimal::from(lev)
            })
            .sum();

        Ok(AccountState {
            equity,
            free_margin: (equity - initial_margin).max(Decimal::ZERO),
        })
    }

    async fn get_prices(&self, symbols: &[String]) -> ExchangeResult<HashMap<String, Decimal>> {
        let market = self.market.read().await;
        Ok(symbols
            .iter()
            .filter_map(|s| market.prices.get(s).map(|p| (s.clone(), *p)))
            .collect())
    }

    async fn get_positions(&self) -> ExchangeResult<HashMap<String, Decimal>> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .values()
            .filter(|p| p.quantity != Decimal::ZERO)
            .map(|p| (p.symbol.clone(), p.quantity))
            .collect())
    }

    async fn get_symbol_limits(&self, symbol: &str) -> ExchangeResult<SymbolLimits> {
        let market = self.market.read().await;
        Ok(market
            .limits
            .get(symbol)
            .copied()
            .unwrap_or_else(SymbolLimits::conservative))
    }

    async fn submit_order(&self, order: &MarketOrder) -> ExchangeResult<OrderAck> {
        if self.rejected_symbols.read().await.contains(&order.symbol) {
            return Err(ExchangeError::Rejected(format!(
                "simulated rejection for {}",
                order.symbol
            )));
        }

        if order.quantity <= Decimal::ZERO {
            return Err(ExchangeError::Rejected("quantity must be positive".into()));
        }

        let price = self
            .market
            .read()
            .await
            .prices
            .get(&order.symbol)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol(order.symbol.clone()))?;

        let signed_qty = match order.side {
            OrderSide::Buy => order.quantity,
            OrderSide::Sell => -order.quantity,
        };
        let fee = order.quantity * price * self.fee_rate;

        let mut state = self.state.write().await;
        let realized = {
            let position = state
                .positions
                .entry(order.symbol.clone())
                .or_insert_with(|| MockPosition {
                    symbol: order.symbol.clone(),
                    ..Default::default()
                });
            position.apply_fill(signed_qty, price)
        };

        state.balance += realized - fee;
        state.realized_pnl += realized;
        state.total_trading_fees += fee;
        state.order_count += 1;
        state.positions.retain(|_, p| p.quantity != Decimal::ZERO);

        let order_id = self.next_order_id() as i64;

        info!(
            order_id,
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.quantity,
            price = %price,
            fee = %fee,
            realized = %realized,
            "Mock futures order executed"
        );

        Ok(OrderAck {
            order_id,
            symbol: order.symbol.clone(),
            status: OrderStatus::Filled,
            executed_qty: order.quantity,
            avg_price: price,
        })
    }

    async fn get_funding_rates(&self) -> ExchangeResult<HashMap<String, Decimal>> {
        Ok(self.market.read().await.funding_rates.clone())
    }

    async fn get_24h_tickers(&self) -> ExchangeResult<Vec<Ticker24h>> {
        Ok(self.market.read().await.tickers.clone())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u8) -> ExchangeResult<()> {
        debug!(%symbol, %leverage, "Mock set leverage");
        self.leverage
            .write()
            .await
            .insert(symbol.to_string(), leverage);
        Ok(())
    }
}
