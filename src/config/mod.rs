//! Configuration management for the futures rebalancer.
//!
//! Loads settings from an optional `config.toml`, `.env` and environment
//! variables (`FRB__SECTION__KEY`). The resulting [`Config`] is built once at
//! startup and its sections are handed to each component's constructor.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Binance API credentials
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Account baseline and leverage settings
    #[serde(default)]
    pub account: AccountConfig,
    /// Risk gate parameters
    #[serde(default)]
    pub risk: RiskConfig,
    /// Rebalancing parameters and the explicit weight table
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    /// Coin selection criteria
    #[serde(default)]
    pub scanner: ScannerConfig,
    /// Cycle scheduling
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Trade journal location
    #[serde(default)]
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use the futures testnet instead of production
    #[serde(default = "default_testnet")]
    pub testnet: bool,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Signed request validity window in milliseconds
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Fixed equity baseline the drawdown stop is measured against (USDT)
    #[serde(default = "default_reference_equity")]
    pub reference_equity: Decimal,
    /// Leverage configured on the exchange account for every traded symbol
    #[serde(default = "default_account_leverage")]
    pub account_leverage: u8,
    /// Target ratio of total exposure to equity
    #[serde(default = "default_effective_leverage")]
    pub effective_leverage: Decimal,
    /// Maximum fraction of margin capacity that may be used (0.0-1.0)
    #[serde(default = "default_max_margin_utilization")]
    pub max_margin_utilization: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum drawdown from the reference equity before trading halts (0.0-1.0)
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: Decimal,
    /// Minimum notional of any submitted order in USDT
    #[serde(default = "default_min_order_value")]
    pub min_order_value: Decimal,
    /// Stop the process after this many consecutive hard-stop cycles (0 = never)
    #[serde(default)]
    pub halt_after_consecutive_stops: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Relative deviation from target that triggers a trade (0.05 = 5%)
    #[serde(default = "default_rebalance_threshold")]
    pub threshold: Decimal,
    /// Maximum number of symbols held at once
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    /// Explicit per-symbol fraction of total exposure (0.0-1.0)
    #[serde(default)]
    pub weights: HashMap<String, Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Number of coins to select each cycle
    #[serde(default = "default_target_coin_count")]
    pub target_coin_count: usize,
    /// How many volume-ranked candidates to consider before filtering
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,
    /// Quote asset of the traded perpetuals
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Maximum annualised funding rate (rate x 3 x 365) to accept a coin
    #[serde(default = "default_max_funding_apr")]
    pub max_funding_apr: Decimal,
    /// Symbols never selected (stablecoin pairs)
    #[serde(default = "default_blacklist")]
    pub blacklist: Vec<String>,
    /// Used when the market scan fails
    #[serde(default = "default_coins")]
    pub default_coins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Period between cycle starts in seconds
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    /// Wait after a failed cycle before retrying, in seconds
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
    /// Granularity at which the shutdown flag is polled while sleeping
    #[serde(default = "default_shutdown_poll")]
    pub shutdown_poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// SQLite database recording every submitted order
    #[serde(default = "default_journal_path")]
    pub path: String,
}

// Default value functions
fn default_testnet() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_recv_window() -> u64 {
    5000
}

fn default_reference_equity() -> Decimal {
    Decimal::new(200, 0) // 200 USDT
}

fn default_account_leverage() -> u8 {
    5
}

fn default_effective_leverage() -> Decimal {
    Decimal::new(2, 0) // 2x
}

fn default_max_margin_utilization() -> Decimal {
    Decimal::new(80, 2) // 0.80
}

fn default_max_drawdown() -> Decimal {
    Decimal::new(30, 2) // 0.30
}

fn default_min_order_value() -> Decimal {
    Decimal::new(51, 1) // 5.1 USDT, just above the venue's 5 USDT floor
}

fn default_rebalance_threshold() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_max_open_positions() -> usize {
    20
}

fn default_target_coin_count() -> usize {
    20
}

fn default_candidate_pool() -> usize {
    100
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_max_funding_apr() -> Decimal {
    Decimal::ONE // 100% APR
}

fn default_blacklist() -> Vec<String> {
    ["USDCUSDT", "TUSDUSDT", "FDUSDUSDT", "USDPUSDT"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_coins() -> Vec<String> {
    [
        "BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT", "DOGEUSDT", "XRPUSDT", "ADAUSDT",
        "AVAXUSDT", "LINKUSDT", "DOTUSDT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_scan_interval() -> u64 {
    300 // 5 minutes
}

fn default_error_backoff() -> u64 {
    60
}

fn default_shutdown_poll() -> u64 {
    1000
}

fn default_journal_path() -> String {
    "data/trades.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("FRB"))
            .build()
            .context("Failed to build configuration")?;

        let mut config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Conventional Binance variable names take effect when the prefixed ones are absent
        if config.binance.api_key.is_empty() {
            config.binance.api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
        }
        if config.binance.secret_key.is_empty() {
            config.binance.secret_key = std::env::var("BINANCE_SECRET_KEY").unwrap_or_default();
        }

        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.account.reference_equity > Decimal::ZERO,
            "reference_equity must be positive"
        );

        anyhow::ensure!(
            self.account.account_leverage >= 1,
            "account_leverage must be >= 1"
        );

        anyhow::ensure!(
            self.account.effective_leverage > Decimal::ZERO,
            "effective_leverage must be positive"
        );

        anyhow::ensure!(
            self.account.max_margin_utilization > Decimal::ZERO
                && self.account.max_margin_utilization <= Decimal::ONE,
            "max_margin_utilization must be between 0 and 1"
        );

        anyhow::ensure!(
            self.risk.max_drawdown > Decimal::ZERO && self.risk.max_drawdown <= Decimal::ONE,
            "max_drawdown must be between 0 and 1"
        );

        anyhow::ensure!(
            self.risk.min_order_value >= Decimal::ZERO,
            "min_order_value must not be negative"
        );

        anyhow::ensure!(
            self.rebalance.threshold >= Decimal::ZERO,
            "rebalance threshold must not be negative"
        );

        anyhow::ensure!(
            self.rebalance.max_open_positions >= 1,
            "max_open_positions must be >= 1"
        );

        for (symbol, weight) in &self.rebalance.weights {
            anyhow::ensure!(
                *weight >= Decimal::ZERO && *weight <= Decimal::ONE,
                "weight for {} must be between 0 and 1",
                symbol
            );
        }

        anyhow::ensure!(
            self.schedule.scan_interval_secs > 0,
            "scan_interval_secs must be positive"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binance: BinanceConfig::default(),
            account: AccountConfig::default(),
            risk: RiskConfig::default(),
            rebalance: RebalanceConfig::default(),
            scanner: ScannerConfig::default(),
            schedule: ScheduleConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            testnet: default_testnet(),
            request_timeout_secs: default_request_timeout(),
            recv_window_ms: default_recv_window(),
        }
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            reference_equity: default_reference_equity(),
            account_leverage: default_account_leverage(),
            effective_leverage: default_effective_leverage(),
            max_margin_utilization: default_max_margin_utilization(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown: default_max_drawdown(),
            min_order_value: default_min_order_value(),
            halt_after_consecutive_stops: 0,
        }
    }
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            threshold: default_rebalance_threshold(),
            max_open_positions: default_max_open_positions(),
            weights: HashMap::new(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            target_coin_count: default_target_coin_count(),
            candidate_pool: default_candidate_pool(),
            quote_asset: default_quote_asset(),
            max_funding_apr: default_max_funding_apr(),
            blacklist: default_blacklist(),
            default_coins: default_coins(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            error_backoff_secs: default_error_backoff(),
            shutdown_poll_ms: default_shutdown_poll(),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: default_journal_path(),
        }
    }
}
