//! Futures Rebalancer - Main Entry Point
//!
//! Periodically rebalances leveraged USDT-M futures positions toward target
//! exposures, live or against the in-memory paper exchange.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use futures_rebalancer::config::Config;
use futures_rebalancer::exchange::{BinanceClient, ExchangeGateway, MockBinanceClient};
use futures_rebalancer::persistence::TradeJournal;
use futures_rebalancer::scheduler::{CycleControl, CycleJob, Scheduler};
use futures_rebalancer::strategy::{
    CycleReport, MarketScanner, RebalanceOrchestrator, SymbolOutcome,
};
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Futures Rebalancer CLI
#[derive(Parser)]
#[command(name = "futures-rebalancer")]
#[command(version, about = "Leveraged futures portfolio rebalancing on Binance")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rebalance loop (default)
    Run {
        /// Trade against the in-memory paper exchange using live prices
        #[arg(long)]
        paper: bool,

        /// Execute a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Print the coins the scanner would select right now
    Scan,

    /// Print recent entries from the trade journal
    Trades {
        /// Path to the journal database (defaults to the configured path)
        #[arg(short, long)]
        db: Option<String>,

        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    let config = Config::load()?;
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Some(Commands::Scan) => run_scan(&config).await,
        Some(Commands::Trades { db, limit }) => {
            let path = db.unwrap_or_else(|| config.journal.path.clone());
            show_trades(&path, limit)
        }
        Some(Commands::Run { paper, once }) => run(config, paper, once).await,
        None => run(config, false, false).await,
    }
}

/// Main rebalance loop.
async fn run(config: Config, paper: bool, once: bool) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║            Futures Rebalancer v{}                       ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    if paper {
        info!("📝 PAPER TRADING MODE - Orders fill against the in-memory exchange");
    } else {
        warn!("⚠️  LIVE TRADING MODE - Real money at risk!");
    }
    log_config(&config);

    let market = Arc::new(BinanceClient::new(&config.binance)?);

    // Connectivity is a startup requirement
    market
        .ping()
        .await
        .with_context(|| format!("Cannot reach Binance at {}", market.base_url()))?;
    info!("✅ [INIT] Exchange connectivity validated ({})", market.base_url());

    let journal = TradeJournal::open(&config.journal.path)?;
    let scanner = MarketScanner::new(config.scanner.clone());

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_shutdown_listener(shutdown.clone());

    let mut scheduler = Scheduler::new(&config.schedule, shutdown);
    if once {
        scheduler = scheduler.with_max_cycles(1);
    }

    info!("🚀 Starting rebalance loop...");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let result = if paper {
        let paper = Arc::new(MockBinanceClient::new(config.account.reference_equity));
        let orchestrator =
            RebalanceOrchestrator::new(paper.clone(), &config).with_journal(journal);
        let mut job = RebalanceJob {
            scanner,
            market,
            paper: Some(paper),
            orchestrator,
        };
        scheduler.run(&mut job).await
    } else {
        anyhow::ensure!(
            !config.binance.api_key.is_empty() && !config.binance.secret_key.is_empty(),
            "Live trading requires BINANCE_API_KEY and BINANCE_SECRET_KEY"
        );
        let orchestrator =
            RebalanceOrchestrator::new(market.clone(), &config).with_journal(journal);
        let mut job = RebalanceJob {
            scanner,
            market,
            paper: None,
            orchestrator,
        };
        scheduler.run(&mut job).await
    };

    match result {
        Ok(cycles) => {
            info!(cycles, "👋 Futures Rebalancer shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("🛑 Rebalancer halted: {:#}", e);
            Err(e)
        }
    }
}

/// One scheduled cycle: scan, refresh paper market data, rebalance.
struct RebalanceJob<E: ExchangeGateway + ?Sized> {
    scanner: MarketScanner,
    /// Live venue used for market data (and trading when not in paper mode)
    market: Arc<BinanceClient>,
    paper: Option<Arc<MockBinanceClient>>,
    orchestrator: RebalanceOrchestrator<E>,
}

#[async_trait]
impl<E: ExchangeGateway + ?Sized + 'static> CycleJob for RebalanceJob<E> {
    async fn run_once(&mut self, cycle: u64) -> Result<CycleControl> {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━ Cycle {} ━━━━━━━━━━━━━━━━━━━━━━━━", cycle);

        // ═══════════════════════════════════════════════════════════════
        // PHASE 1: Market Scanning
        // ═══════════════════════════════════════════════════════════════
        info!("🔍 [SCAN] Selecting target coins...");
        let coins = self.scanner.scan(self.market.as_ref()).await;

        // ═══════════════════════════════════════════════════════════════
        // PHASE 2: Paper market refresh
        // ═══════════════════════════════════════════════════════════════
        if let Some(paper) = &self.paper {
            sync_paper_market(paper, &self.market, &coins).await?;
        }

        // ═══════════════════════════════════════════════════════════════
        // PHASE 3: Rebalance
        // ═══════════════════════════════════════════════════════════════
        info!("⚖️  [REBALANCE] Processing {} coins", coins.len());
        let report = self.orchestrator.run_cycle(cycle, &coins).await?;
        log_report(&report);

        if let Some(paper) = &self.paper {
            let state = paper.get_state().await;
            info!(
                "📊 [PAPER] Balance: ${:.2} | Realized: ${:.2} | Fees: ${:.4} | Orders: {}",
                state.balance, state.realized_pnl, state.total_trading_fees, state.order_count
            );
        }

        if let Some(reason) = self.orchestrator.escalation() {
            return Ok(CycleControl::Halt(reason));
        }
        Ok(CycleControl::Continue)
    }
}

/// Feed live prices and order limits into the paper exchange.
async fn sync_paper_market(
    paper: &MockBinanceClient,
    market: &BinanceClient,
    coins: &[String],
) -> Result<()> {
    let prices = market
        .get_prices(coins)
        .await
        .context("Failed to fetch live prices for paper trading")?;
    paper.update_market_data(prices).await;

    for symbol in coins {
        match market.get_symbol_limits(symbol).await {
            Ok(limits) => paper.set_limits(symbol, limits).await,
            Err(e) => debug!(%symbol, error = %e, "No live limits, paper uses defaults"),
        }
    }
    Ok(())
}

fn log_report(report: &CycleReport) {
    if report.hard_stop {
        warn!(
            "🚨 [RISK] Hard stop active at equity ${:.2}, no trades this cycle",
            report.account.equity
        );
        return;
    }

    for (symbol, outcome) in &report.outcomes {
        match outcome {
            SymbolOutcome::Submitted {
                side,
                quantity,
                order_id,
            } => info!("   ✅ {} {} {} (order {})", symbol, side, quantity, order_id),
            SymbolOutcome::SubmitFailed(reason) => warn!("   ❌ {} failed: {}", symbol, reason),
            SymbolOutcome::Skipped(reason) => debug!("   ⏭️  {} {}", symbol, reason),
            SymbolOutcome::NoPrice => warn!("   ❓ {} no price", symbol),
            SymbolOutcome::RejectedByRiskGate => {
                warn!("   🛡️  {} rejected by risk gate", symbol)
            }
        }
    }

    info!(
        "📈 [CYCLE] Equity: ${:.2} | Free margin: ${:.2} | Submitted: {} | Failed: {}",
        report.account.equity,
        report.account.free_margin,
        report.submitted(),
        report.failed()
    );
}

/// Set the shutdown flag on SIGINT or SIGTERM.
fn spawn_shutdown_listener(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("🛑 Shutdown signal received, finishing current cycle");
        shutdown.store(true, Ordering::SeqCst);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}

/// Print the scanner's current selection.
async fn run_scan(config: &Config) -> Result<()> {
    let client = BinanceClient::new(&config.binance)?;
    let scanner = MarketScanner::new(config.scanner.clone());
    let coins = scanner.scan(&client).await;

    println!("🔍 Scanner selection ({} coins):", coins.len());
    for (rank, symbol) in coins.iter().enumerate() {
        let weight = config
            .rebalance
            .weights
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(symbol))
            .map(|(_, w)| format!("{:.0}%", w * dec!(100)))
            .unwrap_or_else(|| "equal share".to_string());
        println!("   {:>2}. {:<14} {}", rank + 1, symbol, weight);
    }
    Ok(())
}

/// Print recent journal entries.
fn show_trades(db_path: &str, limit: usize) -> Result<()> {
    if !std::path::Path::new(db_path).exists() {
        println!("❌ Journal not found: {}", db_path);
        println!("   The rebalancer has not traded yet, or the path is incorrect.");
        return Ok(());
    }

    let journal = TradeJournal::open(db_path)?;
    let trades = journal.recent(limit)?;

    println!("📒 Last {} of {} trades", trades.len(), journal.count()?);
    for trade in trades {
        let status = if trade.success { "✅" } else { "❌" };
        println!(
            "   {} {} #{:<4} {:<12} {:<4} qty {:<12} @ {:<12} = ${:.2}{}",
            status,
            trade.timestamp.format("%Y-%m-%d %H:%M:%S"),
            trade.cycle,
            trade.symbol,
            trade.side,
            trade.quantity,
            trade.price,
            trade.notional,
            trade
                .error
                .map(|e| format!("  ({})", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// Initialize comprehensive logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "rebalancer.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("futures_rebalancer=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let stop_loss = config.account.reference_equity * (dec!(1) - config.risk.max_drawdown);

    info!("📋 Configuration:");
    info!("   Reference Equity: ${}", config.account.reference_equity);
    info!(
        "   Max Drawdown: {:.0}% (hard stop below ${:.2})",
        config.risk.max_drawdown * dec!(100),
        stop_loss
    );
    info!(
        "   Leverage: {}x effective, {}x account, {:.0}% max margin",
        config.account.effective_leverage,
        config.account.account_leverage,
        config.account.max_margin_utilization * dec!(100)
    );
    info!(
        "   Rebalance Threshold: {:.1}%",
        config.rebalance.threshold * dec!(100)
    );
    info!("   Min Order Value: ${}", config.risk.min_order_value);
    info!("   Max Open Positions: {}", config.rebalance.max_open_positions);
    info!("   Explicit Weights: {}", config.rebalance.weights.len());
    info!("   Scan Interval: {}s", config.schedule.scan_interval_secs);
    if config.risk.halt_after_consecutive_stops > 0 {
        info!(
            "   Halt After: {} consecutive hard stops",
            config.risk.halt_after_consecutive_stops
        );
    }
    info!("   Testnet: {}", config.binance.testnet);
}
