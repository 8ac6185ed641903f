//! Market scanner producing the ranked target coin list.

use crate::config::ScannerConfig;
use crate::exchange::{ExchangeGateway, Ticker24h};
use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::{info, instrument, trace, warn};

/// Funding intervals per year on an 8h schedule.
const FUNDING_PERIODS_PER_YEAR: Decimal = dec!(1095); // 3 * 365

/// Reasons for dropping a candidate.
#[derive(Debug, Clone, Copy)]
enum RejectReason {
    WrongQuote,
    Blacklisted,
    HighFunding,
}

/// Selects the coins to hold, ranked by liquidity.
pub struct MarketScanner {
    config: ScannerConfig,
}

impl MarketScanner {
    /// Create a new market scanner with the given configuration.
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Fetch market data and return the ranked coin list.
    ///
    /// Falls back to the configured default coins when the scan fails or
    /// selects nothing.
    #[instrument(skip(self, exchange))]
    pub async fn scan<E: ExchangeGateway + ?Sized>(&self, exchange: &E) -> Vec<String> {
        match self.try_scan(exchange).await {
            Ok(coins) if !coins.is_empty() => {
                info!(count = coins.len(), coins = ?coins, "Scanner selected coins");
                coins
            }
            Ok(_) => {
                warn!("Scanner selected no coins, using defaults");
                self.config.default_coins.clone()
            }
            Err(e) => {
                warn!(error = %e, "Market scan failed, using defaults");
                self.config.default_coins.clone()
            }
        }
    }

    async fn try_scan<E: ExchangeGateway + ?Sized>(&self, exchange: &E) -> Result<Vec<String>> {
        let (tickers, funding_rates) =
            tokio::try_join!(exchange.get_24h_tickers(), exchange.get_funding_rates())?;

        info!(
            ticker_count = tickers.len(),
            funding_count = funding_rates.len(),
            "Fetched market data"
        );

        Ok(self.select(&tickers, &funding_rates))
    }

    /// Rank perpetuals by quote volume and filter them.
    ///
    /// Symbols without a funding rate are treated as zero funding.
    pub fn select(
        &self,
        tickers: &[Ticker24h],
        funding_rates: &HashMap<String, Decimal>,
    ) -> Vec<String> {
        let mut ranked: Vec<&Ticker24h> = tickers
            .iter()
            .filter(|t| self.is_quote_perpetual(&t.symbol))
            .collect();
        ranked.sort_by(|a, b| b.quote_volume.cmp(&a.quote_volume));

        let mut selected = Vec::new();
        for ticker in ranked.into_iter().take(self.config.candidate_pool) {
            let funding = funding_rates
                .get(&ticker.symbol)
                .copied()
                .unwrap_or(Decimal::ZERO);

            match self.qualify(&ticker.symbol, funding) {
                Ok(()) => selected.push(ticker.symbol.clone()),
                Err(reason) => trace!(symbol = %ticker.symbol, ?reason, "Rejected"),
            }

            if selected.len() >= self.config.target_coin_count {
                break;
            }
        }

        selected
    }

    fn qualify(&self, symbol: &str, funding_rate: Decimal) -> Result<(), RejectReason> {
        if !self.is_quote_perpetual(symbol) {
            return Err(RejectReason::WrongQuote);
        }
        if self.config.blacklist.iter().any(|b| b == symbol) {
            return Err(RejectReason::Blacklisted);
        }
        if funding_rate * FUNDING_PERIODS_PER_YEAR > self.config.max_funding_apr {
            return Err(RejectReason::HighFunding);
        }
        Ok(())
    }

    /// Perpetual contracts carry the bare `<BASE><QUOTE>` symbol; dated
    /// delivery contracts add an `_YYMMDD` suffix.
    fn is_quote_perpetual(&self, symbol: &str) -> bool {
        symbol.ends_with(&self.config.quote_asset)
            && symbol.len() > self.config.quote_asset.len()
            && !symbol.contains('_')
            && !symbol.contains("BUSD")
    }
}
