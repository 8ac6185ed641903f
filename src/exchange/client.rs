//! Binance USDT-M futures REST client.

use crate::config::BinanceConfig;
use crate::exchange::traits::{ExchangeError, ExchangeGateway, ExchangeResult};
use crate::exchange::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Binance futures client.
///
/// Symbol limits are loaded from `exchangeInfo` on first use and cached for
/// the lifetime of the client.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    recv_window_ms: u64,
    limits: RwLock<HashMap<String, SymbolLimits>>,
}

impl BinanceClient {
    /// Create a new Binance client from configuration.
    pub fn new(config: &BinanceConfig) -> Result<Self> {
        let base_url = if config.testnet {
            FUTURES_TESTNET_URL
        } else {
            FUTURES_BASE_URL
        };
        Self::with_base_url(config, base_url)
    }

    /// Create a client against an explicit base URL.
    pub fn with_base_url(config: &BinanceConfig, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            recv_window_ms: config.recv_window_ms,
            limits: RwLock::new(HashMap::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    /// Turn a response into `T`, mapping Binance error bodies to `ExchangeError::Api`.
    async fn decode<T: DeserializeOwned>(
        response: Response,
        what: &'static str,
    ) -> ExchangeResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(api) => ExchangeError::Api {
                    code: api.code,
                    msg: api.msg,
                },
                Err(_) => ExchangeError::Status {
                    status: status.as_u16(),
                    body,
                },
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ExchangeError::Decode {
            what,
            reason: e.to_string(),
        })
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        what: &'static str,
    ) -> ExchangeResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).send().await?;
        Self::decode(response, what).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&'static str, String)>,
        what: &'static str,
    ) -> ExchangeResult<T> {
        if self.api_key.is_empty() || self.secret_key.is_empty() {
            return Err(ExchangeError::MissingCredentials);
        }

        params.push(("recvWindow", self.recv_window_ms.to_string()));
        params.push(("timestamp", Self::timestamp().to_string()));

        let query_string: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let signature = self.sign(&query_string);
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        );

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        Self::decode(response, what).await
    }

    /// Fetch exchange info and replace the limits cache.
    #[instrument(skip(self))]
    async fn refresh_limits(&self) -> ExchangeResult<()> {
        let info: FuturesExchangeInfo = self
            .public_get("/fapi/v1/exchangeInfo", "exchange info")
            .await?;

        let total = info.symbols.len();
        let limits: HashMap<String, SymbolLimits> = info
            .symbols
            .iter()
            .filter(|s| s.is_tradable_perpetual())
            .map(|s| (s.symbol.clone(), s.market_limits()))
            .collect();

        info!(
            symbols = limits.len(),
            skipped = total - limits.len(),
            "Loaded futures symbol limits"
        );
        *self.limits.write().await = limits;
        Ok(())
    }
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    #[instrument(skip(self))]
    async fn ping(&self) -> ExchangeResult<()> {
        let time: ServerTime = self.public_get("/fapi/v1/time", "server time").await?;
        debug!(server_time = time.server_time, "Binance reachable");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_account_state(&self) -> ExchangeResult<AccountState> {
        let account: FuturesAccount = self
            .signed(Method::GET, "/fapi/v2/account", Vec::new(), "account")
            .await?;

        Ok(AccountState {
            equity: account.total_margin_balance,
            free_margin: account.available_balance,
        })
    }

    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    async fn get_prices(&self, symbols: &[String]) -> ExchangeResult<HashMap<String, Decimal>> {
        let tickers: Vec<TickerPrice> = self
            .public_get("/fapi/v1/ticker/price", "ticker prices")
            .await?;

        Ok(tickers
            .into_iter()
            .filter(|t| t.price > Decimal::ZERO && symbols.contains(&t.symbol))
            .map(|t| (t.symbol, t.price))
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_positions(&self) -> ExchangeResult<HashMap<String, Decimal>> {
        let positions: Vec<PositionRisk> = self
            .signed(Method::GET, "/fapi/v2/positionRisk", Vec::new(), "positions")
            .await?;

        Ok(positions
            .into_iter()
            .filter(|p| p.position_amt != Decimal::ZERO)
            .map(|p| (p.symbol, p.position_amt))
            .collect())
    }

    async fn get_symbol_limits(&self, symbol: &str) -> ExchangeResult<SymbolLimits> {
        if let Some(limits) = self.limits.read().await.get(symbol) {
            return Ok(*limits);
        }

        self.refresh_limits().await?;

        self.limits
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    #[instrument(skip(self))]
    async fn submit_order(&self, order: &MarketOrder) -> ExchangeResult<OrderAck> {
        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", order.quantity.normalize().to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ];

        if let Some(client_id) = &order.client_order_id {
            params.push(("newClientOrderId", client_id.clone()));
        }

        debug!("Placing futures order: {:?}", order);

        let response: OrderResponse = self
            .signed(Method::POST, "/fapi/v1/order", params, "order response")
            .await?;

        Ok(response.into())
    }

    #[instrument(skip(self))]
    async fn get_funding_rates(&self) -> ExchangeResult<HashMap<String, Decimal>> {
        let rates: Vec<FundingRate> = self
            .public_get("/fapi/v1/premiumIndex", "funding rates")
            .await?;

        Ok(rates
            .into_iter()
            .map(|r| (r.symbol, r.funding_rate))
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_24h_tickers(&self) -> ExchangeResult<Vec<Ticker24h>> {
        self.public_get("/fapi/v1/ticker/24hr", "24h tickers").await
    }

    #[instrument(skip(self))]
    async fn set_leverage(&self, symbol: &str, leverage: u8) -> ExchangeResult<()> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];

        let response: serde_json::Value = self
            .signed(Method::POST, "/fapi/v1/leverage", params, "leverage response")
            .await?;

        if response.get("leverage").is_none() {
            warn!(%symbol, %response, "Unexpected leverage response");
        }
        Ok(())
    }
}
