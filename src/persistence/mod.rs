//! SQLite trade journal.
//!
//! Every submitted order is recorded, filled or not, with the client order
//! id it was sent under so a timed-out submission can be traced later.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::exchange::OrderSide;

/// One journaled order.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub cycle: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Fill price when known, otherwise the price the order was sized at
    pub price: Decimal,
    pub notional: Decimal,
    pub client_order_id: String,
    pub order_id: Option<i64>,
    pub success: bool,
    pub error: Option<String>,
}

/// SQLite-backed trade journal.
pub struct TradeJournal {
    conn: Mutex<Connection>,
}

impl TradeJournal {
    /// Open (or create) the journal. Parent directories are created as needed.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create journal directory {:?}", parent))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let journal = Self {
            conn: Mutex::new(conn),
        };
        journal.init_schema()?;

        info!("Trade journal initialized at {:?}", path);
        Ok(journal)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("trade journal lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                cycle INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                notional TEXT NOT NULL,
                client_order_id TEXT NOT NULL,
                order_id INTEGER,
                success INTEGER NOT NULL,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);
            CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol);
            "#,
        )?;
        Ok(())
    }

    /// Record a trade attempt.
    pub fn record(&self, trade: &TradeRecord) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO trades (timestamp, cycle, symbol, side, quantity, price, notional,
                                client_order_id, order_id, success, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                trade.timestamp.to_rfc3339(),
                trade.cycle as i64,
                trade.symbol,
                trade.side.as_str(),
                trade.quantity.to_string(),
                trade.price.to_string(),
                trade.notional.to_string(),
                trade.client_order_id,
                trade.order_id,
                trade.success as i32,
                trade.error,
            ],
        )?;

        debug!(symbol = %trade.symbol, client_order_id = %trade.client_order_id, "Trade journaled");
        Ok(())
    }

    /// Most recent trades, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, cycle, symbol, side, quantity, price, notional,
                   client_order_id, order_id, success, error
            FROM trades
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let trades = stmt
            .query_map([limit as i64], |row| {
                let ts: String = row.get(0)?;
                let cycle: i64 = row.get(1)?;
                let side: String = row.get(3)?;
                let quantity: String = row.get(4)?;
                let price: String = row.get(5)?;
                let notional: String = row.get(6)?;
                let success: i32 = row.get(9)?;

                Ok(TradeRecord {
                    timestamp: DateTime::parse_from_rfc3339(&ts)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    cycle: cycle as u64,
                    symbol: row.get(2)?,
                    side: if side == "BUY" {
                        OrderSide::Buy
                    } else {
                        OrderSide::Sell
                    },
                    quantity: Decimal::from_str(&quantity).unwrap_or_default(),
                    price: Decimal::from_str(&price).unwrap_or_default(),
                    notional: Decimal::from_str(&notional).unwrap_or_default(),
                    client_order_id: row.get(7)?,
                    order_id: row.get(8)?,
                    success: success != 0,
                    error: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(trades)
    }

    /// Number of journaled trades.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
