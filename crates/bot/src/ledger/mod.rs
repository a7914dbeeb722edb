//! Portfolio ledger — the durable, crash-safe store.
//!
//! SQLite-backed persistence for tracked symbols, positions, averaging
//! entries, trade history, signal diagnostics, portfolio aggregates and
//! regime state. Decimals are stored as TEXT, timestamps as unix seconds.
//!
//! Commit discipline: every handled candle tick runs inside one
//! [`TickTxn`] that reads the current state, applies every position-manager
//! effect and commits atomically. Replaying a candle hits the unique
//! `(symbol, candle_open_time, reason)` trade key; the tick rolls back and
//! the replay is reported as success.
//!
//! Uses `sqlx::query()` runtime queries (not compile-time `query!` macros)
//! since the database schema is created via `sqlx::migrate!`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::errors::BotError;
use crate::types::{
    AveragingEntry, AveragingMode, PortfolioState, Position, RegimeMode, RegimeState,
    SignalKind, SignalRecord, TradeRecord, TradeSide,
};

/// A symbol under management.
#[derive(Debug, Clone)]
pub struct TrackedSymbol {
    pub symbol: String,
    pub added_at: i64,
    pub active: bool,
}

/// Aggregate counts over the signals table, for `signal_stats`.
#[derive(Debug, Clone, Default)]
pub struct SignalStats {
    pub by_kind: Vec<(String, i64)>,
    pub by_block_reason: Vec<(String, i64)>,
}

/// SQLite-backed ledger. Single-writer pool: SQLite serialises writers,
/// so the pool is capped at one connection and becomes the engine's
/// serialization point.
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (or create) the database at `db_path` and run migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&format!("sqlite:{db_path}?mode=rwc"))
            .await
            .context("failed to connect to SQLite database")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        info!(db_path, "ledger initialized");
        Ok(Self { pool })
    }

    /// In-memory ledger for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory SQLite")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        Ok(Self { pool })
    }

    /// Seed the singleton portfolio row if it does not exist yet.
    pub async fn init_portfolio(&self, initial_balance: Decimal) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO portfolio_state \
             (id, balance_cash, initial_balance, realized_pnl_cumulative, \
              win_count, loss_count, peak_equity, trading_enabled) \
             VALUES (1, ?, ?, '0', 0, 0, ?, 1)",
        )
        .bind(initial_balance.to_string())
        .bind(initial_balance.to_string())
        .bind(initial_balance.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Wipe positions, trades, signals and averaging entries and restore the
    /// portfolio to its initial balance. Tracked symbols survive.
    pub async fn reset_portfolio(&self, initial_balance: Decimal) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM averaging_entries").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM positions").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM trades_history").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM signals").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM regime_state").execute(&mut *tx).await?;
        sqlx::query(
            "UPDATE portfolio_state SET balance_cash = ?, initial_balance = ?, \
             realized_pnl_cumulative = '0', win_count = 0, loss_count = 0, \
             peak_equity = ? WHERE id = 1",
        )
        .bind(initial_balance.to_string())
        .bind(initial_balance.to_string())
        .bind(initial_balance.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(%initial_balance, "portfolio reset");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tracked symbols
    // -----------------------------------------------------------------------

    pub async fn get_tracked_symbols(&self) -> Result<Vec<TrackedSymbol>> {
        let rows = sqlx::query("SELECT symbol, added_at, active FROM tracked_symbols ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| TrackedSymbol {
                symbol: r.get("symbol"),
                added_at: r.get("added_at"),
                active: r.get::<i64, _>("active") != 0,
            })
            .collect())
    }

    /// Idempotent insert; re-adding an existing symbol reactivates it
    /// without touching `added_at`.
    pub async fn add_symbol(&self, symbol: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO tracked_symbols (symbol, added_at, active) VALUES (?, ?, 1) \
             ON CONFLICT(symbol) DO UPDATE SET active = 1",
        )
        .bind(symbol)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Idempotent delete; returns whether a row was removed.
    pub async fn remove_symbol(&self, symbol: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tracked_symbols WHERE symbol = ?")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a symbol inactive (permanent upstream failure). Ticks skip it.
    pub async fn deactivate_symbol(&self, symbol: &str) -> Result<()> {
        sqlx::query("UPDATE tracked_symbols SET active = 0 WHERE symbol = ?")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads (outside tick transactions: status surfaces, diagnostics)
    // -----------------------------------------------------------------------

    pub async fn get_portfolio_state(&self) -> Result<PortfolioState> {
        let row = sqlx::query("SELECT * FROM portfolio_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("portfolio_state row missing; call init_portfolio first")?;
        Ok(portfolio_from_row(&row))
    }

    pub async fn set_trading_enabled(&self, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE portfolio_state SET trading_enabled = ? WHERE id = 1")
            .bind(enabled as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_open_position(&self, symbol: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let id: i64 = row.get("id");
        let entries = averaging_entries(&self.pool, id).await?;
        Ok(Some(position_from_row(&row, entries)))
    }

    pub async fn get_all_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;
        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let entries = averaging_entries(&self.pool, id).await?;
            positions.push(position_from_row(&row, entries));
        }
        Ok(positions)
    }

    /// Most recent trades, newest first.
    pub async fn get_trades(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM trades_history ORDER BY at DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(trade_from_row).collect())
    }

    /// Closing trades (those carrying realized P&L), oldest first, for the
    /// Kelly statistics.
    pub async fn get_closed_trades(
        &self,
        symbol: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TradeRecord>> {
        let rows = match symbol {
            Some(s) => {
                sqlx::query(
                    "SELECT * FROM (SELECT * FROM trades_history \
                     WHERE realized_pnl IS NOT NULL AND symbol = ? \
                     ORDER BY at DESC, id DESC LIMIT ?) ORDER BY at ASC, id ASC",
                )
                .bind(s)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM (SELECT * FROM trades_history \
                     WHERE realized_pnl IS NOT NULL \
                     ORDER BY at DESC, id DESC LIMIT ?) ORDER BY at ASC, id ASC",
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.iter().map(trade_from_row).collect())
    }

    pub async fn get_regime_state(&self, symbol: &str) -> Result<RegimeState> {
        let row = sqlx::query(
            "SELECT last_mode, last_mode_entered_at FROM regime_state WHERE symbol = ?",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(r) => RegimeState {
                last_mode: RegimeMode::parse(&r.get::<String, _>("last_mode"))
                    .unwrap_or(RegimeMode::Unknown),
                last_mode_entered_at: r.get("last_mode_entered_at"),
            },
            None => RegimeState::unknown(),
        })
    }

    /// Open time of the last candle committed for this symbol, if any.
    pub async fn last_processed_candle(&self, symbol: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT last_candle_open_time FROM regime_state WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get::<Option<i64>, _>("last_candle_open_time")))
    }

    pub async fn recent_signals(&self, limit: usize) -> Result<Vec<SignalRecord>> {
        let rows = sqlx::query("SELECT * FROM signals ORDER BY at DESC, id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| SignalRecord {
                symbol: r.get("symbol"),
                at: r.get("at"),
                candle_open_time: r.get("candle_open_time"),
                signal: match r.get::<String, _>("signal").as_str() {
                    "BUY" => SignalKind::Buy,
                    "SELL" => SignalKind::Sell,
                    _ => SignalKind::Hold,
                },
                regime: RegimeMode::parse(&r.get::<String, _>("regime"))
                    .unwrap_or(RegimeMode::Unknown),
                votes_delta: r.get::<i64, _>("votes_delta") as i32,
                top_reasons: serde_json::from_str(&r.get::<String, _>("top_reasons"))
                    .unwrap_or_default(),
                price: dec_col(r, "price"),
                block_reason: r.get("block_reason"),
            })
            .collect())
    }

    pub async fn signal_stats(&self) -> Result<SignalStats> {
        let by_kind = sqlx::query(
            "SELECT signal, COUNT(*) AS n FROM signals GROUP BY signal ORDER BY n DESC",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| (r.get::<String, _>("signal"), r.get::<i64, _>("n")))
        .collect();

        let by_block_reason = sqlx::query(
            "SELECT block_reason, COUNT(*) AS n FROM signals \
             WHERE block_reason IS NOT NULL GROUP BY block_reason ORDER BY n DESC",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| (r.get::<String, _>("block_reason"), r.get::<i64, _>("n")))
        .collect();

        Ok(SignalStats {
            by_kind,
            by_block_reason,
        })
    }

    // -----------------------------------------------------------------------
    // Settings (chat-command mailbox, published through the ledger)
    // -----------------------------------------------------------------------

    pub async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    /// Read-and-clear, for one-shot command flags like force-buy.
    pub async fn take_setting(&self, key: &str) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
        let value: Option<String> = row.map(|r| r.get("value"));
        if value.is_some() {
            sqlx::query("DELETE FROM settings WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Tick transactions
    // -----------------------------------------------------------------------

    /// Begin the per-candle transaction that carries every state change of
    /// one symbol tick.
    pub async fn begin_tick(&self) -> Result<TickTxn> {
        let tx = self.pool.begin().await?;
        Ok(TickTxn { tx })
    }
}

/// One candle-tick transaction. All effects commit atomically or roll back
/// together.
pub struct TickTxn {
    tx: Transaction<'static, Sqlite>,
}

impl TickTxn {
    pub async fn portfolio(&mut self) -> Result<PortfolioState> {
        let row = sqlx::query("SELECT * FROM portfolio_state WHERE id = 1")
            .fetch_one(&mut *self.tx)
            .await
            .context("portfolio_state row missing")?;
        Ok(portfolio_from_row(&row))
    }

    pub async fn open_position(&mut self, symbol: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&mut *self.tx)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let id: i64 = row.get("id");
        let rows = sqlx::query(
            "SELECT * FROM averaging_entries WHERE position_id = ? ORDER BY at, id",
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await?;
        let entries = rows.iter().map(averaging_entry_from_row).collect();
        Ok(Some(position_from_row(&row, entries)))
    }

    pub async fn open_position_count(&mut self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM positions")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }

    /// Sum of `total_invested` across all open positions (exact Decimal sum,
    /// computed client-side since values are stored as TEXT).
    pub async fn invested_sum(&mut self) -> Result<Decimal> {
        let rows = sqlx::query("SELECT total_invested FROM positions")
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows
            .iter()
            .map(|r| dec_col(r, "total_invested"))
            .sum())
    }

    /// Prior regime state and the last committed candle for a symbol.
    pub async fn regime_state(&mut self, symbol: &str) -> Result<(RegimeState, Option<i64>)> {
        let row = sqlx::query(
            "SELECT last_mode, last_mode_entered_at, last_candle_open_time \
             FROM regime_state WHERE symbol = ?",
        )
        .bind(symbol)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(match row {
            Some(r) => (
                RegimeState {
                    last_mode: RegimeMode::parse(&r.get::<String, _>("last_mode"))
                        .unwrap_or(RegimeMode::Unknown),
                    last_mode_entered_at: r.get("last_mode_entered_at"),
                },
                r.get::<Option<i64>, _>("last_candle_open_time"),
            ),
            None => (RegimeState::unknown(), None),
        })
    }

    pub async fn closed_trades(&mut self, limit: usize) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM (SELECT * FROM trades_history \
             WHERE realized_pnl IS NOT NULL \
             ORDER BY at DESC, id DESC LIMIT ?) ORDER BY at ASC, id ASC",
        )
        .bind(limit as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.iter().map(trade_from_row).collect())
    }

    /// Append one immutable trade record.
    ///
    /// A unique-key conflict means this candle was already committed; the
    /// caller rolls the tick back and treats the replay as success.
    pub async fn insert_trade(&mut self, trade: &TradeRecord) -> Result<(), BotError> {
        let result = sqlx::query(
            "INSERT INTO trades_history \
             (symbol, side, price, quantity, commission, realized_pnl, \
              candle_open_time, at, reason, entry_mode, votes_delta, reasons) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.commission.to_string())
        .bind(trade.realized_pnl.map(|p| p.to_string()))
        .bind(trade.candle_open_time)
        .bind(trade.at)
        .bind(&trade.reason)
        .bind(trade.entry_mode.map(|m| m.as_str()))
        .bind(trade.votes_delta)
        .bind(serde_json::to_string(&trade.reasons).unwrap_or_else(|_| "[]".into()))
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(BotError::DuplicateTrade {
                    symbol: trade.symbol.clone(),
                    candle_open_time: trade.candle_open_time,
                    reason: trade.reason.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or fully update the open position row for its symbol.
    pub async fn upsert_position(&mut self, pos: &Position) -> Result<()> {
        sqlx::query(
            "INSERT INTO positions \
             (symbol, opened_at, entry_price, average_entry_price, quantity, \
              initial_invested, total_invested, commission_paid, \
              stop_loss_price, take_profit_price, highest_price_since_entry, \
              trailing_active, breakeven_active, partial_tp_taken, \
              entry_mode, entry_votes_delta, entry_reasons, averaging_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(symbol) DO UPDATE SET \
              opened_at = excluded.opened_at, \
              entry_price = excluded.entry_price, \
              average_entry_price = excluded.average_entry_price, \
              quantity = excluded.quantity, \
              initial_invested = excluded.initial_invested, \
              total_invested = excluded.total_invested, \
              commission_paid = excluded.commission_paid, \
              stop_loss_price = excluded.stop_loss_price, \
              take_profit_price = excluded.take_profit_price, \
              highest_price_since_entry = excluded.highest_price_since_entry, \
              trailing_active = excluded.trailing_active, \
              breakeven_active = excluded.breakeven_active, \
              partial_tp_taken = excluded.partial_tp_taken, \
              entry_mode = excluded.entry_mode, \
              entry_votes_delta = excluded.entry_votes_delta, \
              entry_reasons = excluded.entry_reasons, \
              averaging_count = excluded.averaging_count",
        )
        .bind(&pos.symbol)
        .bind(pos.opened_at)
        .bind(pos.entry_price.to_string())
        .bind(pos.average_entry_price.to_string())
        .bind(pos.quantity.to_string())
        .bind(pos.initial_invested.to_string())
        .bind(pos.total_invested.to_string())
        .bind(pos.commission_paid.to_string())
        .bind(pos.stop_loss_price.to_string())
        .bind(pos.take_profit_price.to_string())
        .bind(pos.highest_price_since_entry.to_string())
        .bind(pos.trailing_active as i64)
        .bind(pos.breakeven_active as i64)
        .bind(pos.partial_tp_taken as i64)
        .bind(pos.entry_mode.as_str())
        .bind(pos.entry_votes_delta)
        .bind(serde_json::to_string(&pos.entry_reasons).unwrap_or_else(|_| "[]".into()))
        .bind(pos.averaging_count as i64)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Record one averaging fill against the position row.
    pub async fn insert_averaging_entry(
        &mut self,
        symbol: &str,
        entry: &AveragingEntry,
    ) -> Result<()> {
        let row = sqlx::query("SELECT id FROM positions WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(&mut *self.tx)
            .await
            .context("position row missing for averaging entry")?;
        let position_id: i64 = row.get("id");

        sqlx::query(
            "INSERT INTO averaging_entries \
             (position_id, price, quantity, invested, commission, mode, at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(position_id)
        .bind(entry.price.to_string())
        .bind(entry.quantity.to_string())
        .bind(entry.invested.to_string())
        .bind(entry.commission.to_string())
        .bind(entry.mode.as_str())
        .bind(entry.at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn delete_position(&mut self, symbol: &str) -> Result<()> {
        let row = sqlx::query("SELECT id FROM positions WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&mut *self.tx)
            .await?;
        if let Some(row) = row {
            let id: i64 = row.get("id");
            sqlx::query("DELETE FROM averaging_entries WHERE position_id = ?")
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
            sqlx::query("DELETE FROM positions WHERE id = ?")
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
        }
        Ok(())
    }

    pub async fn update_portfolio(&mut self, state: &PortfolioState) -> Result<()> {
        sqlx::query(
            "UPDATE portfolio_state SET balance_cash = ?, initial_balance = ?, \
             realized_pnl_cumulative = ?, win_count = ?, loss_count = ?, \
             peak_equity = ?, trading_enabled = ? WHERE id = 1",
        )
        .bind(state.balance_cash.to_string())
        .bind(state.initial_balance.to_string())
        .bind(state.realized_pnl_cumulative.to_string())
        .bind(state.win_count as i64)
        .bind(state.loss_count as i64)
        .bind(state.peak_equity.to_string())
        .bind(state.trading_enabled as i64)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn append_signal(&mut self, record: &SignalRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO signals \
             (symbol, at, candle_open_time, signal, regime, votes_delta, \
              top_reasons, price, block_reason) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.symbol)
        .bind(record.at)
        .bind(record.candle_open_time)
        .bind(record.signal.as_str())
        .bind(record.regime.as_str())
        .bind(record.votes_delta)
        .bind(serde_json::to_string(&record.top_reasons).unwrap_or_else(|_| "[]".into()))
        .bind(record.price.to_string())
        .bind(&record.block_reason)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn put_regime_state(
        &mut self,
        symbol: &str,
        state: RegimeState,
        candle_open_time: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO regime_state (symbol, last_mode, last_mode_entered_at, last_candle_open_time) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(symbol) DO UPDATE SET \
              last_mode = excluded.last_mode, \
              last_mode_entered_at = excluded.last_mode_entered_at, \
              last_candle_open_time = excluded.last_candle_open_time",
        )
        .bind(symbol)
        .bind(state.last_mode.as_str())
        .bind(state.last_mode_entered_at)
        .bind(candle_open_time)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn dec_col(row: &sqlx::sqlite::SqliteRow, name: &str) -> Decimal {
    row.get::<String, _>(name).parse().unwrap_or(Decimal::ZERO)
}

fn opt_dec_col(row: &sqlx::sqlite::SqliteRow, name: &str) -> Option<Decimal> {
    row.get::<Option<String>, _>(name)
        .and_then(|s| s.parse().ok())
}

fn portfolio_from_row(row: &sqlx::sqlite::SqliteRow) -> PortfolioState {
    PortfolioState {
        balance_cash: dec_col(row, "balance_cash"),
        initial_balance: dec_col(row, "initial_balance"),
        realized_pnl_cumulative: dec_col(row, "realized_pnl_cumulative"),
        win_count: row.get::<i64, _>("win_count") as u32,
        loss_count: row.get::<i64, _>("loss_count") as u32,
        peak_equity: dec_col(row, "peak_equity"),
        trading_enabled: row.get::<i64, _>("trading_enabled") != 0,
    }
}

fn position_from_row(row: &sqlx::sqlite::SqliteRow, entries: Vec<AveragingEntry>) -> Position {
    Position {
        symbol: row.get("symbol"),
        opened_at: row.get("opened_at"),
        entry_price: dec_col(row, "entry_price"),
        average_entry_price: dec_col(row, "average_entry_price"),
        quantity: dec_col(row, "quantity"),
        initial_invested: dec_col(row, "initial_invested"),
        total_invested: dec_col(row, "total_invested"),
        commission_paid: dec_col(row, "commission_paid"),
        stop_loss_price: dec_col(row, "stop_loss_price"),
        take_profit_price: dec_col(row, "take_profit_price"),
        highest_price_since_entry: dec_col(row, "highest_price_since_entry"),
        trailing_active: row.get::<i64, _>("trailing_active") != 0,
        breakeven_active: row.get::<i64, _>("breakeven_active") != 0,
        partial_tp_taken: row.get::<i64, _>("partial_tp_taken") != 0,
        entry_mode: RegimeMode::parse(&row.get::<String, _>("entry_mode"))
            .unwrap_or(RegimeMode::Unknown),
        entry_votes_delta: row.get::<i64, _>("entry_votes_delta") as i32,
        entry_reasons: serde_json::from_str(&row.get::<String, _>("entry_reasons"))
            .unwrap_or_default(),
        averaging_count: row.get::<i64, _>("averaging_count") as u32,
        averaging_entries: entries,
    }
}

fn averaging_entry_from_row(row: &sqlx::sqlite::SqliteRow) -> AveragingEntry {
    AveragingEntry {
        price: dec_col(row, "price"),
        quantity: dec_col(row, "quantity"),
        invested: dec_col(row, "invested"),
        commission: dec_col(row, "commission"),
        mode: AveragingMode::parse(&row.get::<String, _>("mode"))
            .unwrap_or(AveragingMode::AverageDown),
        at: row.get("at"),
    }
}

fn trade_from_row(row: &sqlx::sqlite::SqliteRow) -> TradeRecord {
    TradeRecord {
        symbol: row.get("symbol"),
        side: TradeSide::parse(&row.get::<String, _>("side")).unwrap_or(TradeSide::Buy),
        price: dec_col(row, "price"),
        quantity: dec_col(row, "quantity"),
        commission: dec_col(row, "commission"),
        realized_pnl: opt_dec_col(row, "realized_pnl"),
        candle_open_time: row.get("candle_open_time"),
        at: row.get("at"),
        reason: row.get("reason"),
        entry_mode: row
            .get::<Option<String>, _>("entry_mode")
            .and_then(|s| RegimeMode::parse(&s)),
        votes_delta: row.get::<Option<i64>, _>("votes_delta").map(|v| v as i32),
        reasons: row
            .get::<Option<String>, _>("reasons")
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
    }
}

async fn averaging_entries(pool: &SqlitePool, position_id: i64) -> Result<Vec<AveragingEntry>> {
    let rows = sqlx::query(
        "SELECT * FROM averaging_entries WHERE position_id = ? ORDER BY at, id",
    )
    .bind(position_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(averaging_entry_from_row).collect())
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
