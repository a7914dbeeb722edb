//! Chat command parsing and execution.
//!
//! Commands mutate state only via ledger operations (symbol CRUD, the
//! pause flag, the force-buy mailbox) or the position manager's close-at-
//! market path for symbol removal. Every handler returns the reply text.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use crate::core::position_manager::PositionManager;
use crate::core::scheduler::FORCE_BUY_KEY;
use crate::errors::BotError;
use crate::exchange::BinanceClient;
use crate::ledger::Ledger;
use crate::types::Timeframe;

const DEFAULT_TRADES_SHOWN: usize = 10;

/// Parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Add(String),
    Remove(String),
    List,
    Status,
    Balance,
    Trades(usize),
    Start,
    Stop,
    Reset,
    ForceBuy(String),
    SignalStats,
    SignalAnalysis,
    Help,
}

impl ChatCommand {
    /// Parse `/command [args]`. Unknown commands and bad arguments are
    /// reported to the caller; no state changes.
    pub fn parse(text: &str) -> Result<Self, BotError> {
        let mut parts = text.trim().split_whitespace();
        let head = parts.next().ok_or_else(|| BotError::BadCommand {
            reason: "empty message".into(),
        })?;
        let head = head.trim_start_matches('/').to_lowercase();
        let arg = parts.next();

        let symbol_arg = |arg: Option<&str>, usage: &str| -> Result<String, BotError> {
            let raw = arg.ok_or_else(|| BotError::BadCommand {
                reason: format!("usage: {usage}"),
            })?;
            let symbol = raw.to_uppercase();
            if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(BotError::BadCommand {
                    reason: format!("invalid symbol '{raw}'"),
                });
            }
            Ok(symbol)
        };

        match head.as_str() {
            "add" => Ok(Self::Add(symbol_arg(arg, "/add SYMBOL")?)),
            "remove" => Ok(Self::Remove(symbol_arg(arg, "/remove SYMBOL")?)),
            "list" => Ok(Self::List),
            "status" => Ok(Self::Status),
            "balance" => Ok(Self::Balance),
            "trades" => {
                let n = match arg {
                    Some(raw) => raw.parse().map_err(|_| BotError::BadCommand {
                        reason: format!("invalid count '{raw}'"),
                    })?,
                    None => DEFAULT_TRADES_SHOWN,
                };
                Ok(Self::Trades(n))
            }
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "reset" => Ok(Self::Reset),
            "force_buy" | "forcebuy" => {
                Ok(Self::ForceBuy(symbol_arg(arg, "/force_buy SYMBOL")?))
            }
            "signal_stats" => Ok(Self::SignalStats),
            "signal_analysis" => Ok(Self::SignalAnalysis),
            "help" | "start_help" => Ok(Self::Help),
            other => Err(BotError::BadCommand {
                reason: format!("unknown command '/{other}'"),
            }),
        }
    }
}

/// Executes parsed commands against the ledger and position manager.
pub struct CommandHandler {
    ledger: Arc<Ledger>,
    manager: Arc<PositionManager>,
    client: Arc<BinanceClient>,
    timeframe: Timeframe,
    initial_balance: Decimal,
}

impl CommandHandler {
    pub fn new(
        ledger: Arc<Ledger>,
        manager: Arc<PositionManager>,
        client: Arc<BinanceClient>,
        timeframe: Timeframe,
        initial_balance: Decimal,
    ) -> Self {
        Self {
            ledger,
            manager,
            client,
            timeframe,
            initial_balance,
        }
    }

    /// Execute one command, returning the reply text.
    pub async fn handle(&self, command: ChatCommand) -> Result<String, BotError> {
        match command {
            ChatCommand::Add(symbol) => self.add(symbol).await,
            ChatCommand::Remove(symbol) => self.remove(symbol).await,
            ChatCommand::List => self.list().await,
            ChatCommand::Status => self.status().await,
            ChatCommand::Balance => self.balance().await,
            ChatCommand::Trades(n) => self.trades(n).await,
            ChatCommand::Start => {
                self.ledger
                    .set_trading_enabled(true)
                    .await
                    .map_err(ledger_err)?;
                Ok("Trading resumed.".into())
            }
            ChatCommand::Stop => {
                self.ledger
                    .set_trading_enabled(false)
                    .await
                    .map_err(ledger_err)?;
                Ok("Trading paused. Open positions are left as they are.".into())
            }
            ChatCommand::Reset => {
                self.ledger
                    .reset_portfolio(self.initial_balance)
                    .await
                    .map_err(ledger_err)?;
                Ok(format!(
                    "Portfolio reset to {:.2}. History and positions cleared.",
                    self.initial_balance
                ))
            }
            ChatCommand::ForceBuy(symbol) => self.force_buy(symbol).await,
            ChatCommand::SignalStats => self.signal_stats().await,
            ChatCommand::SignalAnalysis => self.signal_analysis().await,
            ChatCommand::Help => Ok(help_text()),
        }
    }

    async fn add(&self, symbol: String) -> Result<String, BotError> {
        let now = now_unix();
        self.ledger
            .add_symbol(&symbol, now)
            .await
            .map_err(ledger_err)?;
        info!(symbol, "symbol added via chat");
        Ok(format!("Tracking {symbol}."))
    }

    /// Removal resolves an open position by closing it at market first.
    async fn remove(&self, symbol: String) -> Result<String, BotError> {
        let now = now_unix();
        let mut closed_note = String::new();

        if self
            .ledger
            .get_open_position(&symbol)
            .await
            .map_err(ledger_err)?
            .is_some()
        {
            let candles = self
                .client
                .fetch_closed_candles(&symbol, self.timeframe, 2, now)
                .await?;
            let price = candles
                .last()
                .map(|c| c.close)
                .ok_or_else(|| BotError::DataUnavailable {
                    name: format!("price for {symbol}"),
                })?;
            self.manager
                .force_close(&symbol, price, now)
                .await
                .map_err(|e| BotError::LedgerError {
                    reason: e.to_string(),
                })?;
            closed_note = format!(" Open position closed at {price}.");
        }

        let removed = self
            .ledger
            .remove_symbol(&symbol)
            .await
            .map_err(ledger_err)?;
        info!(symbol, removed, "symbol removed via chat");
        Ok(if removed {
            format!("Stopped tracking {symbol}.{closed_note}")
        } else {
            format!("{symbol} was not tracked.{closed_note}")
        })
    }

    async fn list(&self) -> Result<String, BotError> {
        let symbols = self.ledger.get_tracked_symbols().await.map_err(ledger_err)?;
        if symbols.is_empty() {
            return Ok("No symbols tracked. Use /add SYMBOL.".into());
        }
        let lines: Vec<String> = symbols
            .iter()
            .map(|s| {
                format!(
                    "{} {}",
                    s.symbol,
                    if s.active { "" } else { "(inactive)" }
                )
                .trim_end()
                .to_string()
            })
            .collect();
        Ok(format!("Tracked symbols:\n{}", lines.join("\n")))
    }

    async fn status(&self) -> Result<String, BotError> {
        let pf = self.ledger.get_portfolio_state().await.map_err(ledger_err)?;
        let positions = self.ledger.get_all_positions().await.map_err(ledger_err)?;

        let mut out = format!(
            "Engine: {}\nCash: {:.2}\nRealized P&L: {:+.2}\nOpen positions: {}\n",
            if pf.trading_enabled { "running" } else { "paused" },
            pf.balance_cash,
            pf.realized_pnl_cumulative,
            positions.len(),
        );
        for pos in &positions {
            out.push_str(&format!(
                "\n{}: qty {} @ avg {:.4} | SL {:.4} | TP {:.4} | mode {}{}{}",
                pos.symbol,
                pos.quantity,
                pos.average_entry_price,
                pos.stop_loss_price,
                pos.take_profit_price,
                pos.entry_mode,
                if pos.trailing_active { " | trailing" } else { "" },
                if pos.partial_tp_taken { " | partial taken" } else { "" },
            ));
        }
        Ok(out)
    }

    async fn balance(&self) -> Result<String, BotError> {
        let pf = self.ledger.get_portfolio_state().await.map_err(ledger_err)?;
        let closed = pf.win_count + pf.loss_count;
        let win_rate = pf.win_rate() * dec!(100);
        Ok(format!(
            "Cash: {:.2}\nInitial: {:.2}\nRealized P&L: {:+.2}\nPeak equity: {:.2}\nClosed trades: {closed} (win rate {:.1}%)",
            pf.balance_cash, pf.initial_balance, pf.realized_pnl_cumulative, pf.peak_equity, win_rate,
        ))
    }

    async fn trades(&self, n: usize) -> Result<String, BotError> {
        let trades = self
            .ledger
            .get_trades(n.clamp(1, 100))
            .await
            .map_err(ledger_err)?;
        if trades.is_empty() {
            return Ok("No trades yet.".into());
        }
        let lines: Vec<String> = trades
            .iter()
            .map(|t| {
                let pnl = t
                    .realized_pnl
                    .map(|p| format!(" | P&L {p:+.2}"))
                    .unwrap_or_default();
                format!("{} {} {} @ {:.4}{pnl}", t.symbol, t.side, t.quantity, t.price)
            })
            .collect();
        Ok(format!("Last {} trades:\n{}", trades.len(), lines.join("\n")))
    }

    /// Queue a force-buy through the ledger mailbox; the next scheduler
    /// tick consumes it. Filters are bypassed, the position cap and cash
    /// checks are not.
    async fn force_buy(&self, symbol: String) -> Result<String, BotError> {
        let tracked = self
            .ledger
            .get_tracked_symbols()
            .await
            .map_err(ledger_err)?;
        if !tracked.iter().any(|s| s.symbol == symbol && s.active) {
            return Err(BotError::BadCommand {
                reason: format!("{symbol} is not an active tracked symbol"),
            });
        }
        self.ledger
            .put_setting(FORCE_BUY_KEY, &symbol)
            .await
            .map_err(ledger_err)?;
        Ok(format!(
            "Force-buy for {symbol} queued; the next closed candle will execute it."
        ))
    }

    async fn signal_stats(&self) -> Result<String, BotError> {
        let stats = self.ledger.signal_stats().await.map_err(ledger_err)?;
        if stats.by_kind.is_empty() {
            return Ok("No signals recorded yet.".into());
        }
        let mut out = String::from("Signals by kind:\n");
        for (kind, n) in &stats.by_kind {
            out.push_str(&format!("  {kind}: {n}\n"));
        }
        if !stats.by_block_reason.is_empty() {
            out.push_str("Blocked entries by reason:\n");
            for (reason, n) in &stats.by_block_reason {
                out.push_str(&format!("  {reason}: {n}\n"));
            }
        }
        Ok(out.trim_end().to_string())
    }

    async fn signal_analysis(&self) -> Result<String, BotError> {
        let signals = self.ledger.recent_signals(10).await.map_err(ledger_err)?;
        if signals.is_empty() {
            return Ok("No signals recorded yet.".into());
        }
        let lines: Vec<String> = signals
            .iter()
            .map(|s| {
                let block = s
                    .block_reason
                    .as_deref()
                    .map(|b| format!(" [blocked: {b}]"))
                    .unwrap_or_default();
                format!(
                    "{} {} {} delta {:+} @ {:.4}{block}",
                    s.symbol,
                    s.regime,
                    s.signal.as_str(),
                    s.votes_delta,
                    s.price,
                )
            })
            .collect();
        Ok(format!("Recent signals:\n{}", lines.join("\n")))
    }
}

fn help_text() -> String {
    "Commands:\n\
     /add SYMBOL — track a pair\n\
     /remove SYMBOL — untrack (closes any open position at market)\n\
     /list — tracked pairs\n\
     /status — engine and positions\n\
     /balance — portfolio aggregates\n\
     /trades [N] — recent trades\n\
     /start, /stop — resume / pause trading\n\
     /reset — wipe history and restore the initial balance\n\
     /force_buy SYMBOL — debug entry bypassing filters\n\
     /signal_stats — signal counts and block reasons\n\
     /signal_analysis — recent signal records"
        .into()
}

fn ledger_err(e: anyhow::Error) -> BotError {
    BotError::LedgerError {
        reason: e.to_string(),
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(ChatCommand::parse("/list").unwrap(), ChatCommand::List);
        assert_eq!(ChatCommand::parse("status").unwrap(), ChatCommand::Status);
        assert_eq!(
            ChatCommand::parse("/add btcusdt").unwrap(),
            ChatCommand::Add("BTCUSDT".into())
        );
        assert_eq!(
            ChatCommand::parse("/remove ETHUSDT").unwrap(),
            ChatCommand::Remove("ETHUSDT".into())
        );
        assert_eq!(
            ChatCommand::parse("/force_buy solusdt").unwrap(),
            ChatCommand::ForceBuy("SOLUSDT".into())
        );
    }

    #[test]
    fn test_parse_trades_count() {
        assert_eq!(ChatCommand::parse("/trades").unwrap(), ChatCommand::Trades(10));
        assert_eq!(ChatCommand::parse("/trades 25").unwrap(), ChatCommand::Trades(25));
        assert!(ChatCommand::parse("/trades many").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert!(ChatCommand::parse("/selfdestruct").is_err());
        assert!(ChatCommand::parse("").is_err());
        assert!(ChatCommand::parse("/add").is_err());
        assert!(ChatCommand::parse("/add BTC-USD").is_err());
    }

    // Handler tests run against the in-memory ledger; paths that need the
    // exchange (remove-with-position) are covered by the scenario suite.

    use crate::config::ExchangeConfig;
    use crate::core::position_manager::PositionManager;
    use crate::core::testkit::{position_config, signal_config};
    use crate::exchange::ExecutionMode;
    use tokio::sync::mpsc;

    async fn handler() -> (CommandHandler, Arc<Ledger>) {
        let ledger = Arc::new(Ledger::in_memory().await.unwrap());
        ledger.init_portfolio(dec!(1000)).await.unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let manager = Arc::new(PositionManager::new(
            ledger.clone(),
            signal_config(),
            position_config(),
            ExecutionMode::Paper,
            tx,
        ));
        let config = ExchangeConfig {
            base_url: "http://localhost:0".into(),
            interval: "1h".into(),
            history_candles: 250,
            poll_granularity_seconds: 60,
            fetch_timeout_seconds: 1,
            fetch_retries: 0,
            retry_base_delay_ms: 1,
            max_concurrent_fetches: 8,
            initial_symbols: vec![],
        };
        let client = Arc::new(BinanceClient::new(&config));
        (
            CommandHandler::new(ledger.clone(), manager, client, Timeframe::H1, dec!(1000)),
            ledger,
        )
    }

    #[tokio::test]
    async fn test_add_list_remove_round_trip() {
        let (handler, ledger) = handler().await;

        let reply = handler.handle(ChatCommand::Add("BTCUSDT".into())).await.unwrap();
        assert!(reply.contains("BTCUSDT"));
        assert_eq!(ledger.get_tracked_symbols().await.unwrap().len(), 1);

        let reply = handler.handle(ChatCommand::List).await.unwrap();
        assert!(reply.contains("BTCUSDT"));

        let reply = handler.handle(ChatCommand::Remove("BTCUSDT".into())).await.unwrap();
        assert!(reply.contains("Stopped tracking"));
        assert!(ledger.get_tracked_symbols().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_start_toggle_ledger_flag() {
        let (handler, ledger) = handler().await;

        handler.handle(ChatCommand::Stop).await.unwrap();
        assert!(!ledger.get_portfolio_state().await.unwrap().trading_enabled);

        handler.handle(ChatCommand::Start).await.unwrap();
        assert!(ledger.get_portfolio_state().await.unwrap().trading_enabled);
    }

    #[tokio::test]
    async fn test_force_buy_requires_tracked_symbol() {
        let (handler, ledger) = handler().await;

        let err = handler
            .handle(ChatCommand::ForceBuy("BTCUSDT".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::BadCommand { .. }));

        handler.handle(ChatCommand::Add("BTCUSDT".into())).await.unwrap();
        handler.handle(ChatCommand::ForceBuy("BTCUSDT".into())).await.unwrap();
        assert_eq!(
            ledger.get_setting(FORCE_BUY_KEY).await.unwrap().as_deref(),
            Some("BTCUSDT")
        );
    }

    #[tokio::test]
    async fn test_balance_and_empty_surfaces() {
        let (handler, _ledger) = handler().await;

        let reply = handler.handle(ChatCommand::Balance).await.unwrap();
        assert!(reply.contains("1000.00"));

        assert!(handler.handle(ChatCommand::Trades(5)).await.unwrap().contains("No trades"));
        assert!(handler
            .handle(ChatCommand::SignalStats)
            .await
            .unwrap()
            .contains("No signals"));
    }
}
