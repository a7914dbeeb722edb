//! Position lifecycle manager.
//!
//! Runs the full per-candle tick for one symbol inside a single ledger
//! transaction: regime selection, signal evaluation, the ordered
//! exit-priority protocol, averaging, and entries. The first matching exit
//! step wins; averaging is only considered for a position that survived
//! every exit step.
//!
//! Exit priority:
//!   1. hard stop-loss
//!   2. break-even stop
//!   3. trailing stop
//!   4. partial take-profit (one-shot, trend entries only)
//!   5. trailing activation
//!   6. take-profit
//!   7. signal exit
//!   8. averaging (average-down / pyramid-up)

use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{PositionConfig, SignalConfig};
use crate::constants::{LOT_DECIMALS, SIGNAL_STRENGTH_STRONG};
use crate::core::regime::RegimeSelector;
use crate::core::signal::{LedgerView, SignalGenerator};
use crate::errors::BotError;
use crate::exchange::{ExecutionMode, OrderResult, OrderSide};
use crate::ledger::{Ledger, TickTxn};
use crate::types::{
    AveragingEntry, AveragingMode, IndicatorSnapshot, Notification, PortfolioState, Position,
    RegimeMode, SignalDecision, SignalKind, SignalRecord, TradeRecord, TradeSide,
};

/// What one symbol tick did at the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    /// Committed; carries the number of trades emitted.
    Processed { trades: usize },
    /// The candle was already committed earlier; nothing changed.
    Replayed,
}

/// Owns open positions and the per-candle decision flow.
pub struct PositionManager {
    ledger: Arc<Ledger>,
    selector: RegimeSelector,
    generator: SignalGenerator,
    config: PositionConfig,
    execution: ExecutionMode,
    notifier: mpsc::Sender<Notification>,
}

impl PositionManager {
    pub fn new(
        ledger: Arc<Ledger>,
        signals: SignalConfig,
        config: PositionConfig,
        execution: ExecutionMode,
        notifier: mpsc::Sender<Notification>,
    ) -> Self {
        let selector = RegimeSelector::new(&signals.regime);
        let generator = SignalGenerator::new(signals, &config);
        Self {
            ledger,
            selector,
            generator,
            config,
            execution,
            notifier,
        }
    }

    // -----------------------------------------------------------------------
    // Tick entry point
    // -----------------------------------------------------------------------

    /// Process one closed candle for `symbol`.
    ///
    /// All reads and writes happen in one transaction; on a replayed candle
    /// the transaction rolls back and the tick reports [`TickResult::Replayed`].
    pub async fn process_tick(
        &self,
        symbol: &str,
        snap: &IndicatorSnapshot,
        now: i64,
        force_buy: bool,
    ) -> Result<TickResult> {
        let mut txn = self.ledger.begin_tick().await?;

        // Short-circuit replays up front so diagnostics stay duplicate-free.
        // Anything at or before the last committed candle is a replay.
        let (prior_regime, last_candle) = txn.regime_state(symbol).await?;
        if !force_buy && last_candle.is_some_and(|t| t >= snap.open_time) {
            txn.rollback().await?;
            return Ok(TickResult::Replayed);
        }

        let mut portfolio = txn.portfolio().await?;
        let position = txn.open_position(symbol).await?;
        let open_count = txn.open_position_count().await?;
        let closed_trades = txn
            .closed_trades(self.config.sizing.kelly_lookback_window)
            .await?;

        let (mode, new_regime) = self.selector.select(snap.adx, now, prior_regime);

        let view = LedgerView {
            open_position: position.clone(),
            open_position_count: open_count,
            free_cash: portfolio.balance_cash,
            closed_trades,
        };
        let decision = self.generator.evaluate(snap, mode, &view, force_buy);

        let mut notices: Vec<Notification> = Vec::new();

        let applied = if let Some(pos) = position {
            self.manage_open_position(
                &mut txn,
                &mut portfolio,
                pos,
                snap,
                &decision,
                now,
                &mut notices,
            )
            .await
        } else if decision.kind == SignalKind::Buy && decision.block_reason.is_none() {
            self.open_new_position(
                &mut txn,
                &mut portfolio,
                symbol,
                snap,
                &decision,
                now,
                &mut notices,
            )
            .await
        } else {
            Ok(0)
        };

        let trades = match applied {
            Ok(n) => n,
            Err(e) if e.is_replay() => {
                txn.rollback().await?;
                info!(symbol, candle = snap.open_time, "replayed candle, tick rolled back");
                return Ok(TickResult::Replayed);
            }
            Err(e @ BotError::InvariantViolation { .. }) => {
                txn.rollback().await?;
                self.notify(Notification::Critical {
                    symbol: symbol.to_string(),
                    message: e.to_string(),
                });
                return Err(e).context("tick rolled back on invariant violation");
            }
            Err(e) => {
                txn.rollback().await?;
                return Err(e.into());
            }
        };

        // Diagnostics record for every evaluated candle, blocked or not.
        txn.append_signal(&SignalRecord {
            symbol: symbol.to_string(),
            at: now,
            candle_open_time: snap.open_time,
            signal: decision.kind,
            regime: mode,
            votes_delta: decision.votes.delta,
            top_reasons: decision.votes.top3.clone(),
            price: snap.price,
            block_reason: decision.block_reason.clone(),
        })
        .await?;

        txn.put_regime_state(symbol, new_regime, snap.open_time).await?;

        // Peak equity against the cost basis of what remains invested.
        let invested = txn.invested_sum().await?;
        let equity_estimate = portfolio.balance_cash + invested;
        if equity_estimate > portfolio.peak_equity {
            portfolio.peak_equity = equity_estimate;
        }
        txn.update_portfolio(&portfolio).await?;

        txn.commit().await?;

        for notice in notices {
            self.notify(notice);
        }

        Ok(TickResult::Processed { trades })
    }

    /// Close an open position at market outside the candle flow (symbol
    /// removal). No-op when nothing is open.
    pub async fn force_close(&self, symbol: &str, price: Decimal, now: i64) -> Result<bool> {
        let mut txn = self.ledger.begin_tick().await?;
        let Some(pos) = txn.open_position(symbol).await? else {
            txn.rollback().await?;
            return Ok(false);
        };
        let mut portfolio = txn.portfolio().await?;
        let mut notices = Vec::new();

        self.close_full(
            &mut txn,
            &mut portfolio,
            pos,
            TradeSide::Sell,
            "symbol_removed",
            price,
            now, // stands in for a candle key outside the candle flow
            now,
            &mut notices,
        )
        .await?;

        txn.update_portfolio(&portfolio).await?;
        txn.commit().await?;
        for notice in notices {
            self.notify(notice);
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Exit priority protocol
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn manage_open_position(
        &self,
        txn: &mut TickTxn,
        portfolio: &mut PortfolioState,
        mut pos: Position,
        snap: &IndicatorSnapshot,
        decision: &SignalDecision,
        now: i64,
        notices: &mut Vec<Notification>,
    ) -> Result<usize, BotError> {
        let price = snap.price;
        let exits = &self.config.exits;
        let candle = snap.open_time;

        // 1. Hard stop-loss. Once the stop has been promoted to break-even
        // it sits at the average entry, so a hit there is a break-even stop.
        if price <= pos.stop_loss_price {
            let (side, reason) =
                if pos.breakeven_active && pos.stop_loss_price >= pos.average_entry_price {
                    (TradeSide::BreakevenStop, "BREAKEVEN_STOP")
                } else {
                    (TradeSide::StopLoss, "STOP_LOSS")
                };
            return self
                .close_full(txn, portfolio, pos, side, reason, price, candle, now, notices)
                .await;
        }

        // 2. Break-even stop.
        if pos.breakeven_active && price <= pos.average_entry_price {
            return self
                .close_full(
                    txn, portfolio, pos,
                    TradeSide::BreakevenStop, "BREAKEVEN_STOP",
                    price, candle, now, notices,
                )
                .await;
        }

        // 3. Trailing stop.
        if pos.trailing_active {
            pos.highest_price_since_entry = pos.highest_price_since_entry.max(price);
            let floor = pos.highest_price_since_entry * (dec!(1) - exits.trail_distance_pct);
            if price <= floor {
                return self
                    .close_full(
                        txn, portfolio, pos,
                        TradeSide::TrailingStop, "TRAILING_STOP",
                        price, candle, now, notices,
                    )
                    .await;
            }
        }

        // 4. Partial take-profit: one-shot, trend entries only.
        let is_trend_entry = matches!(
            pos.entry_mode,
            RegimeMode::TrendFollowing | RegimeMode::Transition
        );
        if !pos.partial_tp_taken
            && is_trend_entry
            && price >= pos.average_entry_price * (dec!(1) + exits.partial_tp_trigger)
        {
            return self
                .partial_close(txn, portfolio, pos, price, candle, now, notices)
                .await;
        }

        // 5. Trailing activation; no trade this tick.
        let activation_pct = match pos.entry_mode {
            RegimeMode::TrendFollowing | RegimeMode::Transition => exits.trail_activation_pct_tf,
            _ => exits.trail_activation_pct_mr,
        };
        if !pos.trailing_active
            && price >= pos.average_entry_price * (dec!(1) + activation_pct)
        {
            pos.trailing_active = true;
            pos.highest_price_since_entry = pos.highest_price_since_entry.max(price);
            debug!(symbol = %pos.symbol, %price, "trailing stop armed");
            self.persist_position(txn, &pos).await?;
            return Ok(0);
        }

        // 6. Take-profit.
        if price >= pos.take_profit_price {
            return self
                .close_full(
                    txn, portfolio, pos,
                    TradeSide::TakeProfit, "TAKE_PROFIT",
                    price, candle, now, notices,
                )
                .await;
        }

        // 7. Signal exit.
        if decision.kind == SignalKind::Sell {
            return self
                .close_full(
                    txn, portfolio, pos,
                    TradeSide::SignalExit, "SIGNAL_EXIT",
                    price, candle, now, notices,
                )
                .await;
        }

        // 8. Averaging, only for a position that survived every exit.
        self.try_average(txn, portfolio, pos, snap, decision, now, notices)
            .await
    }

    // -----------------------------------------------------------------------
    // Averaging
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn try_average(
        &self,
        txn: &mut TickTxn,
        portfolio: &mut PortfolioState,
        mut pos: Position,
        snap: &IndicatorSnapshot,
        decision: &SignalDecision,
        now: i64,
        notices: &mut Vec<Notification>,
    ) -> Result<usize, BotError> {
        let avg_cfg = &self.config.averaging;
        let price = snap.price;

        if !avg_cfg.enabled || pos.averaging_count >= avg_cfg.max_attempts {
            self.persist_position(txn, &pos).await?;
            return Ok(0);
        }

        // A BUY suppressed only because this symbol is already held still
        // counts as buy intent for pyramiding.
        let buy_intent = decision.kind == SignalKind::Buy
            || decision.block_reason.as_deref() == Some("already_holding");

        let avg_mode = if price <= pos.average_entry_price * (dec!(1) - avg_cfg.price_drop_pct)
            && now - pos.opened_at >= avg_cfg.time_threshold_seconds()
        {
            Some(AveragingMode::AverageDown)
        } else if avg_cfg.pyramid_enabled
            && snap.adx > avg_cfg.pyramid_adx_threshold
            && price > pos.average_entry_price * (dec!(1) + avg_cfg.pyramid_gain_pct)
            && buy_intent
        {
            Some(AveragingMode::PyramidUp)
        } else {
            None
        };

        let Some(avg_mode) = avg_mode else {
            self.persist_position(txn, &pos).await?;
            return Ok(0);
        };

        let new_invest = match avg_mode {
            AveragingMode::AverageDown => pos.initial_invested * avg_cfg.size_pct,
            AveragingMode::PyramidUp => {
                let strength = Decimal::from(decision.votes.delta.max(1))
                    / Decimal::from(SIGNAL_STRENGTH_STRONG);
                pos.initial_invested * avg_cfg.size_pct * strength * dec!(0.6)
            }
        };

        // Total-risk cap.
        if pos.total_invested + new_invest
            > pos.initial_invested * avg_cfg.max_total_risk_multiplier
        {
            debug!(
                symbol = %pos.symbol,
                mode = avg_mode.as_str(),
                total = %pos.total_invested,
                add = %new_invest,
                "averaging rejected by risk cap"
            );
            self.persist_position(txn, &pos).await?;
            return Ok(0);
        }

        if new_invest > portfolio.balance_cash {
            self.persist_position(txn, &pos).await?;
            return Ok(0);
        }

        let fill = match self.fill(&pos.symbol, OrderSide::Buy, new_invest, price, now).await {
            Ok(f) => f,
            Err(e) => {
                warn!(symbol = %pos.symbol, error = %e, "averaging order failed");
                self.persist_position(txn, &pos).await?;
                return Ok(0);
            }
        };
        if fill.quantity <= Decimal::ZERO {
            self.persist_position(txn, &pos).await?;
            return Ok(0);
        }

        let invested = fill.price * fill.quantity + fill.commission;

        // Recompute the qty-weighted average entry.
        let old_cost = pos.average_entry_price * pos.quantity;
        let new_cost = fill.price * fill.quantity;
        let total_qty = pos.quantity + fill.quantity;
        pos.average_entry_price = (old_cost + new_cost) / total_qty;
        pos.quantity = total_qty;
        pos.total_invested += invested;
        pos.commission_paid += fill.commission;
        pos.averaging_count += 1;

        // Stops re-anchor on the new average but never widen.
        let sl_pct = self.dynamic_stop_pct(snap.atr_pct);
        let recomputed_sl = pos.average_entry_price * (dec!(1) - sl_pct);
        pos.stop_loss_price = pos.stop_loss_price.max(recomputed_sl);

        let tp_pct = match avg_mode {
            AveragingMode::AverageDown => self.config.exits.mr_take_profit_pct,
            AveragingMode::PyramidUp => match pos.entry_mode {
                RegimeMode::TrendFollowing | RegimeMode::Transition => {
                    self.config.exits.tf_take_profit_pct
                }
                _ => self.config.exits.mr_take_profit_pct,
            },
        };
        pos.take_profit_price = pos.average_entry_price * (dec!(1) + tp_pct);

        let entry = AveragingEntry {
            price: fill.price,
            quantity: fill.quantity,
            invested,
            commission: fill.commission,
            mode: avg_mode,
            at: now,
        };
        pos.averaging_entries.push(entry.clone());

        let side = match avg_mode {
            AveragingMode::AverageDown => TradeSide::AverageDown,
            AveragingMode::PyramidUp => TradeSide::PyramidUp,
        };
        txn.insert_trade(&TradeRecord {
            symbol: pos.symbol.clone(),
            side,
            price: fill.price,
            quantity: fill.quantity,
            commission: fill.commission,
            realized_pnl: None,
            candle_open_time: snap.open_time,
            at: now,
            reason: side.as_str().into(),
            entry_mode: Some(pos.entry_mode),
            votes_delta: Some(decision.votes.delta),
            reasons: decision.votes.top3.clone(),
        })
        .await?;

        self.persist_position(txn, &pos).await?;
        txn.insert_averaging_entry(&pos.symbol, &entry)
            .await
            .map_err(|e| BotError::LedgerError {
                reason: e.to_string(),
            })?;

        portfolio.balance_cash -= invested;

        info!(
            symbol = %pos.symbol,
            mode = avg_mode.as_str(),
            count = pos.averaging_count,
            average_entry = %pos.average_entry_price,
            invested = %invested,
            "position averaged"
        );
        notices.push(Notification::Averaged {
            symbol: pos.symbol.clone(),
            mode: avg_mode,
            price: fill.price,
            quantity: fill.quantity,
            average_entry_price: pos.average_entry_price,
            averaging_count: pos.averaging_count,
        });

        Ok(1)
    }

    // -----------------------------------------------------------------------
    // Entries
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn open_new_position(
        &self,
        txn: &mut TickTxn,
        portfolio: &mut PortfolioState,
        symbol: &str,
        snap: &IndicatorSnapshot,
        decision: &SignalDecision,
        now: i64,
        notices: &mut Vec<Notification>,
    ) -> Result<usize, BotError> {
        let price = snap.price;
        let invest = portfolio.balance_cash * decision.size_fraction;

        let fill = self.fill(symbol, OrderSide::Buy, invest, price, now).await?;
        if fill.quantity <= Decimal::ZERO {
            return Ok(0);
        }
        let invested = fill.price * fill.quantity + fill.commission;

        let stop_loss_price = fill.price * (dec!(1) - decision.exit.stop_loss_pct);
        let take_profit_price = fill.price * (dec!(1) + decision.exit.take_profit_pct);

        let pos = Position {
            symbol: symbol.to_string(),
            opened_at: now,
            entry_price: fill.price,
            average_entry_price: fill.price,
            quantity: fill.quantity,
            initial_invested: invested,
            total_invested: invested,
            commission_paid: fill.commission,
            stop_loss_price,
            take_profit_price,
            highest_price_since_entry: fill.price,
            trailing_active: false,
            breakeven_active: false,
            partial_tp_taken: false,
            entry_mode: decision.mode,
            entry_votes_delta: decision.votes.delta,
            entry_reasons: decision.votes.top3.clone(),
            averaging_count: 0,
            averaging_entries: vec![],
        };

        txn.insert_trade(&TradeRecord {
            symbol: symbol.to_string(),
            side: TradeSide::Buy,
            price: fill.price,
            quantity: fill.quantity,
            commission: fill.commission,
            realized_pnl: None,
            candle_open_time: snap.open_time,
            at: now,
            reason: "BUY".into(),
            entry_mode: Some(decision.mode),
            votes_delta: Some(decision.votes.delta),
            reasons: decision.votes.top3.clone(),
        })
        .await?;

        self.persist_position(txn, &pos).await?;
        portfolio.balance_cash -= invested;

        info!(
            symbol,
            mode = %decision.mode,
            price = %fill.price,
            quantity = %fill.quantity,
            invested = %invested,
            stop_loss = %stop_loss_price,
            take_profit = %take_profit_price,
            votes_delta = decision.votes.delta,
            "position opened"
        );
        notices.push(Notification::PositionOpened {
            symbol: symbol.to_string(),
            price: fill.price,
            quantity: fill.quantity,
            invested,
            mode: decision.mode,
            votes_delta: decision.votes.delta,
            top_reasons: decision.votes.top3.clone(),
        });

        Ok(1)
    }

    // -----------------------------------------------------------------------
    // Closes
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn close_full(
        &self,
        txn: &mut TickTxn,
        portfolio: &mut PortfolioState,
        pos: Position,
        side: TradeSide,
        reason: &str,
        price: Decimal,
        candle_open_time: i64,
        now: i64,
        notices: &mut Vec<Notification>,
    ) -> Result<usize, BotError> {
        let fill = self
            .sell(&pos.symbol, pos.quantity, price, now)
            .await?;
        let proceeds = fill.price * fill.quantity;
        let realized = proceeds - fill.commission - pos.total_invested;

        txn.insert_trade(&TradeRecord {
            symbol: pos.symbol.clone(),
            side,
            price: fill.price,
            quantity: fill.quantity,
            commission: fill.commission,
            realized_pnl: Some(realized),
            candle_open_time,
            at: now,
            reason: reason.into(),
            entry_mode: Some(pos.entry_mode),
            votes_delta: Some(pos.entry_votes_delta),
            reasons: pos.entry_reasons.clone(),
        })
        .await?;
        txn.delete_position(&pos.symbol)
            .await
            .map_err(|e| BotError::LedgerError {
                reason: e.to_string(),
            })?;

        portfolio.balance_cash += proceeds - fill.commission;
        portfolio.realized_pnl_cumulative += realized;
        if realized > Decimal::ZERO {
            portfolio.win_count += 1;
        } else {
            portfolio.loss_count += 1;
        }

        info!(
            symbol = %pos.symbol,
            reason,
            price = %fill.price,
            quantity = %fill.quantity,
            realized = %realized,
            balance = %portfolio.balance_cash,
            "position closed"
        );
        notices.push(Notification::PositionClosed {
            symbol: pos.symbol.clone(),
            side,
            price: fill.price,
            quantity: fill.quantity,
            realized_pnl: realized,
            balance_after: portfolio.balance_cash,
        });

        Ok(1)
    }

    #[allow(clippy::too_many_arguments)]
    async fn partial_close(
        &self,
        txn: &mut TickTxn,
        portfolio: &mut PortfolioState,
        mut pos: Position,
        price: Decimal,
        candle_open_time: i64,
        now: i64,
        notices: &mut Vec<Notification>,
    ) -> Result<usize, BotError> {
        let exits = &self.config.exits;
        let close_qty = (pos.quantity * exits.partial_close_pct)
            .round_dp_with_strategy(LOT_DECIMALS, RoundingStrategy::ToZero);
        if close_qty <= Decimal::ZERO {
            self.persist_position(txn, &pos).await?;
            return Ok(0);
        }

        let fill = self.sell(&pos.symbol, close_qty, price, now).await?;
        let fraction = fill.quantity / pos.quantity;
        let invested_closed = pos.total_invested * fraction;
        let proceeds = fill.price * fill.quantity;
        let realized = proceeds - fill.commission - invested_closed;

        pos.quantity -= fill.quantity;
        pos.total_invested -= invested_closed;
        pos.commission_paid += fill.commission;
        pos.partial_tp_taken = true;
        pos.breakeven_active = true;
        // Promote the stop to break-even; it never comes back down.
        pos.stop_loss_price = pos.stop_loss_price.max(pos.average_entry_price);
        pos.take_profit_price =
            pos.average_entry_price * (dec!(1) + exits.partial_tp_remaining_tp);

        txn.insert_trade(&TradeRecord {
            symbol: pos.symbol.clone(),
            side: TradeSide::PartialTp,
            price: fill.price,
            quantity: fill.quantity,
            commission: fill.commission,
            realized_pnl: Some(realized),
            candle_open_time,
            at: now,
            reason: "PARTIAL_TP".into(),
            entry_mode: Some(pos.entry_mode),
            votes_delta: Some(pos.entry_votes_delta),
            reasons: pos.entry_reasons.clone(),
        })
        .await?;
        self.persist_position(txn, &pos).await?;

        portfolio.balance_cash += proceeds - fill.commission;
        portfolio.realized_pnl_cumulative += realized;

        info!(
            symbol = %pos.symbol,
            price = %fill.price,
            quantity = %fill.quantity,
            realized = %realized,
            stop_loss = %pos.stop_loss_price,
            "partial take-profit, stop promoted to break-even"
        );
        notices.push(Notification::PartialClose {
            symbol: pos.symbol.clone(),
            price: fill.price,
            quantity: fill.quantity,
            realized_pnl: realized,
            remaining_quantity: pos.quantity,
        });

        Ok(1)
    }

    // -----------------------------------------------------------------------
    // Fills
    // -----------------------------------------------------------------------

    /// Buy-side fill for a notional amount of quote currency.
    async fn fill(
        &self,
        symbol: &str,
        side: OrderSide,
        notional: Decimal,
        price: Decimal,
        now: i64,
    ) -> Result<OrderResult, BotError> {
        debug_assert_eq!(side, OrderSide::Buy);
        if notional <= Decimal::ZERO || price <= Decimal::ZERO {
            return Ok(OrderResult {
                price,
                quantity: Decimal::ZERO,
                commission: Decimal::ZERO,
            });
        }
        let commission = notional * self.config.commission_rate;
        let quantity = ((notional - commission) / price)
            .round_dp_with_strategy(LOT_DECIMALS, RoundingStrategy::ToZero);

        match &self.execution {
            ExecutionMode::Paper => Ok(OrderResult {
                price,
                quantity,
                // Keep the invested total equal to the reserved notional.
                commission: notional - quantity * price,
            }),
            ExecutionMode::Live(gateway) => {
                gateway
                    .execute_market_order(symbol, side, quantity, now * 1000)
                    .await
            }
        }
    }

    /// Sell-side fill for an exact base quantity.
    async fn sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        now: i64,
    ) -> Result<OrderResult, BotError> {
        match &self.execution {
            ExecutionMode::Paper => {
                let proceeds = quantity * price;
                Ok(OrderResult {
                    price,
                    quantity,
                    commission: proceeds * self.config.commission_rate,
                })
            }
            ExecutionMode::Live(gateway) => {
                gateway
                    .execute_market_order(symbol, OrderSide::Sell, quantity, now * 1000)
                    .await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn dynamic_stop_pct(&self, atr_pct: Decimal) -> Decimal {
        let ex = &self.config.exits;
        let atr_based = (atr_pct * ex.mr_atr_sl_mult).clamp(ex.mr_atr_sl_min, ex.mr_atr_sl_max);
        ex.mr_stop_loss_pct.max(atr_based)
    }

    async fn persist_position(&self, txn: &mut TickTxn, pos: &Position) -> Result<(), BotError> {
        pos.check_invariants(
            self.config.averaging.max_attempts,
            self.config.averaging.max_total_risk_multiplier,
        )
        .map_err(|reason| BotError::InvariantViolation {
            symbol: pos.symbol.clone(),
            reason,
        })?;

        txn.upsert_position(pos)
            .await
            .map_err(|e| BotError::LedgerError {
                reason: e.to_string(),
            })
    }

    fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.try_send(notification) {
            debug!(error = %e, "notification dropped");
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testkit::{
        mr_buy_snapshot, neutral_snapshot, position_config, sell_snapshot, signal_config,
        tf_buy_snapshot,
    };

    const T0: i64 = 1_700_000_000;
    const HOUR: i64 = 3600;

    async fn setup() -> (PositionManager, Arc<Ledger>, mpsc::Receiver<Notification>) {
        let ledger = Arc::new(Ledger::in_memory().await.unwrap());
        ledger.init_portfolio(dec!(1000)).await.unwrap();
        let (tx, rx) = mpsc::channel(64);
        let manager = PositionManager::new(
            ledger.clone(),
            signal_config(),
            position_config(),
            ExecutionMode::Paper,
            tx,
        );
        (manager, ledger, rx)
    }

    fn at(mut snap: IndicatorSnapshot, open_time: i64) -> IndicatorSnapshot {
        snap.open_time = open_time;
        snap
    }

    // -- S1: MR entry, then stop-loss ---------------------------------------

    #[tokio::test]
    async fn test_mr_entry_then_stop_loss() {
        let (manager, ledger, _rx) = setup().await;

        let snap = at(mr_buy_snapshot(), T0);
        let result = manager.process_tick("BTCUSDT", &snap, T0 + HOUR, false).await.unwrap();
        assert_eq!(result, TickResult::Processed { trades: 1 });

        let pos = ledger.get_open_position("BTCUSDT").await.unwrap().unwrap();
        // delta 6 -> base 0.50; MR with ADX 15 -> x1.2; 0.60 of 1000.
        assert_eq!(pos.total_invested, dec!(600));
        assert_eq!(pos.quantity, dec!(5.9946));
        assert_eq!(pos.entry_mode, RegimeMode::MeanReversion);
        assert_eq!(pos.stop_loss_price, dec!(97.00));
        assert!(!pos.trailing_active && !pos.breakeven_active && !pos.partial_tp_taken);

        let pf = ledger.get_portfolio_state().await.unwrap();
        assert_eq!(pf.balance_cash, dec!(400));

        // Next candle dumps through the stop.
        let mut snap2 = at(neutral_snapshot(), T0 + HOUR);
        snap2.price = dec!(96.5);
        let result = manager.process_tick("BTCUSDT", &snap2, T0 + 2 * HOUR, false).await.unwrap();
        assert_eq!(result, TickResult::Processed { trades: 1 });

        assert!(ledger.get_open_position("BTCUSDT").await.unwrap().is_none());
        let trades = ledger.get_trades(10).await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].side, TradeSide::StopLoss);
        // realized = 96.5 * 5.9946 - exit commission - 600
        assert_eq!(trades[0].realized_pnl, Some(dec!(-22.04173101)));

        let pf = ledger.get_portfolio_state().await.unwrap();
        assert_eq!(pf.balance_cash, dec!(977.95826899));
        assert_eq!(pf.loss_count, 1);
        assert_eq!(pf.win_count, 0);
        assert_eq!(pf.realized_pnl_cumulative, dec!(-22.04173101));
    }

    // -- S2: TF entry, partial TP, break-even, trailing stop -----------------

    #[tokio::test]
    async fn test_tf_partial_tp_then_trailing_stop() {
        let (manager, ledger, _rx) = setup().await;

        let mut snap = at(tf_buy_snapshot(), T0);
        snap.price = dec!(200);
        snap.prev_close = dec!(199);
        snap.bb_middle = dec!(199);
        snap.day_low = dec!(175);
        manager.process_tick("ETHUSDT", &snap, T0 + HOUR, false).await.unwrap();

        let pos = ledger.get_open_position("ETHUSDT").await.unwrap().unwrap();
        // delta 7 -> 0.70, TF ADX 30 -> x1.1, clamped to 0.70 of 1000.
        assert_eq!(pos.total_invested, dec!(700));
        assert_eq!(pos.quantity, dec!(3.49685));
        assert_eq!(pos.stop_loss_price, dec!(190.0));
        assert_eq!(pos.entry_mode, RegimeMode::TrendFollowing);

        // +1.5%: one-shot partial TP, stop promoted to break-even.
        let mut snap2 = snap.clone();
        snap2.open_time = T0 + HOUR;
        snap2.price = dec!(203);
        manager.process_tick("ETHUSDT", &snap2, T0 + 2 * HOUR, false).await.unwrap();

        let pos = ledger.get_open_position("ETHUSDT").await.unwrap().unwrap();
        assert!(pos.partial_tp_taken);
        assert!(pos.breakeven_active);
        assert_eq!(pos.stop_loss_price, dec!(200));
        assert_eq!(pos.quantity, dec!(1.748425));
        assert_eq!(pos.total_invested, dec!(350));
        assert_eq!(pos.take_profit_price, dec!(206.00));

        // New high arms the trailing stop (and only arms it).
        let mut snap3 = snap.clone();
        snap3.open_time = T0 + 2 * HOUR;
        snap3.price = dec!(206.5);
        manager.process_tick("ETHUSDT", &snap3, T0 + 3 * HOUR, false).await.unwrap();
        let pos = ledger.get_open_position("ETHUSDT").await.unwrap().unwrap();
        assert!(pos.trailing_active);
        assert_eq!(pos.highest_price_since_entry, dec!(206.5));

        // Pullback below highest x 0.99 closes the remainder.
        let mut snap4 = snap.clone();
        snap4.open_time = T0 + 3 * HOUR;
        snap4.price = dec!(204);
        manager.process_tick("ETHUSDT", &snap4, T0 + 4 * HOUR, false).await.unwrap();

        assert!(ledger.get_open_position("ETHUSDT").await.unwrap().is_none());
        let trades = ledger.get_trades(10).await.unwrap();
        assert_eq!(trades[0].side, TradeSide::TrailingStop);
        let partial = trades.iter().find(|t| t.side == TradeSide::PartialTp).unwrap();
        assert!(partial.realized_pnl.unwrap() > Decimal::ZERO);

        let pf = ledger.get_portfolio_state().await.unwrap();
        assert_eq!(pf.win_count, 1);
        // Partial + final realized both positive: cumulative must be too.
        assert!(pf.realized_pnl_cumulative > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_breakeven_stop_after_partial() {
        let (manager, ledger, _rx) = setup().await;

        let mut snap = at(tf_buy_snapshot(), T0);
        snap.price = dec!(200);
        snap.day_low = dec!(175);
        manager.process_tick("ETHUSDT", &snap, T0 + HOUR, false).await.unwrap();

        let mut snap2 = snap.clone();
        snap2.open_time = T0 + HOUR;
        snap2.price = dec!(203);
        manager.process_tick("ETHUSDT", &snap2, T0 + 2 * HOUR, false).await.unwrap();

        // Fade back to entry: break-even stop, not the hard stop.
        let mut snap3 = snap.clone();
        snap3.open_time = T0 + 2 * HOUR;
        snap3.price = dec!(199.5);
        manager.process_tick("ETHUSDT", &snap3, T0 + 3 * HOUR, false).await.unwrap();

        assert!(ledger.get_open_position("ETHUSDT").await.unwrap().is_none());
        let trades = ledger.get_trades(10).await.unwrap();
        assert_eq!(trades[0].side, TradeSide::BreakevenStop);
    }

    // -- S3: averaging down honours the risk cap -----------------------------

    #[tokio::test]
    async fn test_average_down_then_risk_cap() {
        let (manager, ledger, _rx) = setup().await;

        // Seed an aged position with a stop wide enough to reach -5%.
        let seeded = Position {
            symbol: "SOLUSDT".into(),
            opened_at: T0,
            entry_price: dec!(50),
            average_entry_price: dec!(50),
            quantity: dec!(6.0),
            initial_invested: dec!(300),
            total_invested: dec!(300),
            commission_paid: dec!(0.27),
            stop_loss_price: dec!(46),
            take_profit_price: dec!(52),
            highest_price_since_entry: dec!(50),
            trailing_active: false,
            breakeven_active: false,
            partial_tp_taken: false,
            entry_mode: RegimeMode::MeanReversion,
            entry_votes_delta: 6,
            entry_reasons: vec![],
            averaging_count: 0,
            averaging_entries: vec![],
        };
        let mut txn = ledger.begin_tick().await.unwrap();
        txn.upsert_position(&seeded).await.unwrap();
        txn.commit().await.unwrap();
        // Account for the invested cash.
        let mut pf = ledger.get_portfolio_state().await.unwrap();
        pf.balance_cash -= dec!(300);
        let mut txn = ledger.begin_tick().await.unwrap();
        txn.update_portfolio(&pf).await.unwrap();
        txn.commit().await.unwrap();

        // -5.2% after 25 hours: average down with half the initial notional.
        let mut snap = at(neutral_snapshot(), T0 + 25 * HOUR);
        snap.price = dec!(47.4);
        let now = T0 + 25 * HOUR + HOUR;
        let result = manager.process_tick("SOLUSDT", &snap, now, false).await.unwrap();
        assert_eq!(result, TickResult::Processed { trades: 1 });

        let pos = ledger.get_open_position("SOLUSDT").await.unwrap().unwrap();
        assert_eq!(pos.averaging_count, 1);
        assert_eq!(pos.total_invested, dec!(450));
        assert!(pos.average_entry_price < dec!(50) && pos.average_entry_price > dec!(47.4));
        assert_eq!(pos.averaging_entries.len(), 1);
        assert_eq!(pos.averaging_entries[0].mode, AveragingMode::AverageDown);
        // Stop never widens.
        assert!(pos.stop_loss_price >= dec!(46));

        let trades = ledger.get_trades(10).await.unwrap();
        assert_eq!(trades[0].side, TradeSide::AverageDown);

        // Widen the stop manually so the next tick reaches the averaging
        // step, then check the 1.5x cap rejects a second attempt.
        let mut pos2 = pos.clone();
        pos2.stop_loss_price = dec!(40);
        let mut txn = ledger.begin_tick().await.unwrap();
        txn.upsert_position(&pos2).await.unwrap();
        txn.commit().await.unwrap();

        let mut snap2 = at(neutral_snapshot(), T0 + 50 * HOUR);
        snap2.price = dec!(44.8);
        let result = manager
            .process_tick("SOLUSDT", &snap2, T0 + 51 * HOUR, false)
            .await
            .unwrap();
        assert_eq!(result, TickResult::Processed { trades: 0 });

        let pos = ledger.get_open_position("SOLUSDT").await.unwrap().unwrap();
        assert_eq!(pos.averaging_count, 1, "risk cap must reject the second add");
        assert_eq!(pos.total_invested, dec!(450));
    }

    // -- Pyramid up ----------------------------------------------------------

    #[tokio::test]
    async fn test_pyramid_up_after_partial() {
        let (manager, ledger, _rx) = setup().await;

        let mut snap = at(tf_buy_snapshot(), T0);
        snap.price = dec!(200);
        snap.day_low = dec!(175);
        manager.process_tick("ETHUSDT", &snap, T0 + HOUR, false).await.unwrap();

        // Partial TP at 203, then trailing arms at 204.5.
        let mut snap2 = snap.clone();
        snap2.open_time = T0 + HOUR;
        snap2.price = dec!(203);
        manager.process_tick("ETHUSDT", &snap2, T0 + 2 * HOUR, false).await.unwrap();

        let mut snap3 = snap.clone();
        snap3.open_time = T0 + 2 * HOUR;
        snap3.price = dec!(204.5);
        snap3.day_low = dec!(180);
        manager.process_tick("ETHUSDT", &snap3, T0 + 3 * HOUR, false).await.unwrap();
        let pos = ledger.get_open_position("ETHUSDT").await.unwrap().unwrap();
        assert!(pos.trailing_active);
        assert_eq!(pos.averaging_count, 0);

        // Sideways tick above +2% with a strong buy backdrop: pyramid.
        let mut snap4 = snap.clone();
        snap4.open_time = T0 + 3 * HOUR;
        snap4.price = dec!(204.5);
        snap4.day_low = dec!(180);
        manager.process_tick("ETHUSDT", &snap4, T0 + 4 * HOUR, false).await.unwrap();

        let pos = ledger.get_open_position("ETHUSDT").await.unwrap().unwrap();
        assert_eq!(pos.averaging_count, 1);
        assert_eq!(pos.averaging_entries[0].mode, AveragingMode::PyramidUp);
        // delta 7 of strong 7: 700 * 0.5 * 1 * 0.6 = 210 invested.
        assert_eq!(pos.averaging_entries[0].invested, dec!(210));
        assert!(pos.average_entry_price > dec!(200));
        // Break-even stop from the partial never widens back down.
        assert_eq!(pos.stop_loss_price, dec!(200));
    }

    // -- Signal exit ----------------------------------------------------------

    #[tokio::test]
    async fn test_signal_exit_closes_position() {
        let (manager, ledger, _rx) = setup().await;

        let snap = at(mr_buy_snapshot(), T0);
        manager.process_tick("BTCUSDT", &snap, T0 + HOUR, false).await.unwrap();

        // Bearish sweep below the trailing activation threshold.
        let mut snap2 = at(sell_snapshot(), T0 + HOUR);
        snap2.price = dec!(100.5);
        snap2.prev_close = dec!(102);
        snap2.bb_middle = dec!(101);
        manager.process_tick("BTCUSDT", &snap2, T0 + 2 * HOUR, false).await.unwrap();

        assert!(ledger.get_open_position("BTCUSDT").await.unwrap().is_none());
        let trades = ledger.get_trades(10).await.unwrap();
        assert_eq!(trades[0].side, TradeSide::SignalExit);
        let pf = ledger.get_portfolio_state().await.unwrap();
        assert_eq!(pf.win_count + pf.loss_count, 1);
    }

    // -- S5: idempotent replay ------------------------------------------------

    #[tokio::test]
    async fn test_replay_same_candle_is_noop() {
        let (manager, ledger, _rx) = setup().await;

        let snap = at(mr_buy_snapshot(), T0);
        let r1 = manager.process_tick("BTCUSDT", &snap, T0 + HOUR, false).await.unwrap();
        assert_eq!(r1, TickResult::Processed { trades: 1 });

        let before = ledger.get_open_position("BTCUSDT").await.unwrap().unwrap();
        let pf_before = ledger.get_portfolio_state().await.unwrap();

        // Same candle again, e.g. after a crash-restart.
        let r2 = manager.process_tick("BTCUSDT", &snap, T0 + 2 * HOUR, false).await.unwrap();
        assert_eq!(r2, TickResult::Replayed);

        let after = ledger.get_open_position("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(after.quantity, before.quantity);
        assert_eq!(after.total_invested, before.total_invested);
        assert_eq!(ledger.get_trades(10).await.unwrap().len(), 1);
        let pf_after = ledger.get_portfolio_state().await.unwrap();
        assert_eq!(pf_after.balance_cash, pf_before.balance_cash);
    }

    // -- S6: falling-knife block ---------------------------------------------

    #[tokio::test]
    async fn test_falling_knife_records_block() {
        let (manager, ledger, _rx) = setup().await;

        let mut snap = at(mr_buy_snapshot(), T0);
        snap.day_low = dec!(96); // close 100 within 10% of the day low
        let result = manager.process_tick("BTCUSDT", &snap, T0 + HOUR, false).await.unwrap();
        assert_eq!(result, TickResult::Processed { trades: 0 });

        assert!(ledger.get_open_position("BTCUSDT").await.unwrap().is_none());
        let signals = ledger.recent_signals(5).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].block_reason.as_deref(), Some("falling_knife"));
        assert!(signals[0].votes_delta >= 5);
    }

    // -- Force close ----------------------------------------------------------

    #[tokio::test]
    async fn test_force_close_at_market() {
        let (manager, ledger, _rx) = setup().await;

        let snap = at(mr_buy_snapshot(), T0);
        manager.process_tick("BTCUSDT", &snap, T0 + HOUR, false).await.unwrap();

        let closed = manager.force_close("BTCUSDT", dec!(101), T0 + 2 * HOUR).await.unwrap();
        assert!(closed);
        assert!(ledger.get_open_position("BTCUSDT").await.unwrap().is_none());
        let trades = ledger.get_trades(5).await.unwrap();
        assert_eq!(trades[0].side, TradeSide::Sell);
        assert_eq!(trades[0].reason, "symbol_removed");

        // Second call is a no-op.
        assert!(!manager.force_close("BTCUSDT", dec!(101), T0 + 3 * HOUR).await.unwrap());
    }

    // -- Notifications --------------------------------------------------------

    #[tokio::test]
    async fn test_notifications_emitted_per_event() {
        let (manager, _ledger, mut rx) = setup().await;

        let snap = at(mr_buy_snapshot(), T0);
        manager.process_tick("BTCUSDT", &snap, T0 + HOUR, false).await.unwrap();

        match rx.try_recv().unwrap() {
            Notification::PositionOpened { symbol, votes_delta, .. } => {
                assert_eq!(symbol, "BTCUSDT");
                assert!(votes_delta >= 5);
            }
            other => panic!("expected PositionOpened, got {other:?}"),
        }
    }
}
