//! Signal generator — combines votes, regime and entry filters into one
//! [`SignalDecision`] per closed candle.
//!
//! The generator is pure: the caller hands it an indicator snapshot, the
//! selected regime and a [`LedgerView`] read inside the same tick
//! transaction that will commit the decision's effects.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::{ExitConfig, PositionConfig, SignalConfig};
use crate::constants::LOT_DECIMALS;
use crate::core::sizing::PositionSizer;
use crate::core::votes;
use crate::types::{
    ExitTemplate, IndicatorSnapshot, Position, RegimeMode, SignalDecision, SignalKind,
    TradeRecord, VoteResult,
};

/// Ledger state the generator needs, read within the tick transaction.
#[derive(Debug, Clone)]
pub struct LedgerView {
    pub open_position: Option<Position>,
    pub open_position_count: usize,
    pub free_cash: Decimal,
    /// Rolling window of closing trades for the Kelly statistics.
    pub closed_trades: Vec<TradeRecord>,
}

pub struct SignalGenerator {
    signals: SignalConfig,
    exits: ExitConfig,
    max_positions: usize,
    commission_rate: Decimal,
    size_min: Decimal,
    sizer: PositionSizer,
}

impl SignalGenerator {
    pub fn new(signals: SignalConfig, positions: &PositionConfig) -> Self {
        let sizer = PositionSizer::new(positions.sizing.clone());
        Self {
            signals,
            exits: positions.exits.clone(),
            max_positions: positions.max_positions,
            commission_rate: positions.commission_rate,
            size_min: positions.sizing.size_min,
            sizer,
        }
    }

    /// Evaluate one closed candle under the given regime.
    ///
    /// `force_buy` bypasses the entry filters (debug path) but never the
    /// position limit or the cash check.
    pub fn evaluate(
        &self,
        snap: &IndicatorSnapshot,
        mode: RegimeMode,
        view: &LedgerView,
        force_buy: bool,
    ) -> SignalDecision {
        let votes = votes::aggregate(snap, self.signals.filters.ema200_neg_slope_threshold);
        let exit = self.exit_template(mode, snap.atr_pct);

        // Warmup guard: an undefined z-score forces HOLD regardless of votes.
        if snap.zscore.is_none() && !force_buy {
            return self.hold(mode, votes, exit, Some("warmup"));
        }

        let kind = self.base_kind(mode, votes.delta, force_buy);

        match kind {
            SignalKind::Sell => SignalDecision {
                kind,
                mode,
                size_fraction: Decimal::ZERO,
                exit,
                votes,
                block_reason: None,
            },
            SignalKind::Hold => self.hold(mode, votes, exit, None),
            SignalKind::Buy => {
                if let Some(block) = self.entry_block(snap, mode, view, force_buy) {
                    return self.hold(mode, votes, exit, Some(block));
                }

                let size_fraction = self.sizer.size_fraction(
                    votes.delta.max(1),
                    snap.adx,
                    mode,
                    snap.atr_pct,
                    &view.closed_trades,
                );

                SignalDecision {
                    kind: SignalKind::Buy,
                    mode,
                    size_fraction,
                    exit,
                    votes,
                    block_reason: None,
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Decision stages
    // -----------------------------------------------------------------------

    /// Base BUY/SELL/HOLD from the vote delta. The transition zone requires
    /// its own elevated threshold on both sides.
    fn base_kind(&self, mode: RegimeMode, delta: i32, force_buy: bool) -> SignalKind {
        if force_buy {
            return SignalKind::Buy;
        }
        let (buy_at, sell_at) = match mode {
            RegimeMode::Transition => (
                self.signals.transition_vote_threshold,
                self.signals.transition_vote_threshold,
            ),
            _ => (
                self.signals.min_votes_for_buy,
                self.signals.min_votes_for_sell,
            ),
        };
        if delta >= buy_at {
            SignalKind::Buy
        } else if delta <= -sell_at {
            SignalKind::Sell
        } else {
            SignalKind::Hold
        }
    }

    /// Entry filters in spec order; returns the first failing filter.
    fn entry_block(
        &self,
        snap: &IndicatorSnapshot,
        mode: RegimeMode,
        view: &LedgerView,
        force_buy: bool,
    ) -> Option<&'static str> {
        let filters = &self.signals.filters;

        if !force_buy {
            // Falling knife: price must have bounced clear of the day low.
            if snap.price < snap.day_low * (dec!(1) + filters.no_buy_below_pct) {
                return Some("falling_knife");
            }

            if snap.volume_mean > Decimal::ZERO
                && snap.volume > filters.volume_spike_mult * snap.volume_mean
            {
                return Some("volume_spike");
            }

            if snap.ema_trend_slope < filters.ema200_neg_slope_threshold {
                return Some("ema200_slope");
            }
        }

        if view.open_position_count >= self.max_positions {
            return Some("position_limit");
        }

        if !self.cash_sufficient(snap.price, view.free_cash) {
            return Some("insufficient_cash");
        }

        if view.open_position.is_some() {
            return Some("already_holding");
        }

        if force_buy {
            return None;
        }

        let mr = &self.signals.mean_reversion;
        match mode {
            RegimeMode::MeanReversion => {
                if snap.rsi >= mr.rsi_oversold {
                    return Some("mr_rsi_too_high");
                }
                match snap.zscore {
                    Some(z) if z < mr.zscore_buy_threshold => {}
                    _ => return Some("mr_zscore"),
                }
                if snap.adx >= mr.adx_max {
                    return Some("mr_adx_too_high");
                }
            }
            RegimeMode::TrendFollowing | RegimeMode::Transition => {
                if snap.adx <= self.signals.regime.adx_high {
                    return Some("tf_adx_too_low");
                }
                if snap.ema_short <= snap.ema_long {
                    return Some("tf_ema_order");
                }
                if snap.macd_line <= Decimal::ZERO {
                    return Some("tf_macd_negative");
                }
            }
            RegimeMode::Unknown => return Some("regime_unknown"),
        }

        None
    }

    /// Minimum viability: even the smallest sized notional must buy at
    /// least one lot step after the entry commission.
    fn cash_sufficient(&self, price: Decimal, free_cash: Decimal) -> bool {
        if free_cash <= Decimal::ZERO || price <= Decimal::ZERO {
            return false;
        }
        let smallest_notional = free_cash * self.size_min;
        let commission = smallest_notional * self.commission_rate;
        let qty = ((smallest_notional - commission) / price)
            .round_dp_with_strategy(LOT_DECIMALS, RoundingStrategy::ToZero);
        qty > Decimal::ZERO
    }

    /// Exit template for the active regime.
    ///
    /// MR stops ride ATR within a clamp band but never come in tighter than
    /// the configured base stop; TF uses its wider fixed template.
    fn exit_template(&self, mode: RegimeMode, atr_pct: Decimal) -> ExitTemplate {
        let ex = &self.exits;
        match mode {
            RegimeMode::MeanReversion | RegimeMode::Unknown => {
                let atr_sl =
                    (atr_pct * ex.mr_atr_sl_mult).clamp(ex.mr_atr_sl_min, ex.mr_atr_sl_max);
                let atr_tp =
                    (atr_pct * ex.mr_atr_tp_mult).clamp(ex.mr_atr_tp_min, ex.mr_atr_tp_max);
                ExitTemplate {
                    stop_loss_pct: ex.mr_stop_loss_pct.max(atr_sl),
                    take_profit_pct: ex.mr_take_profit_pct.max(atr_tp),
                    trail_activation_pct: ex.trail_activation_pct_mr,
                }
            }
            RegimeMode::TrendFollowing | RegimeMode::Transition => ExitTemplate {
                stop_loss_pct: ex.tf_stop_loss_pct,
                take_profit_pct: ex.tf_take_profit_pct,
                trail_activation_pct: ex.trail_activation_pct_tf,
            },
        }
    }

    fn hold(
        &self,
        mode: RegimeMode,
        votes: VoteResult,
        exit: ExitTemplate,
        block_reason: Option<&str>,
    ) -> SignalDecision {
        SignalDecision {
            kind: SignalKind::Hold,
            mode,
            size_fraction: Decimal::ZERO,
            exit,
            votes,
            block_reason: block_reason.map(str::to_owned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testkit::{mr_buy_snapshot, neutral_snapshot, position_config, signal_config};

    fn generator() -> SignalGenerator {
        SignalGenerator::new(signal_config(), &position_config())
    }

    fn empty_view() -> LedgerView {
        LedgerView {
            open_position: None,
            open_position_count: 0,
            free_cash: dec!(1000),
            closed_trades: vec![],
        }
    }

    #[test]
    fn test_mr_buy_passes_all_filters() {
        let d = generator().evaluate(&mr_buy_snapshot(), RegimeMode::MeanReversion, &empty_view(), false);
        assert_eq!(d.kind, SignalKind::Buy, "block: {:?}", d.block_reason);
        assert!(d.votes.delta >= 5, "delta = {}", d.votes.delta);
        assert!(d.size_fraction >= dec!(0.20));
        // Low ATR: the 3% base stop dominates.
        assert_eq!(d.exit.stop_loss_pct, dec!(0.03));
    }

    #[test]
    fn test_warmup_forces_hold() {
        let mut s = mr_buy_snapshot();
        s.zscore = None;
        let d = generator().evaluate(&s, RegimeMode::MeanReversion, &empty_view(), false);
        assert_eq!(d.kind, SignalKind::Hold);
        assert_eq!(d.block_reason.as_deref(), Some("warmup"));
    }

    #[test]
    fn test_falling_knife_blocks_regardless_of_votes() {
        let mut s = mr_buy_snapshot();
        s.day_low = dec!(96); // close 100 < 96 * 1.10
        let d = generator().evaluate(&s, RegimeMode::MeanReversion, &empty_view(), false);
        assert_eq!(d.kind, SignalKind::Hold);
        assert_eq!(d.block_reason.as_deref(), Some("falling_knife"));
    }

    #[test]
    fn test_volume_spike_blocks() {
        let mut s = mr_buy_snapshot();
        s.volume = dec!(40); // 4x mean
        let d = generator().evaluate(&s, RegimeMode::MeanReversion, &empty_view(), false);
        assert_eq!(d.block_reason.as_deref(), Some("volume_spike"));
    }

    #[test]
    fn test_position_limit_blocks() {
        let mut view = empty_view();
        view.open_position_count = 3;
        let d = generator().evaluate(&mr_buy_snapshot(), RegimeMode::MeanReversion, &view, false);
        assert_eq!(d.kind, SignalKind::Hold);
        assert_eq!(d.block_reason.as_deref(), Some("position_limit"));
    }

    #[test]
    fn test_no_cash_blocks() {
        let mut view = empty_view();
        view.free_cash = Decimal::ZERO;
        let d = generator().evaluate(&mr_buy_snapshot(), RegimeMode::MeanReversion, &view, false);
        assert_eq!(d.block_reason.as_deref(), Some("insufficient_cash"));
    }

    #[test]
    fn test_mr_rejects_high_rsi() {
        let mut s = mr_buy_snapshot();
        // Keep the delta high but lift RSI out of the oversold zone.
        s.rsi = dec!(55);
        s.rsi_prev = dec!(50);
        let d = generator().evaluate(&s, RegimeMode::MeanReversion, &empty_view(), false);
        assert_eq!(d.block_reason.as_deref(), Some("mr_rsi_too_high"));
    }

    #[test]
    fn test_tf_buy_requires_macd_positive() {
        let mut s = mr_buy_snapshot();
        s.adx = dec!(30);
        s.plus_di = dec!(30);
        s.minus_di = dec!(10);
        s.rsi = dec!(55);
        s.rsi_prev = dec!(50);
        s.macd_line = dec!(-0.1);
        let d = generator().evaluate(&s, RegimeMode::TrendFollowing, &empty_view(), false);
        assert_eq!(d.block_reason.as_deref(), Some("tf_macd_negative"));
    }

    #[test]
    fn test_tf_buy_opens_with_wide_template() {
        let mut s = mr_buy_snapshot();
        s.adx = dec!(30);
        s.plus_di = dec!(30);
        s.minus_di = dec!(10);
        s.rsi = dec!(55);
        s.rsi_prev = dec!(50);
        s.macd_line = dec!(0.4);
        let d = generator().evaluate(&s, RegimeMode::TrendFollowing, &empty_view(), false);
        assert_eq!(d.kind, SignalKind::Buy, "block: {:?}", d.block_reason);
        assert_eq!(d.exit.stop_loss_pct, dec!(0.05));
        assert_eq!(d.exit.take_profit_pct, dec!(0.10));
        assert_eq!(d.exit.trail_activation_pct, dec!(0.015));
    }

    #[test]
    fn test_transition_requires_elevated_delta() {
        // Delta of exactly 5 passes (threshold is 5); drop one vote and it holds.
        let mut s = mr_buy_snapshot();
        s.adx = dec!(30);
        s.plus_di = dec!(30);
        s.minus_di = dec!(10);
        s.rsi = dec!(55);
        s.rsi_prev = dec!(50);
        s.macd_line = dec!(0.4);
        s.ema_trend_slope = Decimal::ZERO; // lose the slope vote
        s.volume = dec!(10); // lose the volume vote
        let d = generator().evaluate(&s, RegimeMode::Transition, &empty_view(), false);
        assert_eq!(d.votes.delta, 5);
        assert_eq!(d.kind, SignalKind::Buy, "block: {:?}", d.block_reason);

        s.macd_cross_up_recent = false; // now delta 4
        let d = generator().evaluate(&s, RegimeMode::Transition, &empty_view(), false);
        assert_eq!(d.kind, SignalKind::Hold);
        assert!(d.block_reason.is_none());
    }

    #[test]
    fn test_sell_on_negative_delta() {
        let mut s = neutral_snapshot();
        s.zscore = Some(dec!(0.5));
        s.ema_short = dec!(99);
        s.macd_histogram = dec!(-0.5);
        s.macd_cross_down_recent = true;
        s.rsi = dec!(75);
        s.price = dec!(98);
        s.prev_close = dec!(100);
        s.bb_middle = dec!(99);
        s.adx = dec!(30);
        s.plus_di = dec!(10);
        s.minus_di = dec!(30);
        s.volume = dec!(20);
        s.ema_trend_slope = dec!(-0.01);
        let d = generator().evaluate(&s, RegimeMode::TrendFollowing, &empty_view(), false);
        assert_eq!(d.kind, SignalKind::Sell);
        assert_eq!(d.size_fraction, Decimal::ZERO);
    }

    #[test]
    fn test_force_buy_bypasses_filters_but_not_limits() {
        // Falling-knife snapshot with weak votes: force-buy still opens.
        let mut s = mr_buy_snapshot();
        s.day_low = dec!(99);
        s.zscore = None;
        let d = generator().evaluate(&s, RegimeMode::MeanReversion, &empty_view(), true);
        assert_eq!(d.kind, SignalKind::Buy);

        // ... but never past the position cap.
        let mut view = empty_view();
        view.open_position_count = 3;
        let d = generator().evaluate(&s, RegimeMode::MeanReversion, &view, true);
        assert_eq!(d.block_reason.as_deref(), Some("position_limit"));
    }

    #[test]
    fn test_mr_template_uses_atr_when_wider() {
        let mut s = mr_buy_snapshot();
        s.atr_pct = dec!(0.03); // 3% ATR: 1.5x = 4.5% stop beats the 3% base
        let d = generator().evaluate(&s, RegimeMode::MeanReversion, &empty_view(), false);
        assert_eq!(d.exit.stop_loss_pct, dec!(0.045));
    }
}
