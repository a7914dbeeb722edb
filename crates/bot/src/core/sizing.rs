//! Adaptive position sizing.
//!
//! Size is a fraction of free cash driven by vote strength, ADX, the active
//! regime, and an optional fractional-Kelly multiplier computed over a
//! rolling window of closed trades.
//!
//! References:
//!     Kelly (1956), "A New Interpretation of Information Rate".
//!     Thorp (2008), "The Kelly Criterion in Blackjack, Sports Betting,
//!         and the Stock Market".

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::SizingConfig;
use crate::types::{RegimeMode, TradeRecord};

/// Adaptive sizer; pure given its inputs.
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Fraction of free cash to invest, clipped to `[size_min, size_max]`.
    ///
    /// `closed_trades` is the rolling window of closing trade records used
    /// for the Kelly statistics (newest last); callers pass the last
    /// `kelly_lookback_window` closes.
    pub fn size_fraction(
        &self,
        delta: i32,
        adx: Decimal,
        mode: RegimeMode,
        atr_pct: Decimal,
        closed_trades: &[TradeRecord],
    ) -> Decimal {
        let base = base_fraction(delta.unsigned_abs());
        let regime_mult = regime_multiplier(mode, adx);
        let kelly_mult = self.kelly_multiplier(closed_trades, atr_pct);

        (base * regime_mult * kelly_mult)
            .clamp(self.config.size_min, self.config.size_max)
    }

    /// Fractional-Kelly multiplier in `[0.5, 1.5]`; neutral (1.0) while the
    /// sample is too small or Kelly is disabled.
    ///
    /// `kelly_raw = (p·W − (1−p)·L) / W` with `p` the win rate and `W`/`L`
    /// the average win/loss magnitudes in percent, scaled by the configured
    /// Kelly fraction and normalised by volatility.
    pub fn kelly_multiplier(&self, closed_trades: &[TradeRecord], atr_pct: Decimal) -> Decimal {
        if !self.config.use_kelly {
            return dec!(1);
        }
        if closed_trades.len() < self.config.min_trades_for_kelly {
            return dec!(1);
        }

        let window_start = closed_trades
            .len()
            .saturating_sub(self.config.kelly_lookback_window);
        let recent = &closed_trades[window_start..];

        let mut wins: Vec<Decimal> = Vec::new();
        let mut losses: Vec<Decimal> = Vec::new();

        for trade in recent {
            let Some(pnl) = trade.realized_pnl else {
                continue;
            };
            let Some(pct) = trade_pnl_pct(trade, pnl) else {
                continue;
            };
            if pnl > Decimal::ZERO {
                wins.push(pct);
            } else {
                losses.push(pct.abs());
            }
        }

        let total = wins.len() + losses.len();
        if total == 0 {
            return dec!(1);
        }

        let p = Decimal::from(wins.len() as u64) / Decimal::from(total as u64);
        let avg_win = if wins.is_empty() {
            Decimal::ZERO
        } else {
            wins.iter().copied().sum::<Decimal>() / Decimal::from(wins.len() as u64)
        };
        let avg_loss = if losses.is_empty() {
            dec!(1)
        } else {
            losses.iter().copied().sum::<Decimal>() / Decimal::from(losses.len() as u64)
        };

        if avg_win <= Decimal::ZERO || avg_loss <= Decimal::ZERO {
            return dec!(1);
        }

        let kelly_raw = (p * avg_win - (dec!(1) - p) * avg_loss) / avg_win;
        let mut kelly = kelly_raw.max(Decimal::ZERO) * self.config.kelly_fraction;

        // Volatility normalisation: larger ATR shrinks the multiplier.
        kelly /= dec!(1) + atr_pct / dec!(2);

        kelly.clamp(dec!(0.5), dec!(1.5))
    }
}

/// Base size by vote strength.
fn base_fraction(delta_abs: u32) -> Decimal {
    if delta_abs >= 7 {
        dec!(0.70)
    } else if delta_abs >= 5 {
        dec!(0.50)
    } else if delta_abs >= 3 {
        dec!(0.35)
    } else {
        dec!(0.25)
    }
}

/// Regime multiplier: TF sizes up with trend strength, MR sizes up with
/// quiet markets.
fn regime_multiplier(mode: RegimeMode, adx: Decimal) -> Decimal {
    match mode {
        RegimeMode::TrendFollowing | RegimeMode::Transition => {
            if adx > dec!(35) {
                dec!(1.3)
            } else if adx > dec!(30) {
                dec!(1.2)
            } else if adx > dec!(26) {
                dec!(1.1)
            } else {
                dec!(1)
            }
        }
        RegimeMode::MeanReversion => {
            if adx < dec!(15) {
                dec!(1.3)
            } else if adx < dec!(18) {
                dec!(1.2)
            } else if adx < dec!(20) {
                dec!(1.1)
            } else {
                dec!(1)
            }
        }
        RegimeMode::Unknown => dec!(1),
    }
}

/// Approximate percent return of one closing trade, recovered from the
/// record: cost basis = proceeds − commission − realized P&L.
fn trade_pnl_pct(trade: &TradeRecord, pnl: Decimal) -> Option<Decimal> {
    let proceeds = trade.price * trade.quantity;
    let basis = proceeds - trade.commission - pnl;
    if basis <= Decimal::ZERO {
        return None;
    }
    Some(pnl / basis * dec!(100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeSide;

    fn sizer(use_kelly: bool) -> PositionSizer {
        PositionSizer::new(SizingConfig {
            size_min: dec!(0.20),
            size_max: dec!(0.70),
            use_kelly,
            kelly_fraction: dec!(0.25),
            min_trades_for_kelly: 10,
            kelly_lookback_window: 50,
        })
    }

    /// A closing trade with the given percent return on a 100-unit basis.
    fn closed_trade(pct: Decimal) -> TradeRecord {
        let basis = dec!(100);
        let pnl = basis * pct / dec!(100);
        // proceeds = basis + commission + pnl so the pct recovers exactly.
        let commission = dec!(0.09);
        TradeRecord {
            symbol: "BTCUSDT".into(),
            side: TradeSide::StopLoss,
            price: dec!(1),
            quantity: basis + commission + pnl,
            commission,
            realized_pnl: Some(pnl),
            candle_open_time: 0,
            at: 0,
            reason: "STOP_LOSS".into(),
            entry_mode: None,
            votes_delta: None,
            reasons: vec![],
        }
    }

    #[test]
    fn test_base_fraction_tiers() {
        assert_eq!(base_fraction(8), dec!(0.70));
        assert_eq!(base_fraction(7), dec!(0.70));
        assert_eq!(base_fraction(5), dec!(0.50));
        assert_eq!(base_fraction(3), dec!(0.35));
        assert_eq!(base_fraction(2), dec!(0.25));
    }

    #[test]
    fn test_regime_multiplier_tf_tiers() {
        let tf = RegimeMode::TrendFollowing;
        assert_eq!(regime_multiplier(tf, dec!(25)), dec!(1));
        assert_eq!(regime_multiplier(tf, dec!(27)), dec!(1.1));
        assert_eq!(regime_multiplier(tf, dec!(31)), dec!(1.2));
        assert_eq!(regime_multiplier(tf, dec!(36)), dec!(1.3));
    }

    #[test]
    fn test_regime_multiplier_mr_tiers() {
        let mr = RegimeMode::MeanReversion;
        assert_eq!(regime_multiplier(mr, dec!(22)), dec!(1));
        assert_eq!(regime_multiplier(mr, dec!(19)), dec!(1.1));
        assert_eq!(regime_multiplier(mr, dec!(17)), dec!(1.2));
        assert_eq!(regime_multiplier(mr, dec!(14)), dec!(1.3));
    }

    #[test]
    fn test_size_clamped_to_bounds() {
        let s = sizer(false);
        // Strong TF signal: 0.70 × 1.3 clamps back to 0.70.
        let f = s.size_fraction(8, dec!(40), RegimeMode::TrendFollowing, dec!(0.01), &[]);
        assert_eq!(f, dec!(0.70));

        // Weak signal never drops below the floor.
        let f = s.size_fraction(1, dec!(22), RegimeMode::MeanReversion, dec!(0.01), &[]);
        assert_eq!(f, dec!(0.25));
    }

    #[test]
    fn test_kelly_neutral_below_min_trades() {
        let s = sizer(true);
        let trades: Vec<TradeRecord> = (0..5).map(|_| closed_trade(dec!(2))).collect();
        assert_eq!(s.kelly_multiplier(&trades, dec!(0.01)), dec!(1));
    }

    #[test]
    fn test_kelly_floors_at_half_on_losing_history() {
        let s = sizer(true);
        let trades: Vec<TradeRecord> = (0..20).map(|_| closed_trade(dec!(-3))).collect();
        // All losers: raw Kelly <= 0, clamped up to 0.5.
        assert_eq!(s.kelly_multiplier(&trades, dec!(0.01)), dec!(0.5));
    }

    #[test]
    fn test_kelly_clamped_to_range() {
        let s = sizer(true);
        // 80% winners at +4%, losers at -2%: raw Kelly 0.7, fraction 0.25.
        let mut trades: Vec<TradeRecord> = Vec::new();
        for i in 0..50 {
            trades.push(closed_trade(if i % 5 == 0 { dec!(-2) } else { dec!(4) }));
        }
        let k = s.kelly_multiplier(&trades, dec!(0.01));
        assert!(k >= dec!(0.5) && k <= dec!(1.5), "multiplier out of range: {k}");
    }

    #[test]
    fn test_kelly_disabled_is_neutral() {
        let s = sizer(false);
        let trades: Vec<TradeRecord> = (0..50).map(|_| closed_trade(dec!(4))).collect();
        assert_eq!(s.kelly_multiplier(&trades, dec!(0.01)), dec!(1));
    }
}
