//! Vote aggregator — maps an indicator snapshot to bullish/bearish counts.
//!
//! Seven independent rules; each contributes 0 or 1 to exactly one side.
//! Reasons are human-readable and ordered by information content so the
//! chat surface can show the top three.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::constants::VOLUME_CONFIRM_RATIO;
use crate::types::{IndicatorSnapshot, VoteResult};

const RSI_OVERSOLD: Decimal = dec!(30);
const RSI_OVERBOUGHT: Decimal = dec!(70);
const ADX_VOTE_THRESHOLD: Decimal = dec!(25);

/// Evaluate all vote rules against one snapshot.
///
/// `ema200_neg_slope_threshold` is the (negative) fractional slope below
/// which the trend-EMA rule votes bearish.
pub fn aggregate(snap: &IndicatorSnapshot, ema200_neg_slope_threshold: Decimal) -> VoteResult {
    let mut bullish = 0u32;
    let mut bearish = 0u32;
    let mut reasons: Vec<String> = Vec::with_capacity(8);

    // 1. EMA order, or a cross within the last 3 candles.
    if snap.ema_short > snap.ema_long || snap.ema_cross_up_recent {
        bullish += 1;
        let tag = if snap.ema_cross_up_recent { "cross-up" } else { "order" };
        reasons.push(format!(
            "EMA {tag} bullish ({:.2} vs {:.2})",
            snap.ema_short, snap.ema_long
        ));
    } else if snap.ema_short < snap.ema_long || snap.ema_cross_down_recent {
        bearish += 1;
        reasons.push(format!(
            "EMA order bearish ({:.2} < {:.2})",
            snap.ema_short, snap.ema_long
        ));
    }

    // 2. MACD: positive histogram backed by a recent upward signal cross.
    if snap.macd_histogram > Decimal::ZERO && snap.macd_cross_up_recent {
        bullish += 1;
        reasons.push(format!(
            "MACD crossed up (hist {:.4})",
            snap.macd_histogram
        ));
    } else if snap.macd_histogram < Decimal::ZERO && snap.macd_cross_down_recent {
        bearish += 1;
        reasons.push(format!(
            "MACD crossed down (hist {:.4})",
            snap.macd_histogram
        ));
    }

    // 3. RSI: mid-band direction plus the extremes.
    if snap.rsi < RSI_OVERSOLD {
        bullish += 1;
        reasons.push(format!("RSI {:.1} oversold (<30)", snap.rsi));
    } else if snap.rsi > RSI_OVERBOUGHT {
        bearish += 1;
        reasons.push(format!("RSI {:.1} overbought (>70)", snap.rsi));
    } else if snap.rsi > snap.rsi_prev {
        bullish += 1;
        reasons.push(format!(
            "RSI rising {:.1} -> {:.1}",
            snap.rsi_prev, snap.rsi
        ));
    } else if snap.rsi < snap.rsi_prev {
        bearish += 1;
        reasons.push(format!(
            "RSI falling {:.1} -> {:.1}",
            snap.rsi_prev, snap.rsi
        ));
    }

    // 4. Price against the Bollinger midline.
    if snap.price > snap.bb_middle {
        bullish += 1;
        reasons.push(format!(
            "close {:.2} above BB mid {:.2}",
            snap.price, snap.bb_middle
        ));
    } else if snap.price < snap.bb_middle {
        bearish += 1;
        reasons.push(format!(
            "close {:.2} below BB mid {:.2}",
            snap.price, snap.bb_middle
        ));
    }

    // 5. Trend strength with direction.
    if snap.adx > ADX_VOTE_THRESHOLD {
        if snap.plus_di > snap.minus_di {
            bullish += 1;
            reasons.push(format!(
                "ADX {:.1} with +DI {:.1} > -DI {:.1}",
                snap.adx, snap.plus_di, snap.minus_di
            ));
        } else if snap.minus_di > snap.plus_di {
            bearish += 1;
            reasons.push(format!(
                "ADX {:.1} with -DI {:.1} > +DI {:.1}",
                snap.adx, snap.minus_di, snap.plus_di
            ));
        }
    }

    // 6. Volume confirmation of the candle direction.
    if snap.volume_mean > Decimal::ZERO
        && snap.volume > VOLUME_CONFIRM_RATIO * snap.volume_mean
    {
        if snap.price > snap.prev_close {
            bullish += 1;
            reasons.push(format!(
                "volume {:.1}x mean confirms up-candle",
                snap.volume / snap.volume_mean
            ));
        } else if snap.price < snap.prev_close {
            bearish += 1;
            reasons.push(format!(
                "volume {:.1}x mean confirms down-candle",
                snap.volume / snap.volume_mean
            ));
        }
    }

    // 7. Trend-EMA slope.
    if snap.ema_trend_slope > Decimal::ZERO {
        bullish += 1;
        reasons.push(format!(
            "EMA200 slope positive ({:.4})",
            snap.ema_trend_slope
        ));
    } else if snap.ema_trend_slope < ema200_neg_slope_threshold {
        bearish += 1;
        reasons.push(format!(
            "EMA200 slope {:.4} below {:.4}",
            snap.ema_trend_slope, ema200_neg_slope_threshold
        ));
    }

    let delta = bullish as i32 - bearish as i32;
    let top3 = reasons.iter().take(3).cloned().collect();

    VoteResult {
        bullish,
        bearish,
        delta,
        reasons,
        top3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testkit::neutral_snapshot;

    const SLOPE_THRESHOLD: Decimal = dec!(-0.003);

    #[test]
    fn test_neutral_snapshot_no_votes() {
        let v = aggregate(&neutral_snapshot(), SLOPE_THRESHOLD);
        assert_eq!(v.bullish, 0);
        assert_eq!(v.bearish, 0);
        assert_eq!(v.delta, 0);
    }

    #[test]
    fn test_full_bullish_sweep() {
        let mut s = neutral_snapshot();
        s.ema_short = dec!(101);
        s.macd_histogram = dec!(0.5);
        s.macd_cross_up_recent = true;
        s.rsi = dec!(55);
        s.rsi_prev = dec!(50);
        s.price = dec!(102);
        s.prev_close = dec!(100);
        s.adx = dec!(30);
        s.plus_di = dec!(30);
        s.minus_di = dec!(15);
        s.volume = dec!(20);
        s.ema_trend_slope = dec!(0.002);

        let v = aggregate(&s, SLOPE_THRESHOLD);
        assert_eq!(v.bullish, 7, "all seven rules should vote: {:?}", v.reasons);
        assert_eq!(v.bearish, 0);
        assert_eq!(v.delta, 7);
        assert_eq!(v.top3.len(), 3);
    }

    #[test]
    fn test_full_bearish_sweep() {
        let mut s = neutral_snapshot();
        s.ema_short = dec!(99);
        s.macd_histogram = dec!(-0.5);
        s.macd_cross_down_recent = true;
        s.rsi = dec!(75);
        s.price = dec!(98);
        s.prev_close = dec!(100);
        s.adx = dec!(30);
        s.plus_di = dec!(15);
        s.minus_di = dec!(30);
        s.volume = dec!(20);
        s.ema_trend_slope = dec!(-0.01);

        let v = aggregate(&s, SLOPE_THRESHOLD);
        assert_eq!(v.bearish, 7, "all seven rules should vote: {:?}", v.reasons);
        assert_eq!(v.delta, -7);
    }

    #[test]
    fn test_extreme_oversold_votes_bullish() {
        let mut s = neutral_snapshot();
        s.rsi = dec!(25);
        s.rsi_prev = dec!(28);
        let v = aggregate(&s, SLOPE_THRESHOLD);
        assert_eq!(v.bullish, 1);
        assert_eq!(v.bearish, 0);
    }

    #[test]
    fn test_macd_positive_without_recent_cross_abstains() {
        let mut s = neutral_snapshot();
        s.macd_histogram = dec!(0.4);
        s.macd_cross_up_recent = false;
        let v = aggregate(&s, SLOPE_THRESHOLD);
        assert_eq!(v.bullish, 0);
    }

    #[test]
    fn test_volume_without_direction_abstains() {
        // Volume spike on an unchanged close: no confirmation either way.
        let mut s = neutral_snapshot();
        s.volume = dec!(50);
        let v = aggregate(&s, SLOPE_THRESHOLD);
        assert_eq!(v.bullish + v.bearish, 0);
    }

    #[test]
    fn test_small_negative_slope_abstains() {
        // Slope between the threshold and zero votes neither way.
        let mut s = neutral_snapshot();
        s.ema_trend_slope = dec!(-0.001);
        let v = aggregate(&s, SLOPE_THRESHOLD);
        assert_eq!(v.bullish + v.bearish, 0);
    }
}
