//! Shared fixtures for core module tests.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::{
    AveragingConfig, EntryFilterConfig, ExitConfig, IndicatorParams, MeanReversionConfig,
    PositionConfig, RegimeConfig, SignalConfig, SizingConfig,
};
use crate::types::IndicatorSnapshot;

pub(crate) fn regime_config() -> RegimeConfig {
    RegimeConfig {
        adx_low: dec!(20),
        adx_high: dec!(24),
        min_dwell_minutes: 30,
    }
}

pub(crate) fn signal_config() -> SignalConfig {
    SignalConfig {
        min_votes_for_buy: 5,
        min_votes_for_sell: 5,
        transition_vote_threshold: 5,
        regime: regime_config(),
        filters: EntryFilterConfig {
            no_buy_below_pct: dec!(0.10),
            volume_spike_mult: dec!(3.0),
            ema200_neg_slope_threshold: dec!(-0.003),
        },
        mean_reversion: MeanReversionConfig {
            rsi_oversold: dec!(40),
            zscore_buy_threshold: dec!(-1.8),
            adx_max: dec!(35),
        },
        indicators: IndicatorParams {
            ema_short: 12,
            ema_long: 26,
            ema_trend: 200,
            ema_trend_slope_candles: 5,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            adx_period: 14,
            atr_period: 14,
            bb_period: 20,
            bb_std: dec!(2),
            zscore_window: 50,
            volume_ma_period: 20,
        },
    }
}

pub(crate) fn position_config() -> PositionConfig {
    PositionConfig {
        commission_rate: dec!(0.0009),
        max_positions: 3,
        exits: ExitConfig {
            mr_stop_loss_pct: dec!(0.03),
            mr_atr_sl_mult: dec!(1.5),
            mr_atr_sl_min: dec!(0.015),
            mr_atr_sl_max: dec!(0.06),
            mr_take_profit_pct: dec!(0.02),
            mr_atr_tp_mult: dec!(2.5),
            mr_atr_tp_min: dec!(0.01),
            mr_atr_tp_max: dec!(0.08),
            tf_stop_loss_pct: dec!(0.05),
            tf_take_profit_pct: dec!(0.10),
            partial_tp_trigger: dec!(0.015),
            partial_tp_remaining_tp: dec!(0.03),
            partial_close_pct: dec!(0.5),
            trail_activation_pct_mr: dec!(0.008),
            trail_activation_pct_tf: dec!(0.015),
            trail_distance_pct: dec!(0.01),
        },
        averaging: AveragingConfig {
            enabled: true,
            max_attempts: 3,
            price_drop_pct: dec!(0.05),
            time_threshold_hours: 24,
            size_pct: dec!(0.5),
            max_total_risk_multiplier: dec!(1.5),
            pyramid_enabled: true,
            pyramid_adx_threshold: dec!(25),
            pyramid_gain_pct: dec!(0.02),
        },
        sizing: SizingConfig {
            size_min: dec!(0.20),
            size_max: dec!(0.70),
            use_kelly: true,
            kelly_fraction: dec!(0.25),
            min_trades_for_kelly: 10,
            kelly_lookback_window: 50,
        },
    }
}

/// Snapshot on which every vote rule abstains and no filter trips.
pub(crate) fn neutral_snapshot() -> IndicatorSnapshot {
    IndicatorSnapshot {
        open_time: 1_700_000_000,
        price: dec!(100),
        prev_close: dec!(100),
        ema_short: dec!(100),
        ema_long: dec!(100),
        ema_trend: dec!(100),
        ema_trend_slope: Decimal::ZERO,
        ema_cross_up_recent: false,
        ema_cross_down_recent: false,
        rsi: dec!(50),
        rsi_prev: dec!(50),
        macd_line: Decimal::ZERO,
        macd_signal: Decimal::ZERO,
        macd_histogram: Decimal::ZERO,
        macd_cross_up_recent: false,
        macd_cross_down_recent: false,
        adx: dec!(15),
        plus_di: dec!(20),
        minus_di: dec!(20),
        atr: dec!(1),
        atr_pct: dec!(0.01),
        bb_upper: dec!(104),
        bb_middle: dec!(100),
        bb_lower: dec!(96),
        zscore: Some(Decimal::ZERO),
        volume: dec!(10),
        volume_mean: dec!(10),
        day_low: dec!(90),
    }
}

/// Snapshot satisfying every MR entry condition with a vote delta of 6.
pub(crate) fn mr_buy_snapshot() -> IndicatorSnapshot {
    let mut s = neutral_snapshot();
    s.adx = dec!(15);
    s.rsi = dec!(28);
    s.rsi_prev = dec!(30);
    s.zscore = Some(dec!(-2.1));
    s.ema_short = dec!(100.5);
    s.ema_long = dec!(100);
    s.macd_histogram = dec!(0.2);
    s.macd_cross_up_recent = true;
    s.price = dec!(100);
    s.prev_close = dec!(99);
    s.bb_middle = dec!(99.5);
    s.volume = dec!(15);
    s.ema_trend_slope = dec!(0.001);
    s.day_low = dec!(88);
    s.atr_pct = dec!(0.005);
    s
}

/// Snapshot satisfying every TF entry condition with a vote delta of 7.
pub(crate) fn tf_buy_snapshot() -> IndicatorSnapshot {
    let mut s = mr_buy_snapshot();
    s.adx = dec!(30);
    s.plus_di = dec!(30);
    s.minus_di = dec!(10);
    s.rsi = dec!(55);
    s.rsi_prev = dec!(50);
    s.macd_line = dec!(0.4);
    s
}

/// Bearish sweep: vote delta of -7, SELL under the default thresholds.
pub(crate) fn sell_snapshot() -> IndicatorSnapshot {
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
    s
}
