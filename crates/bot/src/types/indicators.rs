use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Snapshot of all computed indicators at one candle.
///
/// The timestamp is the candle's `open_time`. Fields that are undefined
/// before their window fills are `Option`; a missing z-score forces the
/// signal generator to HOLD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub open_time: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub prev_close: Decimal,

    // EMA family
    #[serde(with = "rust_decimal::serde::str")]
    pub ema_short: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ema_long: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ema_trend: Decimal,
    /// Fractional slope of the trend EMA over the configured lookback.
    #[serde(with = "rust_decimal::serde::str")]
    pub ema_trend_slope: Decimal,
    /// EMA_short crossed above EMA_long within the last 3 candles.
    pub ema_cross_up_recent: bool,
    pub ema_cross_down_recent: bool,

    // Oscillators
    #[serde(with = "rust_decimal::serde::str")]
    pub rsi: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub rsi_prev: Decimal,

    // MACD
    #[serde(with = "rust_decimal::serde::str")]
    pub macd_line: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub macd_signal: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub macd_histogram: Decimal,
    /// MACD line crossed above its signal within the last 3 candles.
    pub macd_cross_up_recent: bool,
    pub macd_cross_down_recent: bool,

    // Trend strength
    #[serde(with = "rust_decimal::serde::str")]
    pub adx: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub plus_di: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub minus_di: Decimal,

    // Volatility
    #[serde(with = "rust_decimal::serde::str")]
    pub atr: Decimal,
    /// ATR as a fraction of price (0.015 = 1.5%).
    #[serde(with = "rust_decimal::serde::str")]
    pub atr_pct: Decimal,

    // Bollinger
    #[serde(with = "rust_decimal::serde::str")]
    pub bb_upper: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub bb_middle: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub bb_lower: Decimal,

    /// Standardised distance of close from SMA50. `None` before 50 samples.
    pub zscore: Option<Decimal>,

    // Volume
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume_mean: Decimal,

    /// Rolling min(low) over roughly one day of candles.
    #[serde(with = "rust_decimal::serde::str")]
    pub day_low: Decimal,
}
