use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Timeframe;

/// Merged engine configuration, one struct per config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotConfig {
    pub app: AppConfig,
    pub exchange: ExchangeConfig,
    pub signals: SignalConfig,
    pub positions: PositionConfig,
    pub portfolio: PortfolioConfig,
    pub telegram: TelegramConfig,
}

// ---------------------------------------------------------------------------
// app.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub database_path: String,
    /// Paper mode fills at the candle close; live mode routes through the
    /// order gateway.
    pub paper_trading: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub log_dir: String,
}

// ---------------------------------------------------------------------------
// exchange.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExchangeConfig {
    pub base_url: String,
    /// Candle interval, e.g. "1h".
    pub interval: String,
    /// Candles fetched per symbol per tick; must cover the longest window.
    pub history_candles: u32,
    pub poll_granularity_seconds: u64,
    pub fetch_timeout_seconds: u64,
    pub fetch_retries: u32,
    pub retry_base_delay_ms: u64,
    pub max_concurrent_fetches: usize,
    /// Seeded into `tracked_symbols` on first start.
    pub initial_symbols: Vec<String>,
}

impl ExchangeConfig {
    pub fn timeframe(&self) -> Option<Timeframe> {
        Timeframe::from_exchange_interval(&self.interval)
    }
}

// ---------------------------------------------------------------------------
// signals.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalConfig {
    /// Vote delta required for BUY in MR/TF modes.
    pub min_votes_for_buy: i32,
    /// Vote delta (negated) required for SELL.
    pub min_votes_for_sell: i32,
    /// Elevated delta required while in the TRANSITION zone.
    pub transition_vote_threshold: i32,
    pub regime: RegimeConfig,
    pub filters: EntryFilterConfig,
    pub mean_reversion: MeanReversionConfig,
    pub indicators: IndicatorParams,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegimeConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub adx_low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub adx_high: Decimal,
    /// Minimum dwell in MR/TF before a regime change is honoured.
    pub min_dwell_minutes: u64,
}

impl RegimeConfig {
    pub fn min_dwell_seconds(&self) -> i64 {
        (self.min_dwell_minutes * 60) as i64
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntryFilterConfig {
    /// Falling-knife guard: no entry when close is within this fraction of
    /// the rolling day low.
    #[serde(with = "rust_decimal::serde::str")]
    pub no_buy_below_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume_spike_mult: Decimal,
    /// Fractional EMA200 slope below which entries are blocked (negative).
    #[serde(with = "rust_decimal::serde::str")]
    pub ema200_neg_slope_threshold: Decimal,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeanReversionConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub rsi_oversold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub zscore_buy_threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub adx_max: Decimal,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndicatorParams {
    pub ema_short: u32,
    pub ema_long: u32,
    pub ema_trend: u32,
    pub ema_trend_slope_candles: u32,
    pub rsi_period: u32,
    pub macd_fast: u32,
    pub macd_slow: u32,
    pub macd_signal: u32,
    pub adx_period: u32,
    pub atr_period: u32,
    pub bb_period: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub bb_std: Decimal,
    pub zscore_window: u32,
    pub volume_ma_period: u32,
}

// ---------------------------------------------------------------------------
// positions.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PositionConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub commission_rate: Decimal,
    pub max_positions: usize,
    pub exits: ExitConfig,
    pub averaging: AveragingConfig,
    pub sizing: SizingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExitConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub mr_stop_loss_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub mr_atr_sl_mult: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub mr_atr_sl_min: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub mr_atr_sl_max: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub mr_take_profit_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub mr_atr_tp_mult: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub mr_atr_tp_min: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub mr_atr_tp_max: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub tf_stop_loss_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub tf_take_profit_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub partial_tp_trigger: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub partial_tp_remaining_tp: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub partial_close_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub trail_activation_pct_mr: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub trail_activation_pct_tf: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub trail_distance_pct: Decimal,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AveragingConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub price_drop_pct: Decimal,
    pub time_threshold_hours: u64,
    /// Averaging size as a fraction of the initial invested notional.
    #[serde(with = "rust_decimal::serde::str")]
    pub size_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_total_risk_multiplier: Decimal,
    pub pyramid_enabled: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub pyramid_adx_threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub pyramid_gain_pct: Decimal,
}

impl AveragingConfig {
    pub fn time_threshold_seconds(&self) -> i64 {
        (self.time_threshold_hours * 3600) as i64
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SizingConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub size_min: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub size_max: Decimal,
    pub use_kelly: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub kelly_fraction: Decimal,
    pub min_trades_for_kelly: usize,
    pub kelly_lookback_window: usize,
}

// ---------------------------------------------------------------------------
// portfolio.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortfolioConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub initial_balance: Decimal,
}

// ---------------------------------------------------------------------------
// telegram.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    pub enabled: bool,
    /// The only chat id allowed to issue commands.
    pub owner_chat_id: i64,
    /// Name of the env var holding the bot token.
    pub token_env: String,
    pub poll_timeout_seconds: u64,
}
