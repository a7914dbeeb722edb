use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::types::BotConfig;
use crate::types::Timeframe;

/// Validate invariants across the merged config that serde alone cannot
/// enforce. The process refuses to start on any violation rather than
/// trading with garbage inputs. Called automatically by [`super::load_config`].
pub fn validate_config(config: &BotConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    validate_exchange(config, &mut errors);
    validate_signals(config, &mut errors);
    validate_positions(config, &mut errors);
    validate_portfolio(config, &mut errors);
    validate_telegram(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = format!(
            "Configuration validation failed ({} error{}):\n  - {}",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" },
            errors.join("\n  - ")
        );
        bail!("{msg}");
    }
}

fn validate_exchange(config: &BotConfig, errors: &mut Vec<String>) {
    let ex = &config.exchange;

    if ex.base_url.is_empty() {
        errors.push("exchange: base_url is empty".into());
    }
    if Timeframe::from_exchange_interval(&ex.interval).is_none() {
        errors.push(format!("exchange: unsupported interval '{}'", ex.interval));
    }
    if ex.max_concurrent_fetches == 0 {
        errors.push("exchange: max_concurrent_fetches must be > 0".into());
    }
    if ex.poll_granularity_seconds == 0 {
        errors.push("exchange: poll_granularity_seconds must be > 0".into());
    }
    if ex.fetch_timeout_seconds == 0 {
        errors.push("exchange: fetch_timeout_seconds must be > 0".into());
    }

    // The indicator pipeline needs enough history for its longest window
    // (trend EMA) plus the z-score warmup.
    let ind = &config.signals.indicators;
    let needed = ind.ema_trend.max(ind.zscore_window) + ind.ema_trend_slope_candles;
    if ex.history_candles < needed {
        errors.push(format!(
            "exchange: history_candles ({}) must cover the longest indicator window ({needed})",
            ex.history_candles
        ));
    }
}

fn validate_signals(config: &BotConfig, errors: &mut Vec<String>) {
    let sig = &config.signals;

    if sig.min_votes_for_buy <= 0 {
        errors.push(format!(
            "signals: min_votes_for_buy ({}) must be > 0",
            sig.min_votes_for_buy
        ));
    }
    if sig.min_votes_for_sell <= 0 {
        errors.push(format!(
            "signals: min_votes_for_sell ({}) must be > 0",
            sig.min_votes_for_sell
        ));
    }
    if sig.transition_vote_threshold <= 0 {
        errors.push(format!(
            "signals: transition_vote_threshold ({}) must be > 0",
            sig.transition_vote_threshold
        ));
    }

    // Hysteresis only works when the band is ordered.
    if sig.regime.adx_low >= sig.regime.adx_high {
        errors.push(format!(
            "signals.regime: adx_low ({}) must be < adx_high ({})",
            sig.regime.adx_low, sig.regime.adx_high
        ));
    }

    if sig.filters.no_buy_below_pct < Decimal::ZERO {
        errors.push("signals.filters: no_buy_below_pct must be >= 0".into());
    }
    if sig.filters.volume_spike_mult <= dec!(1) {
        errors.push(format!(
            "signals.filters: volume_spike_mult ({}) must be > 1",
            sig.filters.volume_spike_mult
        ));
    }
    if sig.filters.ema200_neg_slope_threshold >= Decimal::ZERO {
        errors.push("signals.filters: ema200_neg_slope_threshold must be negative".into());
    }

    if sig.mean_reversion.zscore_buy_threshold >= Decimal::ZERO {
        errors.push("signals.mean_reversion: zscore_buy_threshold must be negative".into());
    }

    let ind = &sig.indicators;
    if ind.ema_short >= ind.ema_long {
        errors.push(format!(
            "signals.indicators: ema_short ({}) must be < ema_long ({})",
            ind.ema_short, ind.ema_long
        ));
    }
    if ind.macd_fast >= ind.macd_slow {
        errors.push(format!(
            "signals.indicators: macd_fast ({}) must be < macd_slow ({})",
            ind.macd_fast, ind.macd_slow
        ));
    }
    for (name, val) in [
        ("rsi_period", ind.rsi_period),
        ("adx_period", ind.adx_period),
        ("atr_period", ind.atr_period),
        ("bb_period", ind.bb_period),
        ("zscore_window", ind.zscore_window),
        ("volume_ma_period", ind.volume_ma_period),
        ("ema_trend_slope_candles", ind.ema_trend_slope_candles),
    ] {
        if val == 0 {
            errors.push(format!("signals.indicators: {name} must be > 0"));
        }
    }
}

fn validate_positions(config: &BotConfig, errors: &mut Vec<String>) {
    let pos = &config.positions;

    if pos.commission_rate < Decimal::ZERO || pos.commission_rate >= dec!(0.05) {
        errors.push(format!(
            "positions: commission_rate ({}) must be in [0, 0.05)",
            pos.commission_rate
        ));
    }
    if pos.max_positions == 0 {
        errors.push("positions: max_positions must be > 0".into());
    }

    let ex = &pos.exits;
    for (name, val) in [
        ("mr_stop_loss_pct", ex.mr_stop_loss_pct),
        ("mr_take_profit_pct", ex.mr_take_profit_pct),
        ("tf_stop_loss_pct", ex.tf_stop_loss_pct),
        ("tf_take_profit_pct", ex.tf_take_profit_pct),
        ("partial_tp_trigger", ex.partial_tp_trigger),
        ("partial_tp_remaining_tp", ex.partial_tp_remaining_tp),
        ("trail_distance_pct", ex.trail_distance_pct),
        ("trail_activation_pct_mr", ex.trail_activation_pct_mr),
        ("trail_activation_pct_tf", ex.trail_activation_pct_tf),
    ] {
        if val <= Decimal::ZERO || val >= dec!(1) {
            errors.push(format!("positions.exits: {name} ({val}) must be in (0, 1)"));
        }
    }
    if ex.mr_atr_sl_min > ex.mr_atr_sl_max {
        errors.push("positions.exits: mr_atr_sl_min must be <= mr_atr_sl_max".into());
    }
    if ex.mr_atr_tp_min > ex.mr_atr_tp_max {
        errors.push("positions.exits: mr_atr_tp_min must be <= mr_atr_tp_max".into());
    }
    if ex.partial_close_pct <= Decimal::ZERO || ex.partial_close_pct >= dec!(1) {
        errors.push(format!(
            "positions.exits: partial_close_pct ({}) must be in (0, 1)",
            ex.partial_close_pct
        ));
    }
    // The remaining TP must sit above the partial trigger or the position
    // would close fully on the same candle that takes the partial.
    if ex.partial_tp_remaining_tp <= ex.partial_tp_trigger {
        errors.push(format!(
            "positions.exits: partial_tp_remaining_tp ({}) must be > partial_tp_trigger ({})",
            ex.partial_tp_remaining_tp, ex.partial_tp_trigger
        ));
    }

    let avg = &pos.averaging;
    if avg.max_total_risk_multiplier < dec!(1) {
        errors.push(format!(
            "positions.averaging: max_total_risk_multiplier ({}) must be >= 1",
            avg.max_total_risk_multiplier
        ));
    }
    if avg.size_pct <= Decimal::ZERO || avg.size_pct > dec!(1) {
        errors.push(format!(
            "positions.averaging: size_pct ({}) must be in (0, 1]",
            avg.size_pct
        ));
    }
    if avg.price_drop_pct <= Decimal::ZERO || avg.price_drop_pct >= dec!(1) {
        errors.push(format!(
            "positions.averaging: price_drop_pct ({}) must be in (0, 1)",
            avg.price_drop_pct
        ));
    }

    let sz = &pos.sizing;
    if sz.size_min <= Decimal::ZERO || sz.size_min > sz.size_max || sz.size_max > dec!(1) {
        errors.push(format!(
            "positions.sizing: require 0 < size_min ({}) <= size_max ({}) <= 1",
            sz.size_min, sz.size_max
        ));
    }
    if sz.kelly_fraction <= Decimal::ZERO || sz.kelly_fraction > dec!(1) {
        errors.push(format!(
            "positions.sizing: kelly_fraction ({}) must be in (0, 1]",
            sz.kelly_fraction
        ));
    }
    if sz.use_kelly && sz.kelly_lookback_window == 0 {
        errors.push("positions.sizing: kelly_lookback_window must be > 0".into());
    }
}

fn validate_portfolio(config: &BotConfig, errors: &mut Vec<String>) {
    if config.portfolio.initial_balance <= Decimal::ZERO {
        errors.push(format!(
            "portfolio: initial_balance ({}) must be > 0",
            config.portfolio.initial_balance
        ));
    }
}

fn validate_telegram(config: &BotConfig, errors: &mut Vec<String>) {
    let tg = &config.telegram;
    if tg.enabled {
        if tg.owner_chat_id == 0 {
            errors.push("telegram: owner_chat_id is required when enabled".into());
        }
        if tg.token_env.is_empty() {
            errors.push("telegram: token_env is required when enabled".into());
        }
    }
}
