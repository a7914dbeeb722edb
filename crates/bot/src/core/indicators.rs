//! Indicator pipeline: deterministic math over a candle series, no I/O.
//!
//! Every function here is a free function over slices so each indicator is
//! testable on its own; [`compute_all`] is the only assembly point and the
//! only thing the tick path calls. Warmup is encoded per indicator — an
//! empty series, a neutral reading or a `None` — rather than with a shared
//! "ready" flag, because each consumer (vote rules, regime selector, exit
//! templates) degrades differently when its input is missing.
//!
//! Covered: EMA family with trend slope, Wilder RSI, MACD with signal-cross
//! detection, Wilder ADX/±DI, Wilder ATR, Bollinger bands, the close
//! z-score, rolling volume mean and the rolling day low.
//!
//! References:
//!     Wilder (1978), "New Concepts in Technical Trading Systems".
//!     Bollinger (2001), "Bollinger on Bollinger Bands".

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;

use crate::config::IndicatorParams;
use crate::types::{Candle, IndicatorSnapshot};

/// Number of candles scanned back for EMA/MACD cross detection.
const CROSS_LOOKBACK: usize = 3;

// ═══════════════════════════════════════════════════════════════════════════
// Moving averages
// ═══════════════════════════════════════════════════════════════════════════

/// Exponential moving average as a series, one value per candle from the
/// point the window first fills.
///
/// The level starts at the plain mean of the first window (an unseeded EMA
/// would anchor on whatever close happens to open the series) and then
/// moves by `alpha = 2 / (period + 1)` toward each new close. An empty
/// result means the window never filled; vote rules treat that as a
/// missing signal rather than a zero.
pub fn ema(prices: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }

    let n = Decimal::from(period as u64);
    let alpha = dec!(2) / (n + dec!(1));

    let mut level: Decimal = prices[..period].iter().copied().sum::<Decimal>() / n;
    let mut series = Vec::with_capacity(prices.len() - period + 1);
    series.push(level);

    for &close in &prices[period..] {
        level += alpha * (close - level);
        series.push(level);
    }

    series
}

/// Simple moving average of the last `period` values.
///
/// Falls back to the mean of whatever is available when the series is short.
pub fn sma_tail(values: &[Decimal], period: usize) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    let window = period.min(values.len()).max(1);
    values[values.len() - window..]
        .iter()
        .copied()
        .sum::<Decimal>()
        / Decimal::from(window as u64)
}

// ═══════════════════════════════════════════════════════════════════════════
// RSI
// ═══════════════════════════════════════════════════════════════════════════

/// Wilder RSI over closes.
///
/// Each close-to-close delta lands on exactly one side of a running
/// gain/loss pair: plain averages while the first window fills, Wilder's
/// `1/period` blend afterwards. A series too short to produce one full
/// window of deltas reads as the neutral 50, which keeps the RSI vote
/// rule and the mean-reversion filter quiet during warmup. A loss-free
/// history saturates at 100.
pub fn rsi(prices: &[Decimal], period: usize) -> Decimal {
    if period == 0 || prices.len() <= period {
        return dec!(50);
    }

    let n = Decimal::from(period as u64);
    let mut avg_gain = Decimal::ZERO;
    let mut avg_loss = Decimal::ZERO;

    for (i, pair) in prices.windows(2).enumerate() {
        let delta = pair[1] - pair[0];
        let (gain, loss) = if delta >= Decimal::ZERO {
            (delta, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -delta)
        };

        if i < period {
            avg_gain += gain / n;
            avg_loss += loss / n;
        } else {
            avg_gain = (avg_gain * (n - dec!(1)) + gain) / n;
            avg_loss = (avg_loss * (n - dec!(1)) + loss) / n;
        }
    }

    if avg_loss == Decimal::ZERO {
        return dec!(100);
    }
    dec!(100) - dec!(100) / (dec!(1) + avg_gain / avg_loss)
}

// ═══════════════════════════════════════════════════════════════════════════
// MACD
// ═══════════════════════════════════════════════════════════════════════════

/// MACD line and signal series, aligned to each other.
///
/// Returns `None` if insufficient data. The last element of each series is
/// the current value.
pub fn macd_series(
    prices: &[Decimal],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<(Vec<Decimal>, Vec<Decimal>)> {
    if prices.len() < slow + signal {
        return None;
    }

    let fast_ema = ema(prices, fast);
    let slow_ema = ema(prices, slow);
    if fast_ema.is_empty() || slow_ema.is_empty() {
        return None;
    }

    // The slow EMA starts later; index the fast series from the same
    // candle so the subtraction lines up.
    let offset = slow - fast;
    let macd_values: Vec<Decimal> = (0..slow_ema.len())
        .map(|i| fast_ema[i + offset] - slow_ema[i])
        .collect();

    let signal_ema = ema(&macd_values, signal);
    if signal_ema.is_empty() {
        return None;
    }

    // Trim the line to the span covered by the signal.
    let line_tail = macd_values[macd_values.len() - signal_ema.len()..].to_vec();
    Some((line_tail, signal_ema))
}

/// Latest `(macd_line, signal_line, histogram)`. Zeroes on short input.
pub fn macd(
    prices: &[Decimal],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Decimal, Decimal, Decimal) {
    match macd_series(prices, fast, slow, signal) {
        Some((line, sig)) => {
            let l = *line.last().expect("aligned series are non-empty");
            let s = *sig.last().expect("aligned series are non-empty");
            (l, s, l - s)
        }
        None => (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ADX / DI
// ═══════════════════════════════════════════════════════════════════════════

/// Wilder ADX with directional indices.
///
/// Returns `(adx, plus_di, minus_di)`. Requires `2 × period` candles for a
/// meaningful ADX; returns zeroes on short or mismatched input.
pub fn adx(
    highs: &[Decimal],
    lows: &[Decimal],
    closes: &[Decimal],
    period: usize,
) -> (Decimal, Decimal, Decimal) {
    let n = highs.len();
    if period == 0 || n < 2 * period + 1 || lows.len() != n || closes.len() != n {
        return (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO);
    }

    let period_d = Decimal::from(period as u64);
    let hundred = dec!(100);

    // Raw true range and directional movement.
    let mut trs = Vec::with_capacity(n - 1);
    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);

    for i in 1..n {
        let hl = highs[i] - lows[i];
        let hc = (highs[i] - closes[i - 1]).abs();
        let lc = (lows[i] - closes[i - 1]).abs();
        trs.push(hl.max(hc).max(lc));

        let up = highs[i] - highs[i - 1];
        let down = lows[i - 1] - lows[i];
        if up > down && up > Decimal::ZERO {
            plus_dm.push(up);
            minus_dm.push(Decimal::ZERO);
        } else if down > up && down > Decimal::ZERO {
            plus_dm.push(Decimal::ZERO);
            minus_dm.push(down);
        } else {
            plus_dm.push(Decimal::ZERO);
            minus_dm.push(Decimal::ZERO);
        }
    }

    // Wilder smoothing: seed with the plain sum, then
    // `smoothed = prev - prev/period + current`.
    let mut tr_s: Decimal = trs[..period].iter().copied().sum();
    let mut plus_s: Decimal = plus_dm[..period].iter().copied().sum();
    let mut minus_s: Decimal = minus_dm[..period].iter().copied().sum();

    let mut dx_values: Vec<Decimal> = Vec::new();

    let push_dx = |tr_s: Decimal,
                   plus_s: Decimal,
                   minus_s: Decimal,
                   dx_values: &mut Vec<Decimal>|
     -> (Decimal, Decimal) {
        if tr_s == Decimal::ZERO {
            dx_values.push(Decimal::ZERO);
            return (Decimal::ZERO, Decimal::ZERO);
        }
        let p_di = hundred * plus_s / tr_s;
        let m_di = hundred * minus_s / tr_s;
        let di_sum = p_di + m_di;
        let dx = if di_sum == Decimal::ZERO {
            Decimal::ZERO
        } else {
            hundred * (p_di - m_di).abs() / di_sum
        };
        dx_values.push(dx);
        (p_di, m_di)
    };

    let (mut plus_di, mut minus_di) = push_dx(tr_s, plus_s, minus_s, &mut dx_values);

    for i in period..trs.len() {
        tr_s = tr_s - tr_s / period_d + trs[i];
        plus_s = plus_s - plus_s / period_d + plus_dm[i];
        minus_s = minus_s - minus_s / period_d + minus_dm[i];
        let (p, m) = push_dx(tr_s, plus_s, minus_s, &mut dx_values);
        plus_di = p;
        minus_di = m;
    }

    if dx_values.len() < period {
        return (Decimal::ZERO, plus_di, minus_di);
    }

    // ADX: Wilder average of DX.
    let mut adx_val: Decimal =
        dx_values[..period].iter().copied().sum::<Decimal>() / period_d;
    for &dx in &dx_values[period..] {
        adx_val = (adx_val * (period_d - dec!(1)) + dx) / period_d;
    }

    (adx_val, plus_di, minus_di)
}

// ═══════════════════════════════════════════════════════════════════════════
// ATR
// ═══════════════════════════════════════════════════════════════════════════

/// Wilder average true range, consumed downstream as a percent of price
/// for the dynamic stop templates.
///
/// The true range stretches each bar's high/low span to reach the prior
/// close, so overnight gaps count toward volatility instead of vanishing
/// between bars. One pass over the series: the first window accumulates a
/// plain mean, every later bar is folded in with Wilder's `1/period`
/// blend. Mismatched slices or a window the series cannot cover yield
/// zero, which the exit templates read as "no volatility opinion".
pub fn atr(highs: &[Decimal], lows: &[Decimal], closes: &[Decimal], period: usize) -> Decimal {
    let bars = highs.len();
    if period == 0 || bars <= period || lows.len() != bars || closes.len() != bars {
        return Decimal::ZERO;
    }

    let n = Decimal::from(period as u64);
    let mut value = Decimal::ZERO;

    for i in 1..bars {
        let span = highs[i] - lows[i];
        let reach_up = (highs[i] - closes[i - 1]).abs();
        let reach_down = (lows[i] - closes[i - 1]).abs();
        let true_range = span.max(reach_up).max(reach_down);

        value = if i <= period {
            value + true_range / n
        } else {
            (value * (n - dec!(1)) + true_range) / n
        };
    }

    value
}

// ═══════════════════════════════════════════════════════════════════════════
// Bollinger Bands
// ═══════════════════════════════════════════════════════════════════════════

/// Bollinger triple `(upper, middle, lower)` over the trailing window.
///
/// The middle line is the rolling close mean; the envelope sits
/// `std_mult` population standard deviations out. While the window is
/// unfilled all three lines collapse onto the last close, so the
/// close-vs-midline vote rule abstains instead of reading a phantom band.
pub fn bollinger_bands(
    prices: &[Decimal],
    period: usize,
    std_mult: Decimal,
) -> (Decimal, Decimal, Decimal) {
    let Some(&last) = prices.last() else {
        return (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO);
    };
    if period == 0 || prices.len() < period {
        return (last, last, last);
    }

    let n = Decimal::from(period as u64);
    let window = &prices[prices.len() - period..];
    let middle: Decimal = window.iter().copied().sum::<Decimal>() / n;
    let dispersion: Decimal = window
        .iter()
        .map(|&close| (close - middle) * (close - middle))
        .sum::<Decimal>()
        / n;

    let envelope = std_mult * dispersion.sqrt().unwrap_or(Decimal::ZERO);
    (middle + envelope, middle, middle - envelope)
}

// ═══════════════════════════════════════════════════════════════════════════
// Z-score
// ═══════════════════════════════════════════════════════════════════════════

/// Standardised distance of the latest close from its rolling mean, using
/// the sample standard deviation over `window`.
///
/// `None` before `window` samples or on zero dispersion — a missing z-score
/// forces the signal generator to HOLD.
pub fn zscore(prices: &[Decimal], window: usize) -> Option<Decimal> {
    if window < 2 || prices.len() < window {
        return None;
    }

    let tail = &prices[prices.len() - window..];
    let n = Decimal::from(window as u64);
    let mean: Decimal = tail.iter().copied().sum::<Decimal>() / n;

    let variance: Decimal = tail
        .iter()
        .map(|&p| {
            let d = p - mean;
            d * d
        })
        .sum::<Decimal>()
        / (n - dec!(1));

    let std_dev = variance.sqrt().unwrap_or(Decimal::ZERO);
    if std_dev == Decimal::ZERO {
        return None;
    }

    let last = *prices.last().expect("length checked above");
    Some((last - mean) / std_dev)
}

// ═══════════════════════════════════════════════════════════════════════════
// Cross detection
// ═══════════════════════════════════════════════════════════════════════════

/// Whether `fast - slow` flipped positive within the last
/// [`CROSS_LOOKBACK`] samples (and is positive now).
fn crossed_up(diffs: &[Decimal]) -> bool {
    let n = diffs.len();
    if n < 2 {
        return false;
    }
    let now = diffs[n - 1];
    if now <= Decimal::ZERO {
        return false;
    }
    let from = n.saturating_sub(CROSS_LOOKBACK + 1);
    diffs[from..n - 1].iter().any(|&d| d <= Decimal::ZERO)
}

fn crossed_down(diffs: &[Decimal]) -> bool {
    let n = diffs.len();
    if n < 2 {
        return false;
    }
    let now = diffs[n - 1];
    if now >= Decimal::ZERO {
        return false;
    }
    let from = n.saturating_sub(CROSS_LOOKBACK + 1);
    diffs[from..n - 1].iter().any(|&d| d >= Decimal::ZERO)
}

/// Difference series of two EMA series aligned from the tail.
fn tail_diffs(fast: &[Decimal], slow: &[Decimal]) -> Vec<Decimal> {
    let len = fast.len().min(slow.len());
    (0..len)
        .map(|i| fast[fast.len() - len + i] - slow[slow.len() - len + i])
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Composite
// ═══════════════════════════════════════════════════════════════════════════

/// Compute the full [`IndicatorSnapshot`] for the latest candle.
///
/// `day_low_window` is the number of candles spanning roughly one day at
/// the configured interval. Returns `None` when the series is too short to
/// produce the core EMAs.
pub fn compute_all(
    candles: &[Candle],
    params: &IndicatorParams,
    day_low_window: usize,
) -> Option<IndicatorSnapshot> {
    if candles.len() < 2 {
        return None;
    }

    let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
    let highs: Vec<Decimal> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<Decimal> = candles.iter().map(|c| c.low).collect();
    let volumes: Vec<Decimal> = candles.iter().map(|c| c.volume).collect();

    let last = candles.last().expect("length checked above");
    let price = last.close;
    let prev_close = candles[candles.len() - 2].close;

    // EMA family. Short/long are required; the trend EMA degrades to the
    // price when history is too short (its slope then reads as flat).
    let ema_short_series = ema(&closes, params.ema_short as usize);
    let ema_long_series = ema(&closes, params.ema_long as usize);
    if ema_short_series.is_empty() || ema_long_series.is_empty() {
        return None;
    }
    let ema_short = *ema_short_series.last().expect("non-empty");
    let ema_long = *ema_long_series.last().expect("non-empty");

    let ema_trend_series = ema(&closes, params.ema_trend as usize);
    let ema_trend = ema_trend_series.last().copied().unwrap_or(price);

    let slope_lookback = params.ema_trend_slope_candles as usize;
    let ema_trend_slope = if ema_trend_series.len() > slope_lookback {
        let then = ema_trend_series[ema_trend_series.len() - 1 - slope_lookback];
        if then > Decimal::ZERO {
            (ema_trend - then) / then
        } else {
            Decimal::ZERO
        }
    } else {
        Decimal::ZERO
    };

    let ema_diffs = tail_diffs(&ema_short_series, &ema_long_series);
    let ema_cross_up_recent = crossed_up(&ema_diffs);
    let ema_cross_down_recent = crossed_down(&ema_diffs);

    // RSI now and one candle back.
    let rsi_now = rsi(&closes, params.rsi_period as usize);
    let rsi_prev = rsi(&closes[..closes.len() - 1], params.rsi_period as usize);

    // MACD with cross detection.
    let (macd_line, macd_signal, macd_histogram, macd_up, macd_down) = match macd_series(
        &closes,
        params.macd_fast as usize,
        params.macd_slow as usize,
        params.macd_signal as usize,
    ) {
        Some((line, sig)) => {
            let diffs = tail_diffs(&line, &sig);
            let l = *line.last().expect("non-empty");
            let s = *sig.last().expect("non-empty");
            (l, s, l - s, crossed_up(&diffs), crossed_down(&diffs))
        }
        None => (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, false, false),
    };

    // Trend strength and volatility.
    let (adx_val, plus_di, minus_di) = adx(&highs, &lows, &closes, params.adx_period as usize);
    let atr_val = atr(&highs, &lows, &closes, params.atr_period as usize);
    let atr_pct = if price > Decimal::ZERO {
        atr_val / price
    } else {
        Decimal::ZERO
    };

    let (bb_upper, bb_middle, bb_lower) =
        bollinger_bands(&closes, params.bb_period as usize, params.bb_std);

    let z = zscore(&closes, params.zscore_window as usize);

    let volume = *volumes.last().expect("length checked above");
    let volume_mean = sma_tail(&volumes, params.volume_ma_period as usize);

    let low_window = day_low_window.min(lows.len()).max(1);
    let day_low = lows[lows.len() - low_window..]
        .iter()
        .copied()
        .fold(lows[lows.len() - low_window], Decimal::min);

    Some(IndicatorSnapshot {
        open_time: last.open_time,
        price,
        prev_close,
        ema_short,
        ema_long,
        ema_trend,
        ema_trend_slope,
        ema_cross_up_recent,
        ema_cross_down_recent,
        rsi: rsi_now,
        rsi_prev,
        macd_line,
        macd_signal,
        macd_histogram,
        macd_cross_up_recent: macd_up,
        macd_cross_down_recent: macd_down,
        adx: adx_val,
        plus_di,
        minus_di,
        atr: atr_val,
        atr_pct,
        bb_upper,
        bb_middle,
        bb_lower,
        zscore: z,
        volume,
        volume_mean,
        day_low,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> IndicatorParams {
        IndicatorParams {
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
        }
    }

    fn flat_candles(n: usize, price: Decimal) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                open_time: 1_700_000_000 + (i as i64) * 3600,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: dec!(10),
            })
            .collect()
    }

    // -- EMA ---------------------------------------------------------------

    #[test]
    fn test_ema_basic() {
        let prices: Vec<Decimal> = (1..=10).map(Decimal::from).collect();
        let result = ema(&prices, 3);
        // First value = SMA of [1,2,3] = 2
        assert_eq!(result[0], dec!(2));
        assert_eq!(result.len(), 8);
    }

    #[test]
    fn test_ema_insufficient_data() {
        let prices = vec![dec!(1), dec!(2)];
        assert!(ema(&prices, 5).is_empty());
        assert!(ema(&prices, 0).is_empty());
    }

    // -- RSI ---------------------------------------------------------------

    #[test]
    fn test_rsi_all_gains() {
        let prices: Vec<Decimal> = (1..=20).map(Decimal::from).collect();
        assert_eq!(rsi(&prices, 14), dec!(100));
    }

    #[test]
    fn test_rsi_all_losses() {
        let prices: Vec<Decimal> = (0..20).rev().map(|i| Decimal::from(i + 1)).collect();
        let val = rsi(&prices, 14);
        assert!(val < dec!(1), "expected near-zero RSI, got {val}");
    }

    #[test]
    fn test_rsi_insufficient_data() {
        assert_eq!(rsi(&[dec!(10), dec!(11)], 14), dec!(50));
    }

    // -- MACD --------------------------------------------------------------

    #[test]
    fn test_macd_insufficient_data() {
        let prices: Vec<Decimal> = (1..=10).map(Decimal::from).collect();
        assert_eq!(
            macd(&prices, 12, 26, 9),
            (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
        );
    }

    #[test]
    fn test_macd_flat_prices() {
        let prices: Vec<Decimal> = vec![dec!(100); 50];
        let (m, s, h) = macd(&prices, 12, 26, 9);
        assert_eq!(m, Decimal::ZERO);
        assert_eq!(s, Decimal::ZERO);
        assert_eq!(h, Decimal::ZERO);
    }

    #[test]
    fn test_macd_series_alignment() {
        let prices: Vec<Decimal> = (1..=60).map(Decimal::from).collect();
        let (line, sig) = macd_series(&prices, 12, 26, 9).unwrap();
        assert_eq!(line.len(), sig.len());
        assert!(!line.is_empty());
    }

    // -- ADX ---------------------------------------------------------------

    #[test]
    fn test_adx_insufficient_data() {
        let h = vec![dec!(10); 10];
        let l = vec![dec!(9); 10];
        let c = vec![dec!(9.5); 10];
        assert_eq!(adx(&h, &l, &c, 14), (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO));
    }

    #[test]
    fn test_adx_strong_uptrend() {
        // Monotonically rising bars: +DM dominates, ADX should be high.
        let n = 60;
        let highs: Vec<Decimal> = (0..n).map(|i| Decimal::from(100 + 2 * i)).collect();
        let lows: Vec<Decimal> = (0..n).map(|i| Decimal::from(98 + 2 * i)).collect();
        let closes: Vec<Decimal> = (0..n).map(|i| Decimal::from(99 + 2 * i)).collect();

        let (a, p, m) = adx(&highs, &lows, &closes, 14);
        assert!(p > m, "uptrend should have +DI > -DI ({p} vs {m})");
        assert!(a > dec!(25), "sustained trend should push ADX above 25, got {a}");
    }

    #[test]
    fn test_adx_choppy_range() {
        // Alternating bars: directional movement cancels, ADX stays low.
        let n = 80;
        let highs: Vec<Decimal> = (0..n)
            .map(|i| if i % 2 == 0 { dec!(101) } else { dec!(100.5) })
            .collect();
        let lows: Vec<Decimal> = (0..n)
            .map(|i| if i % 2 == 0 { dec!(99) } else { dec!(99.5) })
            .collect();
        let closes: Vec<Decimal> = (0..n)
            .map(|i| if i % 2 == 0 { dec!(100.4) } else { dec!(99.6) })
            .collect();

        let (a, _, _) = adx(&highs, &lows, &closes, 14);
        assert!(a < dec!(20), "choppy range should keep ADX low, got {a}");
    }

    // -- ATR ---------------------------------------------------------------

    #[test]
    fn test_atr_mismatched_lengths() {
        let highs = vec![dec!(10), dec!(11)];
        let lows = vec![dec!(9)];
        let closes = vec![dec!(10), dec!(10)];
        assert_eq!(atr(&highs, &lows, &closes, 14), Decimal::ZERO);
    }

    #[test]
    fn test_atr_basic() {
        let highs: Vec<Decimal> = (0..16).map(|i| Decimal::from(102 + i % 3)).collect();
        let lows: Vec<Decimal> = (0..16).map(|i| Decimal::from(98 - i % 3)).collect();
        let closes: Vec<Decimal> = (0..16).map(|_| dec!(100)).collect();
        assert!(atr(&highs, &lows, &closes, 14) > Decimal::ZERO);
    }

    // -- Bollinger Bands ---------------------------------------------------

    #[test]
    fn test_bb_flat_prices() {
        let prices = vec![dec!(100); 20];
        assert_eq!(
            bollinger_bands(&prices, 20, dec!(2)),
            (dec!(100), dec!(100), dec!(100))
        );
    }

    #[test]
    fn test_bb_insufficient_data() {
        let prices = vec![dec!(50), dec!(51)];
        let (u, m, l) = bollinger_bands(&prices, 20, dec!(2));
        assert_eq!((u, m, l), (dec!(51), dec!(51), dec!(51)));
    }

    // -- Z-score -----------------------------------------------------------

    #[test]
    fn test_zscore_undefined_before_window() {
        let prices: Vec<Decimal> = (1..50).map(Decimal::from).collect();
        assert!(zscore(&prices, 50).is_none());
    }

    #[test]
    fn test_zscore_undefined_on_flat_series() {
        let prices = vec![dec!(100); 60];
        assert!(zscore(&prices, 50).is_none());
    }

    #[test]
    fn test_zscore_sign() {
        // 49 candles at 100, last one dumps to 90: z must be well negative.
        let mut prices = vec![dec!(100); 49];
        prices.push(dec!(90));
        let z = zscore(&prices, 50).unwrap();
        assert!(z < dec!(-2), "dump should read deeply negative, got {z}");
    }

    // -- Cross detection ---------------------------------------------------

    #[test]
    fn test_crossed_up_within_lookback() {
        let diffs = vec![dec!(-1), dec!(-0.5), dec!(0.2), dec!(0.4)];
        assert!(crossed_up(&diffs));
        assert!(!crossed_down(&diffs));
    }

    #[test]
    fn test_no_cross_when_always_positive() {
        let diffs = vec![dec!(0.5), dec!(0.6), dec!(0.7), dec!(0.8), dec!(0.9)];
        assert!(!crossed_up(&diffs));
    }

    // -- Composite ---------------------------------------------------------

    #[test]
    fn test_compute_all_none_when_too_short() {
        let candles = flat_candles(10, dec!(100));
        assert!(compute_all(&candles, &params(), 24).is_none());
    }

    #[test]
    fn test_compute_all_flat_series() {
        let candles = flat_candles(260, dec!(100));
        let snap = compute_all(&candles, &params(), 24).unwrap();
        assert_eq!(snap.price, dec!(100));
        assert_eq!(snap.ema_short, dec!(100));
        assert_eq!(snap.ema_long, dec!(100));
        assert_eq!(snap.macd_histogram, Decimal::ZERO);
        assert_eq!(snap.day_low, dec!(100));
        assert_eq!(snap.ema_trend_slope, Decimal::ZERO);
        // Flat series has zero dispersion: z-score undefined.
        assert!(snap.zscore.is_none());
    }

    #[test]
    fn test_compute_all_day_low_window() {
        let mut candles = flat_candles(260, dec!(100));
        // Dip 10 candles back; inside the 24-candle window.
        let n = candles.len();
        candles[n - 10].low = dec!(88);
        let snap = compute_all(&candles, &params(), 24).unwrap();
        assert_eq!(snap.day_low, dec!(88));

        // Dip 30 candles back is outside the window.
        let mut candles = flat_candles(260, dec!(100));
        let n = candles.len();
        candles[n - 30].low = dec!(88);
        let snap = compute_all(&candles, &params(), 24).unwrap();
        assert_eq!(snap.day_low, dec!(100));
    }

    #[test]
    fn test_compute_all_snapshot_timestamp_is_open_time() {
        let candles = flat_candles(260, dec!(100));
        let snap = compute_all(&candles, &params(), 24).unwrap();
        assert_eq!(snap.open_time, candles.last().unwrap().open_time);
    }
}
