//! Hysteretic regime state machine over ADX.
//!
//! Classifies each tick as mean-reversion, trend-following or transition.
//! A minimum dwell time suppresses MR ↔ TF whipsaw; leaving the transition
//! zone (or the fresh-symbol UNKNOWN state) is always allowed immediately.

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::RegimeConfig;
use crate::types::{RegimeMode, RegimeState};

/// Stateless selector; the caller supplies and persists the prior
/// [`RegimeState`] so the selector can be tested in isolation.
pub struct RegimeSelector {
    adx_low: Decimal,
    adx_high: Decimal,
    min_dwell_seconds: i64,
}

impl RegimeSelector {
    pub fn new(config: &RegimeConfig) -> Self {
        Self {
            adx_low: config.adx_low,
            adx_high: config.adx_high,
            min_dwell_seconds: config.min_dwell_seconds(),
        }
    }

    /// Evaluate one tick.
    ///
    /// Returns the mode to trade under and the state to persist. The
    /// persisted `last_mode_entered_at` only moves forward.
    pub fn select(&self, adx: Decimal, now: i64, prior: RegimeState) -> (RegimeMode, RegimeState) {
        // 1. Candidate purely from ADX.
        let candidate = if adx < self.adx_low {
            RegimeMode::MeanReversion
        } else if adx > self.adx_high {
            RegimeMode::TrendFollowing
        } else {
            RegimeMode::Transition
        };

        // 2. Dwell guard: MR and TF are sticky; TRANSITION and UNKNOWN are not.
        let sticky = matches!(
            prior.last_mode,
            RegimeMode::MeanReversion | RegimeMode::TrendFollowing
        );
        if candidate != prior.last_mode
            && sticky
            && now - prior.last_mode_entered_at < self.min_dwell_seconds
        {
            debug!(
                %adx,
                last_mode = %prior.last_mode,
                candidate = %candidate,
                held_seconds = now - prior.last_mode_entered_at,
                "regime change suppressed by dwell guard"
            );
            return (prior.last_mode, prior);
        }

        // 3. Commit.
        if candidate != prior.last_mode {
            debug!(%adx, from = %prior.last_mode, to = %candidate, "regime change");
            let state = RegimeState {
                last_mode: candidate,
                last_mode_entered_at: now.max(prior.last_mode_entered_at),
            };
            (candidate, state)
        } else {
            (candidate, prior)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn selector() -> RegimeSelector {
        RegimeSelector {
            adx_low: dec!(20),
            adx_high: dec!(24),
            min_dwell_seconds: 1800,
        }
    }

    const T0: i64 = 1_700_000_000;

    #[test]
    fn test_candidate_bands() {
        let sel = selector();
        let unknown = RegimeState::unknown();

        let (m, _) = sel.select(dec!(15), T0, unknown);
        assert_eq!(m, RegimeMode::MeanReversion);

        let (m, _) = sel.select(dec!(30), T0, unknown);
        assert_eq!(m, RegimeMode::TrendFollowing);

        let (m, _) = sel.select(dec!(22), T0, unknown);
        assert_eq!(m, RegimeMode::Transition);
    }

    #[test]
    fn test_dwell_suppresses_whipsaw() {
        // The S4 trace: ADX 26 -> TF, 19 inside dwell stays TF,
        // 19 after 0.6h -> MR.
        let sel = selector();

        let (m1, s1) = sel.select(dec!(26), T0, RegimeState::unknown());
        assert_eq!(m1, RegimeMode::TrendFollowing);
        assert_eq!(s1.last_mode_entered_at, T0);

        let (m2, s2) = sel.select(dec!(19), T0 + 600, s1);
        assert_eq!(m2, RegimeMode::TrendFollowing, "dwell guard must hold TF");
        assert_eq!(s2.last_mode_entered_at, T0);

        let (m3, s3) = sel.select(dec!(19), T0 + 2160, s2);
        assert_eq!(m3, RegimeMode::MeanReversion);
        assert_eq!(s3.last_mode_entered_at, T0 + 2160);
    }

    #[test]
    fn test_leaving_transition_is_immediate() {
        let sel = selector();
        let (m1, s1) = sel.select(dec!(22), T0, RegimeState::unknown());
        assert_eq!(m1, RegimeMode::Transition);

        // Seconds later the band is exited: no dwell applies.
        let (m2, _) = sel.select(dec!(30), T0 + 10, s1);
        assert_eq!(m2, RegimeMode::TrendFollowing);
    }

    #[test]
    fn test_entering_transition_respects_dwell_of_sticky_mode() {
        let sel = selector();
        let (_, s1) = sel.select(dec!(26), T0, RegimeState::unknown());

        // ADX drifts into the band shortly after: TF is held.
        let (m2, _) = sel.select(dec!(22), T0 + 60, s1);
        assert_eq!(m2, RegimeMode::TrendFollowing);

        // After the dwell, the transition zone is honoured.
        let (m3, _) = sel.select(dec!(22), T0 + 1900, s1);
        assert_eq!(m3, RegimeMode::Transition);
    }

    #[test]
    fn test_entered_at_is_monotonic() {
        let sel = selector();
        let (_, s1) = sel.select(dec!(26), T0, RegimeState::unknown());
        // A clock that reads backwards must not move entered_at backwards.
        let (_, s2) = sel.select(dec!(15), T0 + 3600, s1);
        let (_, s3) = sel.select(dec!(30), s2.last_mode_entered_at - 50_000, s2);
        assert!(s3.last_mode_entered_at >= s2.last_mode_entered_at);
    }

    #[test]
    fn test_unchanged_mode_keeps_entered_at() {
        let sel = selector();
        let (_, s1) = sel.select(dec!(26), T0, RegimeState::unknown());
        let (_, s2) = sel.select(dec!(27), T0 + 7200, s1);
        assert_eq!(s2.last_mode_entered_at, T0, "staying in TF keeps its entry time");
    }
}
