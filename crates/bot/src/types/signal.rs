use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Market regime selected by the hysteretic ADX state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegimeMode {
    /// ADX below the low threshold — range-bound, mean-reversion rules.
    MeanReversion,
    /// ADX above the high threshold — directional, trend-following rules.
    TrendFollowing,
    /// ADX between the thresholds — entries only on elevated vote deltas.
    Transition,
    /// No prior observation (fresh symbol).
    Unknown,
}

impl RegimeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MeanReversion => "MR",
            Self::TrendFollowing => "TF",
            Self::Transition => "TRANSITION",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MR" => Some(Self::MeanReversion),
            "TF" => Some(Self::TrendFollowing),
            "TRANSITION" => Some(Self::Transition),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for RegimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted per-symbol regime memory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub last_mode: RegimeMode,
    /// Unix seconds at which `last_mode` was entered. Monotonic.
    pub last_mode_entered_at: i64,
}

impl RegimeState {
    pub fn unknown() -> Self {
        Self {
            last_mode: RegimeMode::Unknown,
            last_mode_entered_at: 0,
        }
    }
}

/// Final signal classification for one candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }
}

/// Output of the vote aggregator for one indicator snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResult {
    pub bullish: u32,
    pub bearish: u32,
    /// `bullish - bearish`.
    pub delta: i32,
    pub reasons: Vec<String>,
    /// The three highest-information reasons, for chat summaries.
    pub top3: Vec<String>,
}

/// Exit template attached to a BUY decision; the position manager applies it
/// when the position opens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitTemplate {
    #[serde(with = "rust_decimal::serde::str")]
    pub stop_loss_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub take_profit_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub trail_activation_pct: Decimal,
}

/// Decision emitted by the signal generator for one closed candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDecision {
    pub kind: SignalKind,
    pub mode: RegimeMode,
    /// Fraction of free cash to invest, in (0, 1]. Zero when not a BUY.
    #[serde(with = "rust_decimal::serde::str")]
    pub size_fraction: Decimal,
    pub exit: ExitTemplate,
    pub votes: VoteResult,
    /// First failing entry filter, when a would-be BUY was suppressed.
    pub block_reason: Option<String>,
}

/// Append-only diagnostics record; one per evaluated candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub symbol: String,
    pub at: i64,
    pub candle_open_time: i64,
    pub signal: SignalKind,
    pub regime: RegimeMode,
    pub votes_delta: i32,
    pub top_reasons: Vec<String>,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub block_reason: Option<String>,
}
