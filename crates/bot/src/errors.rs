use thiserror::Error;

/// Typed error hierarchy for the trading engine.
///
/// Library-internal errors use specific variants; application code wraps with
/// `anyhow::Context` for propagation.
#[derive(Error, Debug)]
pub enum BotError {
    // -- Exchange -----------------------------------------------------------
    #[error("exchange data unavailable: {name}")]
    DataUnavailable { name: String },

    #[error("unknown or delisted symbol: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("exchange fetch timed out after {timeout_seconds}s ({symbol})")]
    FetchTimeout { symbol: String, timeout_seconds: u64 },

    #[error("order rejected: {reason}")]
    OrderRejected { reason: String },

    // -- Ledger -------------------------------------------------------------
    #[error("ledger error: {reason}")]
    LedgerError { reason: String },

    /// Unique-constraint hit on the trade replay key. Replaying a candle is
    /// a no-op; callers treat this as success.
    #[error("duplicate trade for {symbol} at candle {candle_open_time} ({reason})")]
    DuplicateTrade {
        symbol: String,
        candle_open_time: i64,
        reason: String,
    },

    // -- Position -----------------------------------------------------------
    #[error("position error: {reason}")]
    PositionError { reason: String },

    /// A position update would break a structural invariant. The tick
    /// transaction is rolled back; the process keeps serving other symbols.
    #[error("invariant violation for {symbol}: {reason}")]
    InvariantViolation { symbol: String, reason: String },

    // -- Chat ---------------------------------------------------------------
    #[error("unauthorized chat sender: {chat_id}")]
    Unauthorized { chat_id: i64 },

    #[error("bad command: {reason}")]
    BadCommand { reason: String },

    // -- Configuration ------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    // -- Forwarded errors ---------------------------------------------------
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// Whether the error is a replay artifact rather than a real failure.
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::DuplicateTrade { .. })
    }
}
