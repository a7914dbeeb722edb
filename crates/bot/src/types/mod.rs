pub mod candle;
pub mod indicators;
pub mod position;
pub mod signal;

pub use candle::{Candle, Timeframe};
pub use indicators::IndicatorSnapshot;
pub use position::{
    AveragingEntry, AveragingMode, PortfolioState, Position, TradeRecord, TradeSide,
};
pub use signal::{
    ExitTemplate, RegimeMode, RegimeState, SignalDecision, SignalKind, SignalRecord, VoteResult,
};

use rust_decimal::Decimal;

/// State-changing event surfaced to the chat notifier.
///
/// One notification per open, partial close, averaging fill, full close
/// and critical failure.
#[derive(Debug, Clone)]
pub enum Notification {
    PositionOpened {
        symbol: String,
        price: Decimal,
        quantity: Decimal,
        invested: Decimal,
        mode: RegimeMode,
        votes_delta: i32,
        top_reasons: Vec<String>,
    },
    PartialClose {
        symbol: String,
        price: Decimal,
        quantity: Decimal,
        realized_pnl: Decimal,
        remaining_quantity: Decimal,
    },
    Averaged {
        symbol: String,
        mode: AveragingMode,
        price: Decimal,
        quantity: Decimal,
        average_entry_price: Decimal,
        averaging_count: u32,
    },
    PositionClosed {
        symbol: String,
        side: TradeSide,
        price: Decimal,
        quantity: Decimal,
        realized_pnl: Decimal,
        balance_after: Decimal,
    },
    SymbolDeactivated {
        symbol: String,
        reason: String,
    },
    Critical {
        symbol: String,
        message: String,
    },
}
