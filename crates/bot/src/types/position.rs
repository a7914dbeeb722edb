use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::RegimeMode;

/// How an averaging entry was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AveragingMode {
    AverageDown,
    PyramidUp,
}

impl AveragingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AverageDown => "AVERAGE_DOWN",
            Self::PyramidUp => "PYRAMID_UP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AVERAGE_DOWN" => Some(Self::AverageDown),
            "PYRAMID_UP" => Some(Self::PyramidUp),
            _ => None,
        }
    }
}

/// Side / reason tag on an immutable trade record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeSide {
    Buy,
    Sell,
    StopLoss,
    TakeProfit,
    PartialTp,
    TrailingStop,
    BreakevenStop,
    AverageDown,
    PyramidUp,
    SignalExit,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::StopLoss => "STOP_LOSS",
            Self::TakeProfit => "TAKE_PROFIT",
            Self::PartialTp => "PARTIAL_TP",
            Self::TrailingStop => "TRAILING_STOP",
            Self::BreakevenStop => "BREAKEVEN_STOP",
            Self::AverageDown => "AVERAGE_DOWN",
            Self::PyramidUp => "PYRAMID_UP",
            Self::SignalExit => "SIGNAL_EXIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            "STOP_LOSS" => Some(Self::StopLoss),
            "TAKE_PROFIT" => Some(Self::TakeProfit),
            "PARTIAL_TP" => Some(Self::PartialTp),
            "TRAILING_STOP" => Some(Self::TrailingStop),
            "BREAKEVEN_STOP" => Some(Self::BreakevenStop),
            "AVERAGE_DOWN" => Some(Self::AverageDown),
            "PYRAMID_UP" => Some(Self::PyramidUp),
            "SIGNAL_EXIT" => Some(Self::SignalExit),
            _ => None,
        }
    }

    /// True for sides that add quantity to a position.
    pub fn is_entry(&self) -> bool {
        matches!(self, Self::Buy | Self::AverageDown | Self::PyramidUp)
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One averaging fill recorded against an open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AveragingEntry {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    /// Notional spent including commission.
    #[serde(with = "rust_decimal::serde::str")]
    pub invested: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub commission: Decimal,
    pub mode: AveragingMode,
    pub at: i64,
}

/// An open long position. At most one per symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub opened_at: i64,

    // Economics
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub average_entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    /// First entry's invested notional (incl. commission); the averaging
    /// risk cap is expressed against this.
    #[serde(with = "rust_decimal::serde::str")]
    pub initial_invested: Decimal,
    /// Sum of all entries including commission, reduced pro-rata on
    /// partial closes.
    #[serde(with = "rust_decimal::serde::str")]
    pub total_invested: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub commission_paid: Decimal,

    // Risk
    #[serde(with = "rust_decimal::serde::str")]
    pub stop_loss_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub take_profit_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub highest_price_since_entry: Decimal,
    pub trailing_active: bool,
    pub breakeven_active: bool,
    pub partial_tp_taken: bool,

    // Provenance
    pub entry_mode: RegimeMode,
    pub entry_votes_delta: i32,
    pub entry_reasons: Vec<String>,

    // Averaging
    pub averaging_count: u32,
    pub averaging_entries: Vec<AveragingEntry>,
}

impl Position {
    /// Unrealized P&L at `price`, net of the exit commission that a full
    /// close would pay.
    pub fn unrealized_pnl(&self, price: Decimal, commission_rate: Decimal) -> Decimal {
        let gross = self.quantity * price;
        let exit_commission = gross * commission_rate;
        gross - exit_commission - self.total_invested
    }

    /// Structural invariants checked before every ledger commit.
    pub fn check_invariants(&self, max_averaging: u32, max_risk_mult: Decimal) -> Result<(), String> {
        if self.quantity <= Decimal::ZERO {
            return Err(format!("quantity {} must be > 0 while open", self.quantity));
        }
        if self.stop_loss_price > self.average_entry_price {
            return Err(format!(
                "stop_loss {} above average entry {}",
                self.stop_loss_price, self.average_entry_price
            ));
        }
        if self.take_profit_price < self.average_entry_price {
            return Err(format!(
                "take_profit {} below average entry {}",
                self.take_profit_price, self.average_entry_price
            ));
        }
        if self.averaging_count > max_averaging {
            return Err(format!(
                "averaging_count {} exceeds limit {}",
                self.averaging_count, max_averaging
            ));
        }
        if self.total_invested > self.initial_invested * max_risk_mult {
            return Err(format!(
                "total_invested {} exceeds {} x initial {}",
                self.total_invested, max_risk_mult, self.initial_invested
            ));
        }
        Ok(())
    }
}

/// Immutable record of one fill. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: TradeSide,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub commission: Decimal,
    /// Realized P&L for closing sides; `None` for entries.
    pub realized_pnl: Option<Decimal>,
    /// Open time of the candle that produced the fill — replay key.
    pub candle_open_time: i64,
    pub at: i64,
    pub reason: String,
    pub entry_mode: Option<RegimeMode>,
    pub votes_delta: Option<i32>,
    pub reasons: Vec<String>,
}

/// Durable portfolio aggregate (row id 1 in `portfolio_state`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    #[serde(with = "rust_decimal::serde::str")]
    pub balance_cash: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub initial_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub realized_pnl_cumulative: Decimal,
    pub win_count: u32,
    pub loss_count: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub peak_equity: Decimal,
    pub trading_enabled: bool,
}

impl PortfolioState {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            balance_cash: initial_balance,
            initial_balance,
            realized_pnl_cumulative: Decimal::ZERO,
            win_count: 0,
            loss_count: 0,
            peak_equity: initial_balance,
            trading_enabled: true,
        }
    }

    pub fn win_rate(&self) -> Decimal {
        let closed = self.win_count + self.loss_count;
        if closed == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.win_count) / Decimal::from(closed)
    }
}
