//! Exchange adapters: candle feed and order gateway.
//!
//! The engine consumes two narrow interfaces — `fetch_closed_candles` for
//! market data and a market-order execution path for live mode. Paper mode
//! fills synthetically at the candle close and never touches the gateway.

pub mod binance;

pub use binance::{BinanceClient, BinanceOrderGateway};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Authoritative fill summary returned by the order gateway.
///
/// Live fills are requested as market orders and treated as atomic; the
/// position manager reconciles quantity, price and commission from here.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderResult {
    /// Volume-weighted average fill price.
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
}

/// How fills are produced.
pub enum ExecutionMode {
    /// Fill at the candle close with the configured commission rate.
    Paper,
    /// Route market orders through the signed exchange gateway.
    Live(BinanceOrderGateway),
}

impl ExecutionMode {
    pub fn is_paper(&self) -> bool {
        matches!(self, Self::Paper)
    }
}
