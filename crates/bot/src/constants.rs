//! Shared numeric constants.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const SECONDS_PER_HOUR: i64 = 3_600;
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Quantities are floored to this many fractional digits (exchange lot step).
pub const LOT_DECIMALS: u32 = 8;

/// Volume must exceed `mean × VOLUME_CONFIRM_RATIO` to count as confirmation.
pub const VOLUME_CONFIRM_RATIO: Decimal = dec!(1.2);

/// Vote delta treated as a "strong" signal for pyramid sizing.
pub const SIGNAL_STRENGTH_STRONG: i32 = 7;
