//! Notifier task: turns engine events into chat messages.
//!
//! Consumes the shared notification channel; with no Telegram client
//! configured it drains events into the log so the engine never blocks on
//! a full channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::telegram::TelegramClient;
use crate::types::Notification;

/// Render one notification as plain chat text.
pub fn format_notification(n: &Notification) -> String {
    match n {
        Notification::PositionOpened {
            symbol,
            price,
            quantity,
            invested,
            mode,
            votes_delta,
            top_reasons,
        } => {
            let mut out = format!(
                "OPEN {symbol} [{mode}]\nprice {price} | qty {quantity} | invested {invested:.2}\nvotes {votes_delta:+}"
            );
            if !top_reasons.is_empty() {
                out.push_str(&format!("\n{}", top_reasons.join("\n")));
            }
            out
        }
        Notification::PartialClose {
            symbol,
            price,
            quantity,
            realized_pnl,
            remaining_quantity,
        } => format!(
            "PARTIAL TP {symbol}\nsold {quantity} @ {price} | P&L {realized_pnl:+.2}\nremaining {remaining_quantity} | stop promoted to break-even"
        ),
        Notification::Averaged {
            symbol,
            mode,
            price,
            quantity,
            average_entry_price,
            averaging_count,
        } => format!(
            "{} {symbol} #{averaging_count}\nadded {quantity} @ {price}\nnew average entry {average_entry_price:.4}",
            mode.as_str()
        ),
        Notification::PositionClosed {
            symbol,
            side,
            price,
            quantity,
            realized_pnl,
            balance_after,
        } => format!(
            "CLOSE {symbol} [{side}]\nsold {quantity} @ {price}\nP&L {realized_pnl:+.2} | cash {balance_after:.2}"
        ),
        Notification::SymbolDeactivated { symbol, reason } => {
            format!("DEACTIVATED {symbol}: {reason}")
        }
        Notification::Critical { symbol, message } => {
            format!("CRITICAL {symbol}: {message}")
        }
    }
}

/// Run until the channel closes or shutdown fires.
pub async fn run_notifier(
    mut rx: mpsc::Receiver<Notification>,
    client: Option<Arc<TelegramClient>>,
    owner_chat_id: i64,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                let text = format_notification(&event);
                info!(notification = %text.replace('\n', " | "), "engine event");
                if let Some(client) = &client {
                    client.send_message(owner_chat_id, &text).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AveragingMode, RegimeMode, TradeSide};
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_open_includes_reasons() {
        let text = format_notification(&Notification::PositionOpened {
            symbol: "BTCUSDT".into(),
            price: dec!(100),
            quantity: dec!(5.9946),
            invested: dec!(600),
            mode: RegimeMode::MeanReversion,
            votes_delta: 6,
            top_reasons: vec!["RSI 28 oversold (<30)".into()],
        });
        assert!(text.contains("OPEN BTCUSDT"));
        assert!(text.contains("votes +6"));
        assert!(text.contains("RSI 28"));
    }

    #[test]
    fn test_format_close_carries_pnl_sign() {
        let text = format_notification(&Notification::PositionClosed {
            symbol: "ETHUSDT".into(),
            side: TradeSide::TrailingStop,
            price: dec!(204),
            quantity: dec!(1.748425),
            realized_pnl: dec!(6.35768917),
            balance_after: dec!(1011.0),
        });
        assert!(text.contains("TRAILING_STOP"));
        assert!(text.contains("+6.36"));
    }

    #[test]
    fn test_format_averaging() {
        let text = format_notification(&Notification::Averaged {
            symbol: "SOLUSDT".into(),
            mode: AveragingMode::AverageDown,
            price: dec!(47.4),
            quantity: dec!(3.16170886),
            average_entry_price: dec!(49.1028),
            averaging_count: 1,
        });
        assert!(text.starts_with("AVERAGE_DOWN SOLUSDT #1"));
    }
}
