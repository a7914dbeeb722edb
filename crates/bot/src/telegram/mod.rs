//! Telegram control surface.
//!
//! A thin Bot API transport ([`client`]), an owner-authenticated command
//! handler that mutates state only through the ledger ([`commands`]), and
//! the notifier task that turns engine events into chat messages
//! ([`notifier`]). The command path never blocks the scheduler.

pub mod client;
pub mod commands;
pub mod notifier;

pub use client::TelegramClient;
pub use commands::{ChatCommand, CommandHandler};
pub use notifier::run_notifier;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::BotError;

/// Long-poll for commands until shutdown.
///
/// Only the configured owner chat may issue commands; everyone else gets a
/// refusal and a log line. Handler errors are reported back as text.
pub async fn run_command_loop(
    client: Arc<TelegramClient>,
    handler: CommandHandler,
    owner_chat_id: i64,
    poll_timeout_seconds: u64,
    shutdown: CancellationToken,
) {
    let mut offset: i64 = 0;
    info!(owner_chat_id, "telegram command loop started");

    loop {
        let updates = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = client.get_updates(offset, poll_timeout_seconds) => result,
        };

        let updates = match updates {
            Ok(u) => u,
            Err(e) => {
                warn!(error = %e, "telegram poll failed, backing off");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for message in updates {
            offset = offset.max(message.update_id + 1);

            if message.chat_id != owner_chat_id {
                warn!(chat_id = message.chat_id, "unauthorized chat command refused");
                client
                    .send_message(message.chat_id, "Unauthorized.")
                    .await;
                continue;
            }

            let reply = match ChatCommand::parse(&message.text) {
                Ok(command) => match handler.handle(command).await {
                    Ok(text) => text,
                    Err(e) => format!("Error: {e}"),
                },
                Err(BotError::BadCommand { reason }) => format!("Bad command: {reason}"),
                Err(e) => format!("Error: {e}"),
            };
            client.send_message(owner_chat_id, &reply).await;
        }
    }

    info!("telegram command loop stopped");
}
