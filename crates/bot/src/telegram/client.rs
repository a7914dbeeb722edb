//! Minimal Telegram Bot API transport: long-polling `getUpdates` plus
//! `sendMessage`. No framework, just the two endpoints the engine needs.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::BotError;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// One inbound text message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub update_id: i64,
    pub chat_id: i64,
    pub text: String,
}

#[derive(Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Deserialize)]
struct Message {
    chat: Chat,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Chat {
    id: i64,
}

pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
}

impl TelegramClient {
    pub fn new(token: &str, poll_timeout_seconds: u64) -> Self {
        // The HTTP timeout must outlast the long-poll window.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(poll_timeout_seconds + 10))
            .build()
            .expect("reqwest client should build");

        Self {
            http,
            base: format!("{TELEGRAM_API}/bot{token}"),
        }
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_seconds: u64,
    ) -> Result<Vec<InboundMessage>, BotError> {
        let url = format!("{}/getUpdates", self.base);
        let resp: UpdatesResponse = self
            .http
            .get(&url)
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout_seconds.to_string()),
                ("allowed_updates", "[\"message\"]".to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if !resp.ok {
            return Err(BotError::DataUnavailable {
                name: "telegram getUpdates".into(),
            });
        }

        Ok(resp
            .result
            .into_iter()
            .filter_map(|u| {
                let message = u.message?;
                let text = message.text?;
                Some(InboundMessage {
                    update_id: u.update_id,
                    chat_id: message.chat.id,
                    text,
                })
            })
            .collect())
    }

    /// Fire one text message; failures are logged, not fatal.
    pub async fn send_message(&self, chat_id: i64, text: &str) {
        let url = format!("{}/sendMessage", self.base);
        let body = json!({ "chat_id": chat_id, "text": text });

        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(chat_id, "telegram message sent");
            }
            Ok(resp) => {
                warn!(chat_id, status = %resp.status(), "telegram rejected message");
            }
            Err(e) => {
                warn!(chat_id, error = %e, "telegram send failed");
            }
        }
    }
}
