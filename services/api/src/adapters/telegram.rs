//! services/api/src/adapters/telegram.rs
//!
//! Adapter for the Telegram Bot API, implementing the `ChannelTransport`
//! port: long-polled `getUpdates`, `sendMessage`, a best-effort typing
//! indicator, and a `getMe` credential check. Every outbound call carries an
//! explicit timeout.

use async_trait::async_trait;
use chatlink_core::ports::{ChannelTransport, InboundEvent, PortError, PortResult, UpdateBatch};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// How long Telegram holds the getUpdates request open server-side.
const POLL_TIMEOUT_SECS: u64 = 10;

/// HTTP timeout for the poll request; must exceed the server-side hold.
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Interactive sends are short.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

const TYPING_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause before handing a poll failure back to the caller, so an outage
/// does not turn the bridge loop into a tight reconnect spin.
const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub struct TelegramApi {
    bot_token: String,
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct UpdatesEnvelope {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<InboundMessage>,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    text: Option<String>,
    chat: Chat,
    from: Option<From>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct From {
    username: Option<String>,
    first_name: Option<String>,
}

impl TelegramApi {
    pub fn new(bot_token: String) -> Self {
        Self::with_base_url(bot_token, "https://api.telegram.org".to_string())
    }

    /// Test seam: point the adapter at a different host.
    pub fn with_base_url(bot_token: String, base_url: String) -> Self {
        Self {
            bot_token,
            client: Client::new(),
            base_url,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base_url, self.bot_token)
    }

    async fn poll_updates(&self, offset: i64) -> PortResult<UpdateBatch> {
        let response = self
            .client
            .post(self.api_url("getUpdates"))
            .timeout(FETCH_TIMEOUT)
            .json(&json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"],
            }))
            .send()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PortError::Transport(format!(
                "getUpdates returned {}",
                response.status()
            )));
        }

        let envelope: UpdatesEnvelope = response
            .json()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;
        if !envelope.ok {
            return Err(PortError::Transport("getUpdates returned ok=false".to_string()));
        }

        Ok(batch_from_updates(envelope.result))
    }
}

/// Maps raw updates to text events. Non-text updates (photos, stickers)
/// produce no event but their ids still feed `last_update_id`, so the
/// caller's cursor is advanced past them.
fn batch_from_updates(updates: Vec<Update>) -> UpdateBatch {
    let last_update_id = updates.iter().map(|u| u.update_id).max();
    let events = updates
        .into_iter()
        .filter_map(|update| {
            let message = update.message?;
            let text = message.text?;
            let username = message
                .from
                .and_then(|f| f.username.or(f.first_name));
            Some(InboundEvent {
                update_id: update.update_id,
                chat_id: message.chat.id.to_string(),
                username,
                text,
            })
        })
        .collect();
    UpdateBatch {
        events,
        last_update_id,
    }
}

#[async_trait]
impl ChannelTransport for TelegramApi {
    async fn fetch_updates(&self, offset: i64) -> PortResult<UpdateBatch> {
        match self.poll_updates(offset).await {
            Ok(batch) => Ok(batch),
            Err(e) => {
                tokio::time::sleep(FETCH_ERROR_BACKOFF).await;
                Err(e)
            }
        }
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> PortResult<()> {
        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .timeout(SEND_TIMEOUT)
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PortError::Transport(format!(
                "sendMessage returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn send_typing(&self, chat_id: &str) {
        // Best-effort: failures are ignored.
        let _ = self
            .client
            .post(self.api_url("sendChatAction"))
            .timeout(TYPING_TIMEOUT)
            .json(&json!({ "chat_id": chat_id, "action": "typing" }))
            .send()
            .await;
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(self.api_url("getMe"))
            .timeout(SEND_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
