//! crates/chatlink_core/src/link.rs
//!
//! The Identity Link Registry: maps external Telegram chat identities to
//! internal user accounts through single-use connection tokens. This module
//! is the single source of truth for the link state; the denormalized
//! telegram fields on the user row are a cache it keeps consistent.

use std::sync::Arc;

use rand::RngCore;
use uuid::Uuid;

use crate::domain::{IdentityLink, LinkStatus, User};
use crate::ports::{ChatStore, PortError, PortResult};

/// A freshly issued connection token together with the chat-facing
/// instructions that embed it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub instructions: String,
}

/// Generates a connection token: 16 bytes of OS randomness rendered as a
/// fixed-length lowercase hex string (32 chars, 128 bits).
pub fn generate_connection_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Clone)]
pub struct LinkRegistry {
    store: Arc<dyn ChatStore>,
}

impl LinkRegistry {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Issues (or re-issues) a connection token for `user_id`. Any previous
    /// link row for the user is replaced, so an earlier unconsumed token
    /// stops binding from this point on.
    pub async fn issue_token(&self, user_id: Uuid) -> PortResult<IssuedToken> {
        let token = generate_connection_token();
        let link = self.store.replace_link(user_id, &token).await?;

        let instructions = format!(
            "1. Copy the token below\n\
             2. Open Telegram and find the bot\n\
             3. Send it the command: /connect {token}\n\
             4. The bot will confirm the connection",
            token = link.connection_token
        );

        Ok(IssuedToken {
            token: link.connection_token,
            instructions,
        })
    }

    /// Consumes a connection token: activates the link, binds the external
    /// chat identity, and refreshes the denormalized cache on the user row.
    ///
    /// Re-binding the same token is idempotent at the user-visible level;
    /// `connected_at` keeps its first value. Tokens never expire by time,
    /// only by being superseded via `issue_token`.
    pub async fn bind_token(
        &self,
        token: &str,
        chat_id: &str,
        username: &str,
    ) -> PortResult<IdentityLink> {
        let link = self
            .store
            .find_link_by_token(token)
            .await?
            .ok_or(PortError::TokenNotFound)?;

        let bound = self.store.bind_link(link.id, chat_id, username).await?;
        self.store
            .set_telegram_identity(bound.user_id, chat_id, username)
            .await?;

        tracing::info!(user_id = %bound.user_id, chat_id, "telegram link bound");
        Ok(bound)
    }

    /// Resolves an inbound chat id to its user through the active link.
    /// Returns `None` when the chat is not connected.
    pub async fn resolve_by_chat_id(&self, chat_id: &str) -> PortResult<Option<User>> {
        let Some(link) = self.store.find_active_link_by_chat(chat_id).await? else {
            return Ok(None);
        };

        self.store.touch_link_activity(link.id).await?;
        let user = self.store.get_user(link.user_id).await?;
        Ok(Some(user))
    }

    /// Read-only connection status. A user without a link record gets the
    /// "not connected" shape rather than an error.
    pub async fn status(&self, user_id: Uuid) -> PortResult<LinkStatus> {
        match self.store.find_link_by_user(user_id).await? {
            Some(link) => Ok(LinkStatus {
                connected: link.is_active,
                username: link.username,
                connected_at: link.connected_at,
                last_message_at: link.last_message_at,
            }),
            None => Ok(LinkStatus::default()),
        }
    }
}
