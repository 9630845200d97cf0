//! crates/chatlink_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Conversation, IdentityLink, Message, ModelInfo, ProactiveMessage, PromptTurn, Role, User,
    UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The error taxonomy shared by all port operations.
///
/// `NotFound` deliberately covers both "absent" and "not owned by the caller"
/// so that unauthorized lookups cannot distinguish the two.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Connection token not found")]
    TokenNotFound,
    #[error("Completion service error ({status}): {body}")]
    Upstream { status: u16, body: String },
    #[error("Missing configuration: {0}")]
    Configuration(String),
    #[error("Channel transport error: {0}")]
    Transport(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistence Port
//=========================================================================================

#[async_trait]
pub trait ChatStore: Send + Sync {
    // --- User Management ---
    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;

    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        default_model: &str,
    ) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn set_current_model(&self, user_id: Uuid, model: &str) -> PortResult<()>;

    async fn set_life_context(&self, user_id: Uuid, context: Option<&str>) -> PortResult<()>;

    async fn set_preferred_models(&self, user_id: Uuid, models: &[String]) -> PortResult<()>;

    /// Refreshes the denormalized Telegram identity cache on the user row.
    /// Written only by the Identity Link Registry; the link row stays the
    /// source of truth.
    async fn set_telegram_identity(
        &self,
        user_id: Uuid,
        chat_id: &str,
        username: &str,
    ) -> PortResult<()>;

    // --- Auth Sessions ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Conversations ---
    async fn create_conversation(&self, user_id: Uuid, title: &str) -> PortResult<Conversation>;

    /// Returns the existing `(user, title)` conversation or creates it. Gives
    /// each external channel a stable, single thread per user.
    async fn get_or_create_conversation(
        &self,
        user_id: Uuid,
        title: &str,
    ) -> PortResult<Conversation>;

    /// Fetches a conversation, verifying ownership. A conversation belonging
    /// to another user is reported as `NotFound`.
    async fn get_owned_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> PortResult<Conversation>;

    /// Active conversations for a user, most recently updated first.
    async fn list_conversations(&self, user_id: Uuid) -> PortResult<Vec<Conversation>>;

    async fn deactivate_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> PortResult<()>;

    /// Pure append; also advances the conversation's `updated_at`.
    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
        model_used: Option<&str>,
    ) -> PortResult<Message>;

    /// The most recent `limit` messages, returned oldest-first. The cap is a
    /// cost bound: older turns are silently dropped.
    async fn recent_messages(&self, conversation_id: Uuid, limit: i64)
        -> PortResult<Vec<Message>>;

    /// Full message history, oldest-first.
    async fn conversation_messages(&self, conversation_id: Uuid) -> PortResult<Vec<Message>>;

    // --- Identity Links ---
    /// Deletes any existing link row for the user and inserts a fresh unbound
    /// one carrying `token`. Guarantees at most one token path per user.
    async fn replace_link(&self, user_id: Uuid, token: &str) -> PortResult<IdentityLink>;

    async fn find_link_by_token(&self, token: &str) -> PortResult<Option<IdentityLink>>;

    async fn find_link_by_user(&self, user_id: Uuid) -> PortResult<Option<IdentityLink>>;

    async fn find_active_link_by_chat(&self, chat_id: &str) -> PortResult<Option<IdentityLink>>;

    /// Activates a link and binds the external identity. `connected_at` is
    /// stamped on the first bind only; rebinding keeps the original value.
    /// `last_message_at` is always refreshed.
    async fn bind_link(
        &self,
        link_id: Uuid,
        chat_id: &str,
        username: &str,
    ) -> PortResult<IdentityLink>;

    async fn touch_link_activity(&self, link_id: Uuid) -> PortResult<()>;

    // --- Proactive Messages ---
    async fn queue_proactive(
        &self,
        user_id: Uuid,
        content: &str,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> PortResult<ProactiveMessage>;

    /// Up to `limit` pending messages whose owner has an active link, each
    /// paired with the bound chat id, oldest first.
    async fn pending_proactive(
        &self,
        limit: i64,
    ) -> PortResult<Vec<(ProactiveMessage, String)>>;

    async fn mark_proactive_sent(&self, id: Uuid) -> PortResult<()>;

    async fn mark_proactive_failed(&self, id: Uuid) -> PortResult<()>;
}

//=========================================================================================
// Completion Service Port
//=========================================================================================

/// A fully assembled request to the external completion service.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub turns: Vec<PromptTurn>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Single upstream call, no retry. Non-success responses surface as
    /// `PortError::Upstream` with the status code and body verbatim.
    async fn complete(&self, request: CompletionRequest) -> PortResult<String>;

    /// The upstream model catalog (id and display name only).
    async fn list_models(&self) -> PortResult<Vec<ModelInfo>>;
}

//=========================================================================================
// Channel Transport Port
//=========================================================================================

/// One inbound text event from the external messaging platform.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub update_id: i64,
    pub chat_id: String,
    pub username: Option<String>,
    pub text: String,
}

/// The result of one update fetch. Updates that carry no processable text
/// (photos, stickers) produce no event, but their ids still count toward
/// `last_update_id` so the caller's cursor moves past them.
#[derive(Debug, Clone, Default)]
pub struct UpdateBatch {
    pub events: Vec<InboundEvent>,
    /// Highest update id seen in the fetch, across all updates.
    pub last_update_id: Option<i64>,
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Fetches inbound updates after `offset`, in receipt order. Transport
    /// failures surface as `PortError::Transport`.
    async fn fetch_updates(&self, offset: i64) -> PortResult<UpdateBatch>;

    /// Sends a text message to an external chat.
    async fn send_text(&self, chat_id: &str, text: &str) -> PortResult<()>;

    /// Best-effort typing indicator; implementations swallow failures.
    async fn send_typing(&self, chat_id: &str);

    /// Verifies the transport credentials are usable.
    async fn health_check(&self) -> bool;
}
