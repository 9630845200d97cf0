//! crates/chatlink_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The author of a message. Closed enumeration: no other roles are permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Parses the wire/storage representation. Returns `None` for anything
    /// outside the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

// Represents a user - used throughout the app. The telegram_* fields are a
// denormalized cache maintained exclusively by the Identity Link Registry;
// the link row is the source of truth.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub current_model: String,
    pub preferred_models: Vec<String>,
    pub life_context: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_username: Option<String>,
}

// Only used internally for login/signup - contains sensitive data.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

/// An ordered thread of messages owned by one user.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One immutable turn in a conversation. Append-only: messages are never
/// edited or reordered after creation.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub model_used: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The binding between an internal account and an external Telegram chat,
/// established through a single-use connection token.
#[derive(Debug, Clone)]
pub struct IdentityLink {
    pub id: Uuid,
    pub user_id: Uuid,
    pub connection_token: String,
    pub chat_id: Option<String>,
    pub username: Option<String>,
    pub is_active: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Read-only projection of a user's connection state. A user with no link
/// record gets the all-null/false shape rather than an error.
#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    pub connected: bool,
    pub username: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Delivery state of a proactive message. `Pending` is the only non-terminal
/// state; there is no automatic retry of `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// A system-initiated outbound message, queued for delivery through the
/// channel transport.
#[derive(Debug, Clone)]
pub struct ProactiveMessage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub status: DeliveryStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// An entry in the upstream model catalog.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

/// One turn of an assembled model prompt.
#[derive(Debug, Clone)]
pub struct PromptTurn {
    pub role: Role,
    pub content: String,
}
