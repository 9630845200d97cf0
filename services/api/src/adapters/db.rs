//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `ChatStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chatlink_core::domain::{
    Conversation, DeliveryStatus, IdentityLink, Message, ProactiveMessage, Role, User,
    UserCredentials,
};
use chatlink_core::ports::{ChatStore, PortError, PortResult};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ChatStore` port.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn row_or_not_found(entity: &str, e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{entity} not found")),
        _ => unexpected(e),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    email: String,
    current_model: String,
    preferred_models: Json<Vec<String>>,
    life_context: Option<String>,
    telegram_chat_id: Option<String>,
    telegram_username: Option<String>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            email: self.email,
            current_model: self.current_model,
            preferred_models: self.preferred_models.0,
            life_context: self.life_context,
            telegram_chat_id: self.telegram_chat_id,
            telegram_username: self.telegram_username,
        }
    }
}

const USER_COLUMNS: &str = "id, email, current_model, preferred_models, life_context, \
                            telegram_chat_id, telegram_username";

#[derive(FromRow)]
struct CredentialsRecord {
    id: Uuid,
    email: String,
    hashed_password: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.id,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct ConversationRecord {
    id: Uuid,
    user_id: Uuid,
    title: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ConversationRecord {
    fn to_domain(self) -> Conversation {
        Conversation {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const CONVERSATION_COLUMNS: &str = "id, user_id, title, is_active, created_at, updated_at";

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    role: String,
    content: String,
    model_used: Option<String>,
    created_at: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> PortResult<Message> {
        let role = Role::parse(&self.role)
            .ok_or_else(|| PortError::Unexpected(format!("unknown message role '{}'", self.role)))?;
        Ok(Message {
            id: self.id,
            conversation_id: self.conversation_id,
            role,
            content: self.content,
            model_used: self.model_used,
            created_at: self.created_at,
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, model_used, created_at";

#[derive(FromRow)]
struct LinkRecord {
    id: Uuid,
    user_id: Uuid,
    connection_token: String,
    chat_id: Option<String>,
    username: Option<String>,
    is_active: bool,
    connected_at: Option<DateTime<Utc>>,
    last_message_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}
impl LinkRecord {
    fn to_domain(self) -> IdentityLink {
        IdentityLink {
            id: self.id,
            user_id: self.user_id,
            connection_token: self.connection_token,
            chat_id: self.chat_id,
            username: self.username,
            is_active: self.is_active,
            connected_at: self.connected_at,
            last_message_at: self.last_message_at,
            created_at: self.created_at,
        }
    }
}

const LINK_COLUMNS: &str = "id, user_id, connection_token, chat_id, username, is_active, \
                            connected_at, last_message_at, created_at";

#[derive(FromRow)]
struct ProactiveRecord {
    id: Uuid,
    user_id: Uuid,
    content: String,
    status: String,
    scheduled_for: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}
impl ProactiveRecord {
    fn to_domain(self) -> PortResult<ProactiveMessage> {
        let status = DeliveryStatus::parse(&self.status).ok_or_else(|| {
            PortError::Unexpected(format!("unknown delivery status '{}'", self.status))
        })?;
        Ok(ProactiveMessage {
            id: self.id,
            user_id: self.user_id,
            content: self.content,
            status,
            scheduled_for: self.scheduled_for,
            sent_at: self.sent_at,
            created_at: self.created_at,
        })
    }
}

const PROACTIVE_COLUMNS: &str = "id, user_id, content, status, scheduled_for, sent_at, created_at";

/// A pending proactive row joined with the bound chat id of its user's
/// active link.
#[derive(FromRow)]
struct PendingDeliveryRecord {
    id: Uuid,
    user_id: Uuid,
    content: String,
    status: String,
    scheduled_for: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    chat_id: String,
}

//=========================================================================================
// `ChatStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatStore for PgStore {
    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| row_or_not_found("User", e))?;
        Ok(record.to_domain())
    }

    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        default_model: &str,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "INSERT INTO users (id, email, hashed_password, current_model) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(hashed_password)
        .bind(default_model)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| row_or_not_found("User", e))?;
        Ok(record.to_domain())
    }

    async fn set_current_model(&self, user_id: Uuid, model: &str) -> PortResult<()> {
        sqlx::query("UPDATE users SET current_model = $1, updated_at = now() WHERE id = $2")
            .bind(model)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn set_life_context(&self, user_id: Uuid, context: Option<&str>) -> PortResult<()> {
        sqlx::query("UPDATE users SET life_context = $1, updated_at = now() WHERE id = $2")
            .bind(context)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn set_preferred_models(&self, user_id: Uuid, models: &[String]) -> PortResult<()> {
        sqlx::query("UPDATE users SET preferred_models = $1, updated_at = now() WHERE id = $2")
            .bind(Json(models.to_vec()))
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn set_telegram_identity(
        &self,
        user_id: Uuid,
        chat_id: &str,
        username: &str,
    ) -> PortResult<()> {
        sqlx::query(
            "UPDATE users SET telegram_chat_id = $1, telegram_username = $2, updated_at = now() \
             WHERE id = $3",
        )
        .bind(chat_id)
        .bind(username)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let row: (Uuid,) = sqlx::query_as(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| row_or_not_found("Session", e))?;
        Ok(row.0)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn create_conversation(&self, user_id: Uuid, title: &str) -> PortResult<Conversation> {
        let record = sqlx::query_as::<_, ConversationRecord>(&format!(
            "INSERT INTO conversations (id, user_id, title) VALUES ($1, $2, $3) \
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_or_create_conversation(
        &self,
        user_id: Uuid,
        title: &str,
    ) -> PortResult<Conversation> {
        let existing = sqlx::query_as::<_, ConversationRecord>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE user_id = $1 AND title = $2 \
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(user_id)
        .bind(title)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match existing {
            Some(record) => Ok(record.to_domain()),
            None => self.create_conversation(user_id, title).await,
        }
    }

    async fn get_owned_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> PortResult<Conversation> {
        // Ownership is part of the lookup: a foreign conversation is
        // indistinguishable from a missing one.
        let record = sqlx::query_as::<_, ConversationRecord>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1 AND user_id = $2"
        ))
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| row_or_not_found("Conversation", e))?;
        Ok(record.to_domain())
    }

    async fn list_conversations(&self, user_id: Uuid) -> PortResult<Vec<Conversation>> {
        let records = sqlx::query_as::<_, ConversationRecord>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE user_id = $1 AND is_active ORDER BY updated_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn deactivate_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE conversations SET is_active = FALSE, updated_at = now() \
             WHERE id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound("Conversation not found".to_string()));
        }
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
        model_used: Option<&str>,
    ) -> PortResult<Message> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "INSERT INTO messages (id, conversation_id, role, content, model_used) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(model_used)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> PortResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        // Fetched newest-first for the LIMIT; callers want oldest-first.
        records
            .into_iter()
            .rev()
            .map(|r| r.to_domain())
            .collect()
    }

    async fn conversation_messages(&self, conversation_id: Uuid) -> PortResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at ASC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn replace_link(&self, user_id: Uuid, token: &str) -> PortResult<IdentityLink> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query("DELETE FROM telegram_links WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        let record = sqlx::query_as::<_, LinkRecord>(&format!(
            "INSERT INTO telegram_links (id, user_id, connection_token) VALUES ($1, $2, $3) \
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn find_link_by_token(&self, token: &str) -> PortResult<Option<IdentityLink>> {
        let record = sqlx::query_as::<_, LinkRecord>(&format!(
            "SELECT {LINK_COLUMNS} FROM telegram_links WHERE connection_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn find_link_by_user(&self, user_id: Uuid) -> PortResult<Option<IdentityLink>> {
        let record = sqlx::query_as::<_, LinkRecord>(&format!(
            "SELECT {LINK_COLUMNS} FROM telegram_links WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn find_active_link_by_chat(&self, chat_id: &str) -> PortResult<Option<IdentityLink>> {
        let record = sqlx::query_as::<_, LinkRecord>(&format!(
            "SELECT {LINK_COLUMNS} FROM telegram_links WHERE chat_id = $1 AND is_active"
        ))
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn bind_link(
        &self,
        link_id: Uuid,
        chat_id: &str,
        username: &str,
    ) -> PortResult<IdentityLink> {
        // connected_at is stamped on first bind only; rebinding keeps it.
        let record = sqlx::query_as::<_, LinkRecord>(&format!(
            "UPDATE telegram_links SET chat_id = $2, username = $3, is_active = TRUE, \
             connected_at = COALESCE(connected_at, now()), last_message_at = now() \
             WHERE id = $1 RETURNING {LINK_COLUMNS}"
        ))
        .bind(link_id)
        .bind(chat_id)
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| row_or_not_found("Link", e))?;
        Ok(record.to_domain())
    }

    async fn touch_link_activity(&self, link_id: Uuid) -> PortResult<()> {
        sqlx::query("UPDATE telegram_links SET last_message_at = now() WHERE id = $1")
            .bind(link_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn queue_proactive(
        &self,
        user_id: Uuid,
        content: &str,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> PortResult<ProactiveMessage> {
        let record = sqlx::query_as::<_, ProactiveRecord>(&format!(
            "INSERT INTO proactive_messages (id, user_id, content, scheduled_for) \
             VALUES ($1, $2, $3, $4) RETURNING {PROACTIVE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(content)
        .bind(scheduled_for)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn pending_proactive(
        &self,
        limit: i64,
    ) -> PortResult<Vec<(ProactiveMessage, String)>> {
        let records = sqlx::query_as::<_, PendingDeliveryRecord>(
            "SELECT p.id, p.user_id, p.content, p.status, p.scheduled_for, p.sent_at, \
                    p.created_at, l.chat_id \
             FROM proactive_messages p \
             JOIN telegram_links l ON l.user_id = p.user_id \
             WHERE p.status = 'pending' AND l.is_active AND l.chat_id IS NOT NULL \
             ORDER BY p.created_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records
            .into_iter()
            .map(|r| {
                let chat_id = r.chat_id.clone();
                let record = ProactiveRecord {
                    id: r.id,
                    user_id: r.user_id,
                    content: r.content,
                    status: r.status,
                    scheduled_for: r.scheduled_for,
                    sent_at: r.sent_at,
                    created_at: r.created_at,
                };
                record.to_domain().map(|m| (m, chat_id))
            })
            .collect()
    }

    async fn mark_proactive_sent(&self, id: Uuid) -> PortResult<()> {
        sqlx::query("UPDATE proactive_messages SET status = 'sent', sent_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn mark_proactive_failed(&self, id: Uuid) -> PortResult<()> {
        sqlx::query("UPDATE proactive_messages SET status = 'failed' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
