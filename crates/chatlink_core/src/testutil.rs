//! crates/chatlink_core/src/testutil.rs
//!
//! In-memory implementations of the ports, shared by the unit tests across
//! the core modules. Compiled only for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Conversation, DeliveryStatus, IdentityLink, Message, ModelInfo, ProactiveMessage, Role, User,
    UserCredentials,
};
use crate::ports::{
    ChannelTransport, ChatStore, CompletionRequest, CompletionService, InboundEvent, PortError,
    PortResult, UpdateBatch,
};

//=========================================================================================
// In-Memory Store
//=========================================================================================

#[derive(Default)]
struct StoreState {
    users: HashMap<Uuid, User>,
    credentials: HashMap<String, UserCredentials>,
    sessions: HashMap<String, (Uuid, DateTime<Utc>)>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    links: Vec<IdentityLink>,
    proactive: Vec<ProactiveMessage>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: inserts a user with defaults and returns it.
    pub fn add_user(&self, email: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            current_model: "anthropic/claude-3.5-sonnet".to_string(),
            preferred_models: Vec::new(),
            life_context: None,
            telegram_chat_id: None,
            telegram_username: None,
        };
        let mut state = self.state.lock().unwrap();
        state.users.insert(user.id, user.clone());
        user
    }

    pub fn link_count_for(&self, user_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .links
            .iter()
            .filter(|l| l.user_id == user_id)
            .count()
    }

    pub fn conversation_count(&self) -> usize {
        self.state.lock().unwrap().conversations.len()
    }

    pub fn proactive_by_id(&self, id: Uuid) -> Option<ProactiveMessage> {
        self.state
            .lock()
            .unwrap()
            .proactive
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        self.state
            .lock()
            .unwrap()
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {user_id} not found")))
    }

    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        default_model: &str,
    ) -> PortResult<User> {
        let mut user = self.add_user(email);
        user.current_model = default_model.to_string();
        self.state
            .lock()
            .unwrap()
            .users
            .insert(user.id, user.clone());
        self.state.lock().unwrap().credentials.insert(
            email.to_string(),
            UserCredentials {
                user_id: user.id,
                email: email.to_string(),
                hashed_password: hashed_password.to_string(),
            },
        );
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.state
            .lock()
            .unwrap()
            .credentials
            .get(email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {email} not found")))
    }

    async fn set_current_model(&self, user_id: Uuid, model: &str) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {user_id} not found")))?;
        user.current_model = model.to_string();
        Ok(())
    }

    async fn set_life_context(&self, user_id: Uuid, context: Option<&str>) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {user_id} not found")))?;
        user.life_context = context.map(str::to_string);
        Ok(())
    }

    async fn set_preferred_models(&self, user_id: Uuid, models: &[String]) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {user_id} not found")))?;
        user.preferred_models = models.to_vec();
        Ok(())
    }

    async fn set_telegram_identity(
        &self,
        user_id: Uuid,
        chat_id: &str,
        username: &str,
    ) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {user_id} not found")))?;
        user.telegram_chat_id = Some(chat_id.to_string());
        user.telegram_username = Some(username.to_string());
        Ok(())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let state = self.state.lock().unwrap();
        match state.sessions.get(session_id) {
            Some((user_id, expires_at)) if *expires_at > Utc::now() => Ok(*user_id),
            _ => Err(PortError::NotFound("session not found".to_string())),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.state.lock().unwrap().sessions.remove(session_id);
        Ok(())
    }

    async fn create_conversation(&self, user_id: Uuid, title: &str) -> PortResult<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.state
            .lock()
            .unwrap()
            .conversations
            .push(conversation.clone());
        Ok(conversation)
    }

    async fn get_or_create_conversation(
        &self,
        user_id: Uuid,
        title: &str,
    ) -> PortResult<Conversation> {
        let existing = self
            .state
            .lock()
            .unwrap()
            .conversations
            .iter()
            .find(|c| c.user_id == user_id && c.title == title)
            .cloned();
        match existing {
            Some(conversation) => Ok(conversation),
            None => self.create_conversation(user_id, title).await,
        }
    }

    async fn get_owned_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> PortResult<Conversation> {
        self.state
            .lock()
            .unwrap()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id && c.user_id == user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Conversation {conversation_id} not found")))
    }

    async fn list_conversations(&self, user_id: Uuid) -> PortResult<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .state
            .lock()
            .unwrap()
            .conversations
            .iter()
            .filter(|c| c.user_id == user_id && c.is_active)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn deactivate_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id && c.user_id == user_id)
            .ok_or_else(|| {
                PortError::NotFound(format!("Conversation {conversation_id} not found"))
            })?;
        conversation.is_active = false;
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
        model_used: Option<&str>,
    ) -> PortResult<Message> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| {
                PortError::NotFound(format!("Conversation {conversation_id} not found"))
            })?;
        conversation.updated_at = now;

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            content: content.to_string(),
            model_used: model_used.map(str::to_string),
            created_at: now,
        };
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> PortResult<Vec<Message>> {
        let messages: Vec<Message> = self
            .state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        let skip = messages.len().saturating_sub(limit as usize);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn conversation_messages(&self, conversation_id: Uuid) -> PortResult<Vec<Message>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn replace_link(&self, user_id: Uuid, token: &str) -> PortResult<IdentityLink> {
        let mut state = self.state.lock().unwrap();
        state.links.retain(|l| l.user_id != user_id);
        let link = IdentityLink {
            id: Uuid::new_v4(),
            user_id,
            connection_token: token.to_string(),
            chat_id: None,
            username: None,
            is_active: false,
            connected_at: None,
            last_message_at: None,
            created_at: Utc::now(),
        };
        state.links.push(link.clone());
        Ok(link)
    }

    async fn find_link_by_token(&self, token: &str) -> PortResult<Option<IdentityLink>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .links
            .iter()
            .find(|l| l.connection_token == token)
            .cloned())
    }

    async fn find_link_by_user(&self, user_id: Uuid) -> PortResult<Option<IdentityLink>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .links
            .iter()
            .find(|l| l.user_id == user_id)
            .cloned())
    }

    async fn find_active_link_by_chat(&self, chat_id: &str) -> PortResult<Option<IdentityLink>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .links
            .iter()
            .find(|l| l.is_active && l.chat_id.as_deref() == Some(chat_id))
            .cloned())
    }

    async fn bind_link(
        &self,
        link_id: Uuid,
        chat_id: &str,
        username: &str,
    ) -> PortResult<IdentityLink> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let link = state
            .links
            .iter_mut()
            .find(|l| l.id == link_id)
            .ok_or_else(|| PortError::NotFound(format!("Link {link_id} not found")))?;
        link.chat_id = Some(chat_id.to_string());
        link.username = Some(username.to_string());
        link.is_active = true;
        link.connected_at = link.connected_at.or(Some(now));
        link.last_message_at = Some(now);
        Ok(link.clone())
    }

    async fn touch_link_activity(&self, link_id: Uuid) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let link = state
            .links
            .iter_mut()
            .find(|l| l.id == link_id)
            .ok_or_else(|| PortError::NotFound(format!("Link {link_id} not found")))?;
        link.last_message_at = Some(Utc::now());
        Ok(())
    }

    async fn queue_proactive(
        &self,
        user_id: Uuid,
        content: &str,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> PortResult<ProactiveMessage> {
        let message = ProactiveMessage {
            id: Uuid::new_v4(),
            user_id,
            content: content.to_string(),
            status: DeliveryStatus::Pending,
            scheduled_for,
            sent_at: None,
            created_at: Utc::now(),
        };
        self.state.lock().unwrap().proactive.push(message.clone());
        Ok(message)
    }

    async fn pending_proactive(
        &self,
        limit: i64,
    ) -> PortResult<Vec<(ProactiveMessage, String)>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .proactive
            .iter()
            .filter(|m| m.status == DeliveryStatus::Pending)
            .filter_map(|m| {
                state
                    .links
                    .iter()
                    .find(|l| l.user_id == m.user_id && l.is_active)
                    .and_then(|l| l.chat_id.clone())
                    .map(|chat_id| (m.clone(), chat_id))
            })
            .take(limit as usize)
            .collect())
    }

    async fn mark_proactive_sent(&self, id: Uuid) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let message = state
            .proactive
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| PortError::NotFound(format!("Proactive message {id} not found")))?;
        message.status = DeliveryStatus::Sent;
        message.sent_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_proactive_failed(&self, id: Uuid) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let message = state
            .proactive
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| PortError::NotFound(format!("Proactive message {id} not found")))?;
        message.status = DeliveryStatus::Failed;
        Ok(())
    }
}

//=========================================================================================
// Mock Completion Service
//=========================================================================================

enum MockOutcome {
    Reply(String),
    Fail { status: u16, body: String },
}

pub struct MockCompletion {
    outcome: MockOutcome,
    last: Mutex<Option<CompletionRequest>>,
}

impl MockCompletion {
    pub fn replying(text: &str) -> Self {
        Self {
            outcome: MockOutcome::Reply(text.to_string()),
            last: Mutex::new(None),
        }
    }

    pub fn failing(status: u16, body: &str) -> Self {
        Self {
            outcome: MockOutcome::Fail {
                status,
                body: body.to_string(),
            },
            last: Mutex::new(None),
        }
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn complete(&self, request: CompletionRequest) -> PortResult<String> {
        *self.last.lock().unwrap() = Some(request);
        match &self.outcome {
            MockOutcome::Reply(text) => Ok(text.clone()),
            MockOutcome::Fail { status, body } => Err(PortError::Upstream {
                status: *status,
                body: body.clone(),
            }),
        }
    }

    async fn list_models(&self) -> PortResult<Vec<ModelInfo>> {
        Ok(Vec::new())
    }
}

//=========================================================================================
// Mock Channel Transport
//=========================================================================================

#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(String, String)>>,
    queued: Mutex<VecDeque<UpdateBatch>>,
    failing_chats: Mutex<HashSet<String>>,
    fail_fetch: Mutex<bool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn queue_updates(&self, updates: Vec<InboundEvent>) {
        let last_update_id = updates.iter().map(|e| e.update_id).max();
        self.queue_batch(UpdateBatch {
            events: updates,
            last_update_id,
        });
    }

    /// Queues a batch as-is, so tests can model updates that carried no
    /// text event (`last_update_id` beyond the last event's id).
    pub fn queue_batch(&self, batch: UpdateBatch) {
        self.queued.lock().unwrap().push_back(batch);
    }

    pub fn fail_next_fetch(&self) {
        *self.fail_fetch.lock().unwrap() = true;
    }

    pub fn fail_chat(&self, chat_id: &str) {
        self.failing_chats
            .lock()
            .unwrap()
            .insert(chat_id.to_string());
    }

    pub fn heal_chat(&self, chat_id: &str) {
        self.failing_chats.lock().unwrap().remove(chat_id);
    }
}

#[async_trait]
impl ChannelTransport for MockTransport {
    async fn fetch_updates(&self, _offset: i64) -> PortResult<UpdateBatch> {
        let mut fail = self.fail_fetch.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(PortError::Transport("fetch failed".to_string()));
        }
        Ok(self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> PortResult<()> {
        if self.failing_chats.lock().unwrap().contains(chat_id) {
            return Err(PortError::Transport(format!("send to {chat_id} failed")));
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_typing(&self, _chat_id: &str) {}

    async fn health_check(&self) -> bool {
        true
    }
}
