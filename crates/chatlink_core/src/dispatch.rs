//! crates/chatlink_core/src/dispatch.rs
//!
//! The Dispatch Router: the single shared path that persists a user turn,
//! obtains the assistant's reply through the Completion Gateway, and persists
//! the tagged assistant turn. Both front-ends (direct API and Telegram)
//! funnel into `handle_turn`.
//!
//! Telegram command recognition is a pure parsing step, decoupled from the
//! side-effecting handlers so each branch is independently testable.

use std::sync::Arc;

use crate::domain::{Conversation, Message, Role, User};
use crate::gateway::CompletionGateway;
use crate::ports::{ChatStore, PortError, PortResult};

/// The closed set of inbound Telegram message shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// `/connect <token>`: consume a connection token.
    Connect(String),
    /// `/start`: request the connection instructions.
    Start,
    /// Anything else is a conversational turn.
    FreeText(String),
}

/// Classifies an inbound message text by literal-prefix matching.
pub fn parse_command(text: &str) -> BotCommand {
    let trimmed = text.trim();
    if let Some(token) = trimmed.strip_prefix("/connect ") {
        BotCommand::Connect(token.trim().to_string())
    } else if trimmed == "/start" {
        BotCommand::Start
    } else {
        BotCommand::FreeText(trimmed.to_string())
    }
}

/// Both persisted sides of one exchange.
#[derive(Debug, Clone)]
pub struct TurnExchange {
    pub user_message: Message,
    pub assistant_message: Message,
}

#[derive(Clone)]
pub struct DispatchRouter {
    store: Arc<dyn ChatStore>,
    gateway: CompletionGateway,
}

impl DispatchRouter {
    pub fn new(store: Arc<dyn ChatStore>, gateway: CompletionGateway) -> Self {
        Self { store, gateway }
    }

    /// Runs one conversational turn.
    ///
    /// The user turn is appended before the gateway call and is never rolled
    /// back: on gateway failure the error propagates with the user turn left
    /// in place and no assistant turn written.
    pub async fn handle_turn(
        &self,
        user: &User,
        conversation: &Conversation,
        text: &str,
    ) -> PortResult<TurnExchange> {
        if text.trim().is_empty() {
            return Err(PortError::InvalidInput("message text is required".into()));
        }

        let user_message = self
            .store
            .append_message(conversation.id, Role::User, text, None)
            .await?;

        let reply = self.gateway.complete(user, conversation, text).await?;

        let assistant_message = self
            .store
            .append_message(
                conversation.id,
                Role::Assistant,
                &reply,
                Some(&user.current_model),
            )
            .await?;

        Ok(TurnExchange {
            user_message,
            assistant_message,
        })
    }
}
