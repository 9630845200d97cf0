//! crates/chatlink_core/src/gateway.rs
//!
//! The Completion Gateway: assembles a bounded context window from the
//! conversation history plus the user's configuration and performs a single
//! call to the external completion service. Fail fast: no retries; upstream
//! failures surface verbatim to the caller.

use std::sync::Arc;

use crate::domain::{Conversation, Message, PromptTurn, Role, User};
use crate::ports::{ChatStore, CompletionRequest, CompletionService, PortResult};

/// How many recent history turns are included in the model context.
pub const HISTORY_WINDOW: i64 = 10;

/// Hard cap on the model's output length.
pub const MAX_COMPLETION_TOKENS: u32 = 1000;

/// Fixed sampling temperature for all completions.
pub const SAMPLING_TEMPERATURE: f32 = 0.7;

const BASE_INSTRUCTIONS: &str =
    "You are a helpful AI assistant. Be concise, factual and friendly.";

/// Builds the ordered prompt: one system turn (base instructions plus the
/// user's life context, verbatim, as an appended paragraph), the capped
/// history in chronological order with original roles, then the new user
/// turn. Pure function, exercised directly by tests.
pub fn build_prompt(user: &User, history: &[Message], new_text: &str) -> Vec<PromptTurn> {
    let mut turns = Vec::with_capacity(history.len() + 2);

    let mut system = BASE_INSTRUCTIONS.to_string();
    if let Some(context) = user.life_context.as_deref() {
        if !context.is_empty() {
            system.push_str("\n\nUser context: ");
            system.push_str(context);
        }
    }
    turns.push(PromptTurn {
        role: Role::System,
        content: system,
    });

    for message in history {
        turns.push(PromptTurn {
            role: message.role,
            content: message.content.clone(),
        });
    }

    turns.push(PromptTurn {
        role: Role::User,
        content: new_text.to_string(),
    });

    turns
}

#[derive(Clone)]
pub struct CompletionGateway {
    store: Arc<dyn ChatStore>,
    completion: Arc<dyn CompletionService>,
}

impl CompletionGateway {
    pub fn new(store: Arc<dyn ChatStore>, completion: Arc<dyn CompletionService>) -> Self {
        Self { store, completion }
    }

    /// Produces the assistant's reply for `new_text` in `conversation`.
    ///
    /// The caller persists the user turn before invoking this, so the stored
    /// history may already end with a copy of `new_text`; that trailing copy
    /// is dropped from the window to avoid sending the turn twice.
    pub async fn complete(
        &self,
        user: &User,
        conversation: &Conversation,
        new_text: &str,
    ) -> PortResult<String> {
        let mut history = self
            .store
            .recent_messages(conversation.id, HISTORY_WINDOW)
            .await?;

        if history
            .last()
            .is_some_and(|m| m.role == Role::User && m.content == new_text)
        {
            history.pop();
        }

        let request = CompletionRequest {
            model: user.current_model.clone(),
            turns: build_prompt(user, &history, new_text),
            max_tokens: MAX_COMPLETION_TOKENS,
            temperature: SAMPLING_TEMPERATURE,
        };

        self.completion.complete(request).await
    }
}
