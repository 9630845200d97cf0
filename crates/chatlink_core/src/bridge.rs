//! crates/chatlink_core/src/bridge.rs
//!
//! The Telegram bridge: sequential, single-threaded processing of inbound
//! channel updates. The update cursor (offset) is explicit state threaded
//! through `poll_cycle`, never a process-wide variable, so the loop is unit
//! testable and restartable from persisted state.
//!
//! An update's offset is only advanced after its handler ran, giving
//! at-least-once semantics across restarts; handlers are safe to run twice
//! (a duplicate update produces a duplicate logged turn, not a crash).

use std::sync::Arc;

use crate::dispatch::{parse_command, BotCommand, DispatchRouter};
use crate::link::LinkRegistry;
use crate::ports::{ChannelTransport, ChatStore, InboundEvent, PortError, PortResult};

/// Title of the single per-user conversation thread backing the Telegram
/// channel. Every Telegram turn for a user lands in this one thread.
pub const TELEGRAM_THREAD_TITLE: &str = "Telegram Chat";

const START_MESSAGE: &str = "Welcome! To connect your Telegram to the app:\n\n\
1. Log in to the app\n\
2. Open the dashboard and click \"Connect Telegram\"\n\
3. Copy the token and send me the command:\n\
   /connect <your-token>\n\n\
Once connected you can chat here and receive proactive notifications.";

const CONNECTED_MESSAGE: &str = "Connection successful!\n\n\
Your Telegram is now linked to your account. You can chat here and you will \
receive proactive messages based on your saved context.";

const TOKEN_INVALID_MESSAGE: &str =
    "Invalid or expired token. Generate a new token in the app and try again.";

const APOLOGY_MESSAGE: &str =
    "Sorry, something went wrong while processing your message. Please try again.";

fn not_connected_message(chat_id: &str) -> String {
    format!(
        "Your Chat ID: {chat_id}\n\n\
         This Telegram account is not connected to the app yet. \
         Send /start for instructions."
    )
}

pub struct TelegramBridge {
    store: Arc<dyn ChatStore>,
    registry: LinkRegistry,
    router: DispatchRouter,
    transport: Arc<dyn ChannelTransport>,
}

impl TelegramBridge {
    pub fn new(
        store: Arc<dyn ChatStore>,
        registry: LinkRegistry,
        router: DispatchRouter,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        Self {
            store,
            registry,
            router,
            transport,
        }
    }

    /// Fetches and processes one batch of updates, returning the advanced
    /// offset. Every failure is contained here: a bad update or a transport
    /// hiccup logs and moves on, it never kills the loop.
    pub async fn poll_cycle(&self, offset: i64) -> i64 {
        let batch = match self.transport.fetch_updates(offset).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!("failed to fetch channel updates: {e}");
                return offset;
            }
        };

        let mut next = offset;
        for event in batch.events {
            if let Err(e) = self.process_update(&event).await {
                tracing::error!(chat_id = %event.chat_id, "failed to handle update: {e}");
                if let Err(send_err) = self
                    .transport
                    .send_text(&event.chat_id, APOLOGY_MESSAGE)
                    .await
                {
                    tracing::warn!("failed to send apology: {send_err}");
                }
            }
            // Consumed: advance past this update.
            next = next.max(event.update_id + 1);
        }
        // Updates that produced no event (photos, stickers) are consumed too,
        // otherwise a trailing textless update would be re-fetched forever.
        if let Some(last) = batch.last_update_id {
            next = next.max(last + 1);
        }
        next
    }

    /// Dispatches a single inbound event on its parsed command.
    pub async fn process_update(&self, event: &InboundEvent) -> PortResult<()> {
        let username = event.username.as_deref().unwrap_or("unknown");

        match parse_command(&event.text) {
            BotCommand::Connect(token) => {
                self.handle_connect(&token, &event.chat_id, username).await
            }
            BotCommand::Start => self.transport.send_text(&event.chat_id, START_MESSAGE).await,
            BotCommand::FreeText(text) => {
                self.handle_free_text(&event.chat_id, username, &text).await
            }
        }
    }

    async fn handle_connect(&self, token: &str, chat_id: &str, username: &str) -> PortResult<()> {
        match self.registry.bind_token(token, chat_id, username).await {
            Ok(_) => self.transport.send_text(chat_id, CONNECTED_MESSAGE).await,
            Err(PortError::TokenNotFound) => {
                // User error, not a system failure.
                tracing::info!(chat_id, "connect attempt with unknown token");
                self.transport.send_text(chat_id, TOKEN_INVALID_MESSAGE).await
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_free_text(&self, chat_id: &str, _username: &str, text: &str) -> PortResult<()> {
        let Some(user) = self.registry.resolve_by_chat_id(chat_id).await? else {
            return self
                .transport
                .send_text(chat_id, &not_connected_message(chat_id))
                .await;
        };

        self.transport.send_typing(chat_id).await;

        let conversation = self
            .store
            .get_or_create_conversation(user.id, TELEGRAM_THREAD_TITLE)
            .await?;

        match self.router.handle_turn(&user, &conversation, text).await {
            Ok(exchange) => {
                self.transport
                    .send_text(chat_id, &exchange.assistant_message.content)
                    .await
            }
            Err(e) => {
                // The user turn stays persisted; the reply becomes an apology.
                tracing::warn!(user_id = %user.id, "turn failed on telegram path: {e}");
                self.transport.send_text(chat_id, APOLOGY_MESSAGE).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::CompletionGateway;
    use crate::testutil::{InMemoryStore, MockCompletion, MockTransport};

    fn bridge(
        store: &Arc<InMemoryStore>,
        completion: &Arc<MockCompletion>,
        transport: &Arc<MockTransport>,
    ) -> TelegramBridge {
        let store: Arc<dyn ChatStore> = store.clone();
        let gateway = CompletionGateway::new(store.clone(), completion.clone());
        TelegramBridge::new(
            store.clone(),
            LinkRegistry::new(store.clone()),
            DispatchRouter::new(store, gateway),
            transport.clone(),
        )
    }

    fn event(update_id: i64, chat_id: &str, text: &str) -> InboundEvent {
        InboundEvent {
            update_id,
            chat_id: chat_id.to_string(),
            username: Some("alice".to_string()),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn unresolved_chat_gets_not_connected_reply_and_no_conversation() {
        let store = Arc::new(InMemoryStore::new());
        let completion = Arc::new(MockCompletion::replying("unused"));
        let transport = Arc::new(MockTransport::new());
        let bridge = bridge(&store, &completion, &transport);

        bridge
            .process_update(&event(1, "999", "hello?"))
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "999");
        assert!(sent[0].1.contains("999"));
        assert!(sent[0].1.contains("not connected"));
        assert_eq!(store.conversation_count(), 0);
    }

    #[tokio::test]
    async fn connect_command_binds_and_confirms() {
        let store = Arc::new(InMemoryStore::new());
        let completion = Arc::new(MockCompletion::replying("unused"));
        let transport = Arc::new(MockTransport::new());
        let user = store.add_user("a@example.com");
        let bridge = bridge(&store, &completion, &transport);

        let issued = LinkRegistry::new(store.clone() as Arc<dyn ChatStore>)
            .issue_token(user.id)
            .await
            .unwrap();

        bridge
            .process_update(&event(1, "42", &format!("/connect {}", issued.token)))
            .await
            .unwrap();

        let sent = transport.sent();
        assert!(sent[0].1.contains("Connection successful"));

        let refreshed = store.get_user(user.id).await.unwrap();
        assert_eq!(refreshed.telegram_chat_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn connect_with_unknown_token_replies_invalid() {
        let store = Arc::new(InMemoryStore::new());
        let completion = Arc::new(MockCompletion::replying("unused"));
        let transport = Arc::new(MockTransport::new());
        let bridge = bridge(&store, &completion, &transport);

        bridge
            .process_update(&event(1, "42", "/connect deadbeef"))
            .await
            .unwrap();

        assert!(transport.sent()[0].1.contains("Invalid or expired token"));
    }

    #[tokio::test]
    async fn start_command_sends_instructions() {
        let store = Arc::new(InMemoryStore::new());
        let completion = Arc::new(MockCompletion::replying("unused"));
        let transport = Arc::new(MockTransport::new());
        let bridge = bridge(&store, &completion, &transport);

        bridge.process_update(&event(1, "42", "/start")).await.unwrap();

        assert!(transport.sent()[0].1.contains("/connect"));
    }

    #[tokio::test]
    async fn free_text_from_linked_user_lands_in_single_telegram_thread() {
        let store = Arc::new(InMemoryStore::new());
        let completion = Arc::new(MockCompletion::replying("Hi there"));
        let transport = Arc::new(MockTransport::new());
        let user = store.add_user("a@example.com");
        let bridge = bridge(&store, &completion, &transport);

        let registry = LinkRegistry::new(store.clone() as Arc<dyn ChatStore>);
        let issued = registry.issue_token(user.id).await.unwrap();
        registry.bind_token(&issued.token, "42", "alice").await.unwrap();

        bridge.process_update(&event(1, "42", "Hello")).await.unwrap();
        bridge.process_update(&event(2, "42", "Again")).await.unwrap();

        // Both turns share the one channel thread.
        assert_eq!(store.conversation_count(), 1);
        let conversation = store
            .get_or_create_conversation(user.id, TELEGRAM_THREAD_TITLE)
            .await
            .unwrap();
        let messages = store.conversation_messages(conversation.id).await.unwrap();
        assert_eq!(messages.len(), 4);

        let sent = transport.sent();
        assert_eq!(sent.last().unwrap().1, "Hi there");
    }

    #[tokio::test]
    async fn gateway_failure_on_telegram_path_sends_apology() {
        let store = Arc::new(InMemoryStore::new());
        let completion = Arc::new(MockCompletion::failing(503, "down"));
        let transport = Arc::new(MockTransport::new());
        let user = store.add_user("a@example.com");
        let bridge = bridge(&store, &completion, &transport);

        let registry = LinkRegistry::new(store.clone() as Arc<dyn ChatStore>);
        let issued = registry.issue_token(user.id).await.unwrap();
        registry.bind_token(&issued.token, "42", "alice").await.unwrap();

        bridge.process_update(&event(1, "42", "Hello")).await.unwrap();

        assert!(transport.sent().last().unwrap().1.contains("Sorry"));

        // The user turn is persisted alone.
        let conversation = store
            .get_or_create_conversation(user.id, TELEGRAM_THREAD_TITLE)
            .await
            .unwrap();
        let messages = store.conversation_messages(conversation.id).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn poll_cycle_threads_offset_past_processed_updates() {
        let store = Arc::new(InMemoryStore::new());
        let completion = Arc::new(MockCompletion::replying("unused"));
        let transport = Arc::new(MockTransport::new());
        transport.queue_updates(vec![
            event(7, "999", "hi"),
            event(9, "998", "/start"),
        ]);
        let bridge = bridge(&store, &completion, &transport);

        let next = bridge.poll_cycle(5).await;
        assert_eq!(next, 10);

        // An empty poll leaves the cursor unchanged.
        let unchanged = bridge.poll_cycle(next).await;
        assert_eq!(unchanged, 10);
    }

    #[tokio::test]
    async fn textless_updates_are_consumed_by_the_cursor() {
        let store = Arc::new(InMemoryStore::new());
        let completion = Arc::new(MockCompletion::replying("unused"));
        let transport = Arc::new(MockTransport::new());
        // A batch ending in updates that produced no text event (photo,
        // sticker): update 100 is the highest id fetched.
        transport.queue_batch(crate::ports::UpdateBatch {
            events: vec![event(98, "999", "hi")],
            last_update_id: Some(100),
        });
        let bridge = bridge(&store, &completion, &transport);

        let next = bridge.poll_cycle(98).await;
        assert_eq!(next, 101);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_offset_and_loop_alive() {
        let store = Arc::new(InMemoryStore::new());
        let completion = Arc::new(MockCompletion::replying("unused"));
        let transport = Arc::new(MockTransport::new());
        transport.fail_next_fetch();
        let bridge = bridge(&store, &completion, &transport);

        assert_eq!(bridge.poll_cycle(12).await, 12);
    }
}
