//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the conversation REST endpoints and the
//! master definition for the OpenAPI specification.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chatlink_core::domain::{Conversation, Message};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::web::state::AppState;
use crate::web::{auth, port_error_response, telegram, user};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_conversations_handler,
        create_conversation_handler,
        get_conversation_handler,
        delete_conversation_handler,
        post_message_handler,
        list_models_handler,
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        telegram::issue_token_handler,
        telegram::status_handler,
        user::get_model_handler,
        user::set_model_handler,
        user::get_context_handler,
        user::set_context_handler,
        user::get_preferred_models_handler,
        user::set_preferred_models_handler,
    ),
    components(
        schemas(
            ConversationDto,
            MessageDto,
            CreateConversationRequest,
            ConversationDetailResponse,
            PostMessageRequest,
            ExchangeResponse,
            ModelDto,
            auth::SignupRequest,
            auth::LoginRequest,
            auth::AuthResponse,
            telegram::IssueTokenResponse,
            telegram::StatusResponse,
            user::CurrentModel,
            user::LifeContext,
            user::PreferredModels,
        )
    ),
    tags(
        (name = "chatlink API", description = "Conversation, model and Telegram-link endpoints.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct ConversationDto {
    pub id: Uuid,
    pub title: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationDto {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            title: c.title,
            is_active: c.is_active,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct MessageDto {
    pub id: Uuid,
    pub role: String,
    pub content: String,
    pub model_used: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageDto {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            role: m.role.as_str().to_string(),
            content: m.content,
            model_used: m.model_used,
            created_at: m.created_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ConversationDetailResponse {
    pub conversation: ConversationDto,
    pub messages: Vec<MessageDto>,
}

#[derive(Deserialize, ToSchema)]
pub struct PostMessageRequest {
    pub message: String,
}

/// Both persisted sides of the exchange, returned to the caller.
#[derive(Serialize, ToSchema)]
pub struct ExchangeResponse {
    pub user_message: MessageDto,
    pub assistant_message: MessageDto,
}

#[derive(Serialize, ToSchema)]
pub struct ModelDto {
    pub id: String,
    pub name: String,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// List the authenticated user's active conversations, most recent first.
#[utoipa::path(
    get,
    path = "/conversations",
    responses(
        (status = 200, description = "Conversations for the authenticated user", body = [ConversationDto]),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let conversations = state.store.list_conversations(user_id).await.map_err(|e| {
        error!("Failed to list conversations: {:?}", e);
        port_error_response(&e)
    })?;

    let dtos: Vec<ConversationDto> = conversations.into_iter().map(Into::into).collect();
    Ok(Json(dtos))
}

/// Create a new conversation.
#[utoipa::path(
    post,
    path = "/conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = ConversationDto),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn create_conversation_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let title = req.title.unwrap_or_else(|| "New Conversation".to_string());
    let conversation = state
        .store
        .create_conversation(user_id, &title)
        .await
        .map_err(|e| {
            error!("Failed to create conversation: {:?}", e);
            port_error_response(&e)
        })?;

    Ok((StatusCode::CREATED, Json(ConversationDto::from(conversation))))
}

/// Fetch one conversation together with its full message history.
#[utoipa::path(
    get,
    path = "/conversations/{id}",
    params(("id" = Uuid, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Conversation with messages", body = ConversationDetailResponse),
        (status = 404, description = "Conversation not found")
    )
)]
pub async fn get_conversation_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let conversation = state
        .store
        .get_owned_conversation(user_id, id)
        .await
        .map_err(|e| port_error_response(&e))?;

    let messages = state
        .store
        .conversation_messages(conversation.id)
        .await
        .map_err(|e| {
            error!("Failed to load messages: {:?}", e);
            port_error_response(&e)
        })?;

    Ok(Json(ConversationDetailResponse {
        conversation: conversation.into(),
        messages: messages.into_iter().map(Into::into).collect(),
    }))
}

/// Soft-delete a conversation (it stops appearing in listings).
#[utoipa::path(
    delete,
    path = "/conversations/{id}",
    params(("id" = Uuid, Path, description = "Conversation id")),
    responses(
        (status = 204, description = "Conversation deactivated"),
        (status = 404, description = "Conversation not found")
    )
)]
pub async fn delete_conversation_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .store
        .deactivate_conversation(user_id, id)
        .await
        .map_err(|e| port_error_response(&e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Post a message to a conversation and receive both persisted turns.
#[utoipa::path(
    post,
    path = "/conversations/{id}/messages",
    params(("id" = Uuid, Path, description = "Conversation id")),
    request_body = PostMessageRequest,
    responses(
        (status = 200, description = "Both persisted turns of the exchange", body = ExchangeResponse),
        (status = 400, description = "Missing message text"),
        (status = 404, description = "Conversation not found"),
        (status = 502, description = "The completion service failed")
    )
)]
pub async fn post_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
    Json(req): Json<PostMessageRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user = state
        .store
        .get_user(user_id)
        .await
        .map_err(|e| port_error_response(&e))?;

    let conversation = state
        .store
        .get_owned_conversation(user_id, id)
        .await
        .map_err(|e| port_error_response(&e))?;

    let exchange = state
        .router
        .handle_turn(&user, &conversation, &req.message)
        .await
        .map_err(|e| {
            error!(conversation_id = %id, "turn failed: {e}");
            port_error_response(&e)
        })?;

    Ok(Json(ExchangeResponse {
        user_message: exchange.user_message.into(),
        assistant_message: exchange.assistant_message.into(),
    }))
}

/// List the models available from the upstream completion service.
#[utoipa::path(
    get,
    path = "/models",
    responses(
        (status = 200, description = "Available models", body = [ModelDto]),
        (status = 502, description = "The completion service failed")
    )
)]
pub async fn list_models_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let models = state.completion.list_models().await.map_err(|e| {
        error!("Failed to list models: {:?}", e);
        port_error_response(&e)
    })?;

    let dtos: Vec<ModelDto> = models
        .into_iter()
        .map(|m| ModelDto {
            id: m.id,
            name: m.name,
        })
        .collect();
    Ok(Json(dtos))
}
