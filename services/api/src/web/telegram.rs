//! services/api/src/web/telegram.rs
//!
//! Endpoints for connecting a Telegram chat to the authenticated account.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::port_error_response;
use crate::web::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct IssueTokenResponse {
    pub token: String,
    pub instructions: String,
}

#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    pub connected: bool,
    pub username: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Issue a fresh connection token. Any token issued earlier stops working.
#[utoipa::path(
    post,
    path = "/telegram/token",
    responses(
        (status = 200, description = "Token issued", body = IssueTokenResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn issue_token_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let issued = state.registry.issue_token(user_id).await.map_err(|e| {
        error!("Failed to issue connection token: {:?}", e);
        port_error_response(&e)
    })?;

    Ok(Json(IssueTokenResponse {
        token: issued.token,
        instructions: issued.instructions,
    }))
}

/// Report whether the account has a Telegram chat bound to it.
#[utoipa::path(
    get,
    path = "/telegram/status",
    responses(
        (status = 200, description = "Current link status", body = StatusResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let status = state.registry.status(user_id).await.map_err(|e| {
        error!("Failed to read link status: {:?}", e);
        port_error_response(&e)
    })?;

    Ok(Json(StatusResponse {
        connected: status.connected,
        username: status.username,
        connected_at: status.connected_at,
        last_message_at: status.last_message_at,
    }))
}
