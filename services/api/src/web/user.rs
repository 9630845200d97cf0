//! services/api/src/web/user.rs
//!
//! Per-user settings: the active completion model, the free-form life
//! context injected into prompts, and the preferred-models shortlist.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::port_error_response;
use crate::web::state::AppState;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CurrentModel {
    pub model: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LifeContext {
    pub life_context: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct PreferredModels {
    pub models: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/user/model",
    responses(
        (status = 200, description = "The user's active model", body = CurrentModel),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn get_model_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user = state
        .store
        .get_user(user_id)
        .await
        .map_err(|e| port_error_response(&e))?;
    Ok(Json(CurrentModel {
        model: user.current_model,
    }))
}

#[utoipa::path(
    put,
    path = "/user/model",
    request_body = CurrentModel,
    responses(
        (status = 200, description = "Model updated", body = CurrentModel),
        (status = 400, description = "Empty model id"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn set_model_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CurrentModel>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.model.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Model id is required".to_string()));
    }

    state
        .store
        .set_current_model(user_id, &req.model)
        .await
        .map_err(|e| {
            error!("Failed to set current model: {:?}", e);
            port_error_response(&e)
        })?;
    Ok(Json(CurrentModel { model: req.model }))
}

#[utoipa::path(
    get,
    path = "/user/context",
    responses(
        (status = 200, description = "The user's life context", body = LifeContext),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn get_context_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user = state
        .store
        .get_user(user_id)
        .await
        .map_err(|e| port_error_response(&e))?;
    Ok(Json(LifeContext {
        life_context: user.life_context,
    }))
}

#[utoipa::path(
    put,
    path = "/user/context",
    request_body = LifeContext,
    responses(
        (status = 200, description = "Life context updated", body = LifeContext),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn set_context_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<LifeContext>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // A blank string clears the context rather than storing whitespace.
    let context = req
        .life_context
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    state
        .store
        .set_life_context(user_id, context)
        .await
        .map_err(|e| {
            error!("Failed to set life context: {:?}", e);
            port_error_response(&e)
        })?;
    Ok(Json(LifeContext {
        life_context: context.map(ToString::to_string),
    }))
}

#[utoipa::path(
    get,
    path = "/user/preferred-models",
    responses(
        (status = 200, description = "The user's preferred models", body = PreferredModels),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn get_preferred_models_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user = state
        .store
        .get_user(user_id)
        .await
        .map_err(|e| port_error_response(&e))?;
    Ok(Json(PreferredModels {
        models: user.preferred_models,
    }))
}

#[utoipa::path(
    put,
    path = "/user/preferred-models",
    request_body = PreferredModels,
    responses(
        (status = 200, description = "Preferred models updated", body = PreferredModels),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn set_preferred_models_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<PreferredModels>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .store
        .set_preferred_models(user_id, &req.models)
        .await
        .map_err(|e| {
            error!("Failed to set preferred models: {:?}", e);
            port_error_response(&e)
        })?;
    Ok(Json(PreferredModels { models: req.models }))
}
