//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{OpenRouterAdapter, PgStore},
    config::Config,
    error::ApiError,
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        middleware::require_auth,
        rest::{
            create_conversation_handler, delete_conversation_handler, get_conversation_handler,
            list_conversations_handler, list_models_handler, post_message_handler, ApiDoc,
        },
        state::AppState,
        telegram::{issue_token_handler, status_handler},
        user::{
            get_context_handler, get_model_handler, get_preferred_models_handler,
            set_context_handler, set_model_handler, set_preferred_models_handler,
        },
    },
};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use chatlink_core::ports::{ChatStore, CompletionService};
use chatlink_core::{dispatch::DispatchRouter, gateway::CompletionGateway, link::LinkRegistry};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(db_pool.clone()));
    info!("Running database migrations...");
    store.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Assemble Ports and Core Services ---
    let store: Arc<dyn ChatStore> = store;
    let completion: Arc<dyn CompletionService> =
        Arc::new(OpenRouterAdapter::new(config.openrouter_api_key.clone()));

    let registry = LinkRegistry::new(store.clone());
    let gateway = CompletionGateway::new(store.clone(), completion.clone());
    let router = DispatchRouter::new(store.clone(), gateway);

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        store,
        completion,
        registry,
        router,
        config: config.clone(),
    });

    let cors_origin = config
        .frontend_origin
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("Invalid FRONTEND_ORIGIN: {e}")))?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/conversations",
            get(list_conversations_handler).post(create_conversation_handler),
        )
        .route(
            "/conversations/{id}",
            get(get_conversation_handler).delete(delete_conversation_handler),
        )
        .route("/conversations/{id}/messages", post(post_message_handler))
        .route("/models", get(list_models_handler))
        .route("/telegram/token", post(issue_token_handler))
        .route("/telegram/status", get(status_handler))
        .route("/user/model", get(get_model_handler).put(set_model_handler))
        .route(
            "/user/context",
            get(get_context_handler).put(set_context_handler),
        )
        .route(
            "/user/preferred-models",
            get(get_preferred_models_handler).put(set_preferred_models_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
