//! services/api/src/bin/bridge.rs
//!
//! The Telegram bridge worker. Runs the long-poll loop against the Telegram
//! Bot API and, every `DELIVERY_CYCLE_INTERVAL` cycles, a proactive-message
//! delivery pass. Deployed as a single instance alongside the api binary.

use api_lib::{adapters::PgStore, config::Config, error::ApiError};
use chatlink_core::{
    bridge::TelegramBridge,
    delivery::{ProactiveDeliverer, DELIVERY_CYCLE_INTERVAL},
    dispatch::DispatchRouter,
    gateway::CompletionGateway,
    link::LinkRegistry,
    ports::{ChannelTransport, ChatStore, CompletionService},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_lib::adapters::{OpenRouterAdapter, TelegramApi};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // The bridge cannot run without a bot token; fail fast and loudly.
    let bot_token = config
        .telegram_bot_token
        .clone()
        .ok_or_else(|| ApiError::Internal("TELEGRAM_BOT_TOKEN is required".to_string()))?;

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(db_pool.clone()));
    store.run_migrations().await?;

    // --- 3. Assemble Ports and Core Services ---
    let store: Arc<dyn ChatStore> = store;
    let completion: Arc<dyn CompletionService> =
        Arc::new(OpenRouterAdapter::new(config.openrouter_api_key.clone()));
    let transport: Arc<dyn ChannelTransport> = Arc::new(TelegramApi::new(bot_token));

    if !transport.health_check().await {
        error!("Telegram credentials check failed; refusing to start");
        return Err(ApiError::Internal(
            "Telegram Bot API rejected the configured token".to_string(),
        ));
    }
    info!("Telegram credentials verified. Starting bridge loop...");

    let registry = LinkRegistry::new(store.clone());
    let gateway = CompletionGateway::new(store.clone(), completion.clone());
    let router = DispatchRouter::new(store.clone(), gateway);
    let bridge = TelegramBridge::new(store.clone(), registry, router, transport.clone());
    let deliverer = ProactiveDeliverer::new(store, transport);

    // --- 4. Poll Loop ---
    // The offset starts at 0 and is advanced past each consumed update.
    let mut offset: i64 = 0;
    let mut cycle: u64 = 0;
    loop {
        offset = bridge.poll_cycle(offset).await;

        cycle += 1;
        if cycle % DELIVERY_CYCLE_INTERVAL == 0 {
            let report = deliverer.run_cycle().await;
            if report.sent > 0 || report.failed > 0 {
                info!(sent = report.sent, failed = report.failed, "delivery cycle");
            }
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
