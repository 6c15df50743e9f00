//! Chat Server Library
//!
//! REST history/submit endpoints and a WebSocket live channel on top of the
//! `chat-sync` core.

pub mod config;
pub mod error;
pub mod handlers;
pub mod seed;
pub mod simulate;
pub mod views;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use chat_sync::{ChatService, MemoryStore, SqliteStore};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::{AppState, ServerConfig, StoreKind};
use handlers::{
    create_conversation, get_messages, health_check, list_conversations, mark_read, post_message,
    ws_handler,
};

/// Install the global fmt subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }
}

/// Open the configured store, rebuild summaries and seed sample data if asked.
pub async fn open_chat(config: &ServerConfig) -> anyhow::Result<Arc<ChatService>> {
    let chat = match config.store {
        StoreKind::Sqlite => {
            config.ensure_dirs().await?;
            let path = config.database_path();
            let store = SqliteStore::open(&path)
                .await
                .with_context(|| format!("opening database {:?}", path))?;
            ChatService::open(Arc::new(store)).await?
        }
        StoreKind::Memory => ChatService::open(Arc::new(MemoryStore::new())).await?,
    };

    if config.seed_sample {
        seed::seed_sample_data(&chat)
            .await
            .context("seeding sample conversations")?;
    }
    Ok(Arc::new(chat))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Conversations
        .route("/api/chats", get(list_conversations).post(create_conversation))
        .route("/api/chats/{id}/read", post(mark_read))
        // History and submit
        .route("/api/messages", post(post_message))
        .route("/api/messages/{chat_id}", get(get_messages))
        // Live channel
        .route("/ws", get(ws_handler))
        // Health check
        .route("/health", get(health_check))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::from_env();
    info!("=== Chat Server ===");
    info!("Store: {:?}", config.store);
    if config.store == StoreKind::Sqlite {
        info!("Database: {:?}", config.database_path());
    }

    let chat = open_chat(&config).await?;
    info!("{} conversations loaded", chat.list_conversations().len());

    if config.simulate_inbound {
        simulate::spawn(
            chat.clone(),
            config.simulate_interval,
            config.simulate_probability,
        );
        info!(
            "Simulated counterparty every {:?} (p={})",
            config.simulate_interval, config.simulate_probability
        );
    }

    let addr = config.bind_addr;
    let app = router(AppState::new(chat, config));

    info!("Chat server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
