//! relay-server - Web chat relay in front of Google Gemini.
//!
//! Serves a chat page, forwards each turn together with the user's prior
//! conversation to the model, and keeps every conversation in a JSON file.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod chat;
pub mod history;
pub mod messages;
pub mod provider;
pub mod routes;
pub mod session;

pub use chat::{ChatError, ChatService};
pub use history::{Conversations, HistoryError, HistoryStore, Message, Part, Role};
pub use messages::UserMessages;
pub use provider::{
    ChatRequest, ChatResponse, GeminiProvider, Provider, ProviderError, ProviderErrorKind,
    TokenUsage,
};
pub use routes::{build_router, AppState, ChatMessageRequest, ChatMessageResponse, SERVICE_NAME};
pub use session::{Session, SessionRegistry};

use anyhow::Result;
use axum::Router;
use relay_common::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Wire the application from configuration.
///
/// Fails when no Gemini API key is configured. Loads the history file
/// once; later turns only write it.
pub fn build_app(config: &Config) -> Result<Router> {
    let api_key = config.gemini_api_key()?;

    let store = Arc::new(
        HistoryStore::new(&config.history.path)
            .with_preserve_untouched(config.history.preserve_untouched),
    );
    let registry = SessionRegistry::new(store.load());
    let provider: Arc<dyn Provider> = Arc::new(GeminiProvider::new(api_key, &config.gemini));

    tracing::info!(
        model = %provider.model(),
        history = %store.path().display(),
        seeded_conversations = registry.snapshot().len(),
        "Chat relay configured"
    );

    let chat = ChatService::new(registry, store, provider, &config.chat.default_user_id);
    let state = AppState::new(chat, config.chat.locale);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Ok(build_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors))
}

/// Serve `app` on `addr` until SIGINT or SIGTERM.
pub async fn serve(app: Router, addr: SocketAddr) -> Result<()> {
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
