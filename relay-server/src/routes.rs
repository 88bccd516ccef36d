//! HTTP API routes.

use crate::chat::{ChatError, ChatService};
use crate::messages::{self, UserMessages};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use relay_common::logging::RequestContext;
use relay_common::Locale;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

/// Service name reported by health checks and request spans.
pub const SERVICE_NAME: &str = "relay-server";

const INDEX_HTML: &str = include_str!("../templates/index.html");

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub messages: &'static UserMessages,
}

impl AppState {
    pub fn new(chat: ChatService, locale: Locale) -> Self {
        Self {
            chat,
            messages: messages::for_locale(locale),
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Chat page
        .route("/", get(index))
        // Chat turn
        .route("/chat", post(chat))
        // Health check
        .route("/health", get(health_check))
        .route("/api/v1/health", get(health_check))
        .with_state(state)
}

// ============ Page ============

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

// ============ Chat ============

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatMessageRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Reply body; used for both answers and error text.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessageResponse {
    pub response: String,
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatMessageRequest>, JsonRejection>,
) -> (StatusCode, Json<ChatMessageResponse>) {
    let ctx = RequestContext::from_headers(&headers, SERVICE_NAME);

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(
                trace_id = %ctx.trace_id,
                error = %rejection.body_text(),
                "Rejected malformed chat request"
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(ChatMessageResponse {
                    response: state.messages.empty_message.to_string(),
                }),
            );
        }
    };

    let user_id = state.chat.resolve_user_id(request.user_id.as_deref());
    let span = relay_common::request_span!("chat", ctx, user_id = %user_id);

    let result = state
        .chat
        .handle(request.message.as_deref(), &user_id)
        .instrument(span)
        .await;

    match result {
        Ok(reply) => (StatusCode::OK, Json(ChatMessageResponse { response: reply })),
        Err(err) => error_reply(&err, state.messages),
    }
}

fn error_reply(
    err: &ChatError,
    messages: &UserMessages,
) -> (StatusCode, Json<ChatMessageResponse>) {
    (
        err.status_code(),
        Json(ChatMessageResponse {
            response: err.user_message(messages).to_string(),
        }),
    )
}

// ============ Health Check ============

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.chat.registry().len().await
    }))
}
