//! One chat turn: validate, call the model, persist.

use crate::history::{HistoryError, HistoryStore};
use crate::messages::UserMessages;
use crate::provider::{Provider, ProviderError, ProviderErrorKind};
use crate::session::SessionRegistry;
use axum::http::StatusCode;
use relay_common::util::{sanitize_for_log, truncate_with_ellipsis};
use std::sync::Arc;
use thiserror::Error;

/// Characters of user text kept in log lines.
const LOG_PREVIEW_CHARS: usize = 80;

/// Chat turn failure.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is missing or blank")]
    EmptyMessage,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyMessage => StatusCode::BAD_REQUEST,
            Self::Provider(_) | Self::History(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Fixed reply text for this failure.
    pub fn user_message(&self, messages: &UserMessages) -> &'static str {
        match self {
            Self::EmptyMessage => messages.empty_message,
            Self::Provider(err) => match err.kind {
                ProviderErrorKind::AuthInvalid => messages.auth_invalid,
                ProviderErrorKind::RateLimited | ProviderErrorKind::AccessRestricted => {
                    messages.restricted
                }
                ProviderErrorKind::Network => messages.network,
                ProviderErrorKind::ContentBlocked => messages.content_blocked,
                ProviderErrorKind::Other => messages.generic,
            },
            Self::History(HistoryError::FileMissing { .. }) => messages.history_missing,
            Self::History(_) => messages.generic,
        }
    }
}

/// Chat flow shared by all requests.
#[derive(Clone)]
pub struct ChatService {
    registry: SessionRegistry,
    store: Arc<HistoryStore>,
    provider: Arc<dyn Provider>,
    default_user_id: String,
}

impl ChatService {
    pub fn new(
        registry: SessionRegistry,
        store: Arc<HistoryStore>,
        provider: Arc<dyn Provider>,
        default_user_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            provider,
            default_user_id: default_user_id.into(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Caller-supplied identifier, or the default when absent or blank.
    ///
    /// A non-blank identifier is used exactly as sent.
    pub fn resolve_user_id(&self, user_id: Option<&str>) -> String {
        user_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(self.default_user_id.as_str())
            .to_string()
    }

    /// Run one turn for `user_id` and return the model's reply.
    ///
    /// On success the whole registry is written to the history file. When
    /// the model blocks the content, the session this turn used is dropped
    /// so the next turn starts from the startup history.
    pub async fn handle(&self, message: Option<&str>, user_id: &str) -> Result<String, ChatError> {
        let Some(text) = message.filter(|m| !m.trim().is_empty()) else {
            tracing::warn!(user_id = %user_id, "Rejected empty message");
            return Err(ChatError::EmptyMessage);
        };

        tracing::info!(
            user_id = %user_id,
            message = %truncate_with_ellipsis(text, LOG_PREVIEW_CHARS),
            "Received chat message"
        );

        let session = self.registry.get_or_create(user_id).await;

        let response = match session.send(self.provider.as_ref(), text).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(
                    user_id = %user_id,
                    kind = %err.kind,
                    status = ?err.status_code,
                    error = %sanitize_for_log(&err.to_string()),
                    "Model call failed"
                );
                if err.kind == ProviderErrorKind::ContentBlocked {
                    self.registry.evict(&session).await;
                }
                return Err(err.into());
            }
        };

        let saved = self.store.save(&self.registry).await.map_err(|err| {
            tracing::error!(
                path = %self.store.path().display(),
                error = %err,
                "Failed to save conversation history"
            );
            ChatError::from(err)
        })?;

        tracing::info!(
            user_id = %user_id,
            model = %response.model,
            latency_ms = response.latency_ms,
            total_tokens = response.usage.total_tokens,
            conversations = saved,
            reply = %truncate_with_ellipsis(&response.content, LOG_PREVIEW_CHARS),
            "Chat turn completed"
        );

        Ok(response.content)
    }
}
