//! Model provider abstraction.
//!
//! The relay talks to exactly one provider at a time; the trait exists so
//! the chat flow can be exercised against a scripted provider in tests.

mod gemini;

pub use gemini::GeminiProvider;

use crate::history::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Provider Trait
// ============================================================================

/// Unified interface for chat model providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Model identifier requests are sent to.
    fn model(&self) -> &str;

    /// Send the full conversation and return the model's next turn.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

// ============================================================================
// Errors
// ============================================================================

/// Classified provider failure.
///
/// Classification is derived from HTTP status, the API's structured error
/// status and reason codes, and block signals in the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The API key was rejected.
    AuthInvalid,
    /// Quota or rate limit exceeded.
    RateLimited,
    /// Access denied, e.g. location or project restrictions.
    AccessRestricted,
    /// The remote could not be reached or timed out.
    Network,
    /// The prompt or reply was blocked by the safety system.
    ContentBlocked,
    Other,
}

impl ProviderErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AuthInvalid => "auth_invalid",
            Self::RateLimited => "rate_limited",
            Self::AccessRestricted => "access_restricted",
            Self::Network => "network",
            Self::ContentBlocked => "content_blocked",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error from a provider.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.provider, self.kind, self.message)
    }
}

impl std::error::Error for ProviderError {}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Chat request: prior turns followed by the new user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub contents: Vec<Message>,
}

/// Unified chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider name
    pub provider: String,
    /// Model used
    pub model: String,
    /// Reply text
    pub content: String,
    /// Finish reason reported by the model
    pub finish_reason: Option<String>,
    /// Token usage
    pub usage: TokenUsage,
    /// Response latency in milliseconds
    pub latency_ms: u64,
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}
