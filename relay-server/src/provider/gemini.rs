//! Google Gemini provider.
//!
//! Calls `generateContent` with the whole conversation on every turn and
//! classifies failures from the HTTP status, the structured error envelope
//! and the safety signals in successful responses.

use super::{ChatRequest, ChatResponse, Provider, ProviderError, ProviderErrorKind, TokenUsage};
use crate::history::Message;
use async_trait::async_trait;
use relay_common::GeminiConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const PROVIDER_NAME: &str = "gemini";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Finish reasons that mean the reply was withheld by the safety system.
const BLOCKED_FINISH_REASONS: &[&str] = &["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

/// Gemini provider authenticated with an API key.
pub struct GeminiProvider {
    api_key: String,
    model: String,
    base_url: String,
    temperature: Option<f64>,
    max_output_tokens: Option<u32>,
    client: Client,
}

// ══════════════════════════════════════════════════════════════════════════════
// API REQUEST/RESPONSE TYPES
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<i64>,
    candidates_token_count: Option<i64>,
    total_token_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    code: Option<u16>,
    #[serde(default)]
    message: String,
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    reason: Option<String>,
}

impl ApiError {
    fn has_reason(&self, reason: &str) -> bool {
        self.details
            .iter()
            .any(|d| d.reason.as_deref() == Some(reason))
    }
}

/// Map an HTTP status and optional error envelope to a failure class.
fn classify_api_error(status: u16, error: Option<&ApiError>) -> ProviderErrorKind {
    let api_status = error.and_then(|e| e.status.as_deref());
    let key_rejected = error.is_some_and(|e| e.has_reason("API_KEY_INVALID"));

    if key_rejected || status == 401 || api_status == Some("UNAUTHENTICATED") {
        ProviderErrorKind::AuthInvalid
    } else if status == 429 || api_status == Some("RESOURCE_EXHAUSTED") {
        ProviderErrorKind::RateLimited
    } else if status == 403
        || matches!(api_status, Some("PERMISSION_DENIED") | Some("FAILED_PRECONDITION"))
    {
        ProviderErrorKind::AccessRestricted
    } else {
        ProviderErrorKind::Other
    }
}

impl GeminiProvider {
    /// Create a provider for the configured model.
    pub fn new(api_key: impl Into<String>, config: &GeminiConfig) -> Self {
        Self {
            api_key: api_key.into(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn endpoint(&self) -> String {
        let model_name = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        format!("{}/v1beta/{model_name}:generateContent", self.base_url)
    }

    fn error(&self, kind: ProviderErrorKind, message: impl Into<String>) -> ProviderError {
        ProviderError::new(PROVIDER_NAME, kind, message)
    }

    fn build_request<'a>(&self, messages: &'a [Message]) -> GenerateContentRequest<'a> {
        let contents = messages
            .iter()
            .filter(|m| !m.parts.is_empty())
            .map(|m| Content {
                role: m.role.as_str(),
                parts: m.parts.iter().map(|p| Part { text: &p.text }).collect(),
            })
            .collect();

        let generation_config = (self.temperature.is_some() || self.max_output_tokens.is_some())
            .then(|| GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            });

        GenerateContentRequest {
            contents,
            generation_config,
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();
        let body = self.build_request(&request.contents);

        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.error(ProviderErrorKind::Network, format!("Request failed: {e}")))?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            self.error(
                ProviderErrorKind::Network,
                format!("Failed to read response: {e}"),
            )
        })?;

        if !status.is_success() {
            let envelope = serde_json::from_slice::<ErrorEnvelope>(&bytes).ok();
            let api_error = envelope.as_ref().map(|e| &e.error);
            let detail = api_error
                .map(|e| e.message.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());

            return Err(self
                .error(
                    classify_api_error(status.as_u16(), api_error),
                    format!("API error ({}): {detail}", status.as_u16()),
                )
                .with_status(status.as_u16()));
        }

        let result: GenerateContentResponse = serde_json::from_slice(&bytes).map_err(|e| {
            self.error(
                ProviderErrorKind::Other,
                format!("Failed to parse response: {e}"),
            )
        })?;

        if let Some(err) = result.error {
            let code = err.code.unwrap_or(status.as_u16());
            let mut provider_error = self.error(
                classify_api_error(code, Some(&err)),
                format!("API error: {}", err.message),
            );
            if err.code.is_some() {
                provider_error = provider_error.with_status(code);
            }
            return Err(provider_error);
        }

        if let Some(reason) = result.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(self.error(
                ProviderErrorKind::ContentBlocked,
                format!("Prompt blocked: {reason}"),
            ));
        }

        let candidate = result
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| self.error(ProviderErrorKind::Other, "No response from Gemini"))?;

        if let Some(reason) = candidate
            .finish_reason
            .as_deref()
            .filter(|r| BLOCKED_FINISH_REASONS.contains(r))
        {
            return Err(self.error(
                ProviderErrorKind::ContentBlocked,
                format!("Response blocked: {reason}"),
            ));
        }

        let content: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| !p.thought)
            .filter_map(|p| p.text)
            .collect();

        if content.trim().is_empty() {
            return Err(self.error(
                ProviderErrorKind::Other,
                format!(
                    "Empty response (finish reason: {})",
                    candidate.finish_reason.as_deref().unwrap_or("none")
                ),
            ));
        }

        let usage = result.usage_metadata.map_or(TokenUsage::default(), |u| TokenUsage {
            input_tokens: u.prompt_token_count.unwrap_or(0),
            output_tokens: u.candidates_token_count.unwrap_or(0),
            total_tokens: u.total_token_count.unwrap_or(0),
        });

        Ok(ChatResponse {
            provider: PROVIDER_NAME.into(),
            model: self.model.clone(),
            content,
            finish_reason: candidate.finish_reason,
            usage,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ENDPOINT: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

    fn provider_for(base_url: &str) -> GeminiProvider {
        let config = GeminiConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            connect_timeout_secs: 2,
            ..GeminiConfig::default()
        };
        GeminiProvider::new("test-key", &config)
    }

    fn request(text: &str) -> ChatRequest {
        ChatRequest {
            contents: vec![
                Message::user("earlier"),
                Message::model("reply"),
                Message::user(text),
            ],
        }
    }

    async fn mock_response(server: &MockServer, status: u16, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn endpoint_accepts_prefixed_model() {
        let mut provider = provider_for("https://example.test/");
        assert_eq!(
            provider.endpoint(),
            "https://example.test/v1beta/models/gemini-1.5-flash:generateContent"
        );
        provider.model = "models/gemini-pro".into();
        assert_eq!(
            provider.endpoint(),
            "https://example.test/v1beta/models/gemini-pro:generateContent"
        );
    }

    #[test]
    fn request_skips_empty_messages_and_default_generation_config() {
        let provider = provider_for("https://example.test");
        let messages = vec![
            Message {
                role: crate::history::Role::Model,
                parts: Vec::new(),
            },
            Message::user("hi"),
        ];
        let body = serde_json::to_value(provider.build_request(&messages)).unwrap();
        assert_eq!(
            body,
            json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]})
        );
    }

    #[test]
    fn request_includes_generation_config_when_set() {
        let mut provider = provider_for("https://example.test");
        provider.temperature = Some(0.4);
        provider.max_output_tokens = Some(256);
        let messages = vec![Message::user("hi")];
        let body = serde_json::to_value(provider.build_request(&messages)).unwrap();
        assert_eq!(
            body["generationConfig"],
            json!({"temperature": 0.4, "maxOutputTokens": 256})
        );
    }

    #[tokio::test]
    async fn returns_concatenated_reply_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "earlier"}]},
                    {"role": "model", "parts": [{"text": "reply"}]},
                    {"role": "user", "parts": [{"text": "hello"}]}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [
                        {"text": "thinking...", "thought": true},
                        {"text": "Hi "},
                        {"text": "there"}
                    ]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {
                    "promptTokenCount": 12,
                    "candidatesTokenCount": 3,
                    "totalTokenCount": 15
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server.uri());
        let response = provider.chat(request("hello")).await.unwrap();

        assert_eq!(response.content, "Hi there");
        assert_eq!(response.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(response.usage.total_tokens, 15);
        assert_eq!(response.model, "gemini-1.5-flash");
    }

    #[tokio::test]
    async fn invalid_key_is_auth_error() {
        let server = MockServer::start().await;
        mock_response(
            &server,
            400,
            json!({"error": {
                "code": 400,
                "message": "API key not valid. Please pass a valid API key.",
                "status": "INVALID_ARGUMENT",
                "details": [{
                    "@type": "type.googleapis.com/google.rpc.ErrorInfo",
                    "reason": "API_KEY_INVALID"
                }]
            }}),
        )
        .await;

        let err = provider_for(&server.uri())
            .chat(request("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::AuthInvalid);
        assert_eq!(err.status_code, Some(400));
        assert!(err.message.contains("API key not valid"));
    }

    #[tokio::test]
    async fn quota_exhausted_is_rate_limited() {
        let server = MockServer::start().await;
        mock_response(
            &server,
            429,
            json!({"error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}}),
        )
        .await;

        let err = provider_for(&server.uri())
            .chat(request("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn location_restriction_is_access_restricted() {
        let server = MockServer::start().await;
        mock_response(
            &server,
            400,
            json!({"error": {
                "code": 400,
                "message": "User location is not supported for the API use.",
                "status": "FAILED_PRECONDITION"
            }}),
        )
        .await;

        let err = provider_for(&server.uri())
            .chat(request("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::AccessRestricted);
    }

    #[tokio::test]
    async fn permission_denied_is_access_restricted() {
        let server = MockServer::start().await;
        mock_response(
            &server,
            403,
            json!({"error": {"code": 403, "message": "denied", "status": "PERMISSION_DENIED"}}),
        )
        .await;

        let err = provider_for(&server.uri())
            .chat(request("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::AccessRestricted);
    }

    #[tokio::test]
    async fn server_error_with_plain_body_is_other() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let err = provider_for(&server.uri())
            .chat(request("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Other);
        assert!(err.message.contains("upstream exploded"));
    }

    #[tokio::test]
    async fn blocked_prompt_is_content_blocked() {
        let server = MockServer::start().await;
        mock_response(
            &server,
            200,
            json!({"promptFeedback": {"blockReason": "SAFETY"}}),
        )
        .await;

        let err = provider_for(&server.uri())
            .chat(request("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::ContentBlocked);
    }

    #[tokio::test]
    async fn safety_finish_reason_is_content_blocked() {
        let server = MockServer::start().await;
        mock_response(
            &server,
            200,
            json!({"candidates": [{"finishReason": "SAFETY"}]}),
        )
        .await;

        let err = provider_for(&server.uri())
            .chat(request("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::ContentBlocked);
    }

    #[tokio::test]
    async fn empty_candidates_is_other() {
        let server = MockServer::start().await;
        mock_response(&server, 200, json!({"candidates": []})).await;

        let err = provider_for(&server.uri())
            .chat(request("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Other);
    }

    #[tokio::test]
    async fn candidate_without_text_is_other() {
        let server = MockServer::start().await;
        mock_response(
            &server,
            200,
            json!({"candidates": [{"finishReason": "RECITATION"}]}),
        )
        .await;

        let err = provider_for(&server.uri())
            .chat(request("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Other);
        assert!(err.message.contains("RECITATION"));
    }

    #[tokio::test]
    async fn thought_only_reply_is_other() {
        let server = MockServer::start().await;
        mock_response(
            &server,
            200,
            json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [{"text": "thinking...", "thought": true}, {"text": "  "}]
                    },
                    "finishReason": "STOP"
                }]
            }),
        )
        .await;

        let err = provider_for(&server.uri())
            .chat(request("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Other);
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        // Bind then drop a listener so the port is known to refuse connections.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = provider_for(&format!("http://{addr}"))
            .chat(request("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Network);
    }

    #[test]
    fn classify_prefers_key_reason_over_status() {
        let error = ApiError {
            status: Some("PERMISSION_DENIED".into()),
            details: vec![ErrorDetail {
                reason: Some("API_KEY_INVALID".into()),
            }],
            ..ApiError::default()
        };
        assert_eq!(
            classify_api_error(403, Some(&error)),
            ProviderErrorKind::AuthInvalid
        );
        assert_eq!(classify_api_error(503, None), ProviderErrorKind::Other);
    }
}
