/// LLM Client: the single point of entry for all chat-completion calls.
///
/// ARCHITECTURAL RULE: No other module may call the LLM endpoint directly.
/// All LLM interactions MUST go through the `CompletionClient` trait.
///
/// One call per `complete`: retry and backoff policy belongs to the caller,
/// which knows whether a failed attempt is worth another round trip.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM client is not configured (missing endpoint or API key)")]
    Unconfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    #[error("Authentication failed (status {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,
}

impl LlmError {
    /// Whether a fresh attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(_)
            | LlmError::Timeout(_)
            | LlmError::RateLimited { .. }
            | LlmError::Parse(_)
            | LlmError::EmptyContent => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::Auth { .. } | LlmError::Unconfigured => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStyle {
    /// `Authorization: Bearer <key>`
    #[default]
    OpenAi,
    /// `api-key: <key>`, deployment encoded in the endpoint URL
    Azure,
}

impl ApiStyle {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "azure" => ApiStyle::Azure,
            _ => ApiStyle::OpenAi,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    /// Message content with any markdown fences removed.
    pub content: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// OpenAI-compatible chat-completions client (OpenAI or Azure OpenAI).
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    model: String,
    style: ApiStyle,
}

impl LlmClient {
    pub fn new(
        endpoint: Option<String>,
        api_key: Option<String>,
        model: String,
        style: ApiStyle,
    ) -> Result<Self, LlmError> {
        let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let endpoint = non_empty(endpoint).or_else(|| {
            (style == ApiStyle::OpenAi).then(|| OPENAI_CHAT_URL.to_string())
        });
        Ok(Self {
            client: Client::builder().build()?,
            endpoint,
            api_key: non_empty(api_key),
            model,
            style,
        })
    }

    fn body(&self, request: &CompletionRequest) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "temperature": 0,
            "max_tokens": request.max_tokens,
            "response_format": {"type": "json_object"},
        })
    }

    async fn send(
        &self,
        endpoint: &str,
        api_key: &str,
        request: &CompletionRequest,
    ) -> Result<Completion, LlmError> {
        let builder = self.client.post(endpoint).json(&self.body(request));
        let builder = match self.style {
            ApiStyle::OpenAi => builder.bearer_auth(api_key),
            ApiStyle::Azure => builder.header("api-key", api_key),
        };

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            warn!("LLM API returned {}: {}", status, message);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth {
                    status: status.as_u16(),
                    message,
                },
                StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited { message },
                _ => LlmError::Api {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        let chat: ChatResponse = serde_json::from_str(&response.text().await?)?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| strip_json_fences(&c).to_string())
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyContent)?;

        let usage = chat
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        debug!(
            "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
            usage.prompt_tokens, usage.completion_tokens
        );

        Ok(Completion { content, usage })
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let (Some(endpoint), Some(api_key)) = (self.endpoint.as_deref(), self.api_key.as_deref())
        else {
            return Err(LlmError::Unconfigured);
        };

        match tokio::time::timeout(request.timeout, self.send(endpoint, api_key, request)).await {
            Ok(Err(LlmError::Http(e))) if e.is_timeout() => Err(LlmError::Timeout(request.timeout)),
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(request.timeout)),
        }
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "sys".into(),
            user: "usr".into(),
            max_tokens: 4096,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_retry_classification() {
        assert!(LlmError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(LlmError::RateLimited { message: String::new() }.is_retryable());
        assert!(LlmError::EmptyContent.is_retryable());
        assert!(LlmError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(!LlmError::Api { status: 400, message: String::new() }.is_retryable());
        assert!(!LlmError::Auth { status: 401, message: String::new() }.is_retryable());
        assert!(!LlmError::Unconfigured.is_retryable());
    }

    #[test]
    fn test_body_requests_deterministic_json() {
        let client = LlmClient::new(None, Some("k".into()), "gpt-4o-mini".into(), ApiStyle::OpenAi)
            .unwrap();
        let body = client.body(&request());
        assert_eq!(body["temperature"], 0);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
    }

    #[test]
    fn test_configuration_rules() {
        let openai = LlmClient::new(None, Some("k".into()), "m".into(), ApiStyle::OpenAi).unwrap();
        assert!(openai.is_configured());

        let azure_without_endpoint =
            LlmClient::new(None, Some("k".into()), "m".into(), ApiStyle::Azure).unwrap();
        assert!(!azure_without_endpoint.is_configured());

        let blank_key = LlmClient::new(None, Some("  ".into()), "m".into(), ApiStyle::OpenAi).unwrap();
        assert!(!blank_key.is_configured());
    }

    #[tokio::test]
    async fn test_unconfigured_client_fails_fast() {
        let client = LlmClient::new(None, None, "m".into(), ApiStyle::OpenAi).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Unconfigured));
    }

    #[test]
    fn test_api_style_parse() {
        assert_eq!(ApiStyle::parse("Azure"), ApiStyle::Azure);
        assert_eq!(ApiStyle::parse("openai"), ApiStyle::OpenAi);
        assert_eq!(ApiStyle::parse(""), ApiStyle::OpenAi);
    }
}
