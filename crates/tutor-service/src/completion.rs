//! Completion client for the language model.
//!
//! Every model call in the service goes through [`CompletionClient`], so the
//! question engine, chat service, and render pipeline can be exercised with
//! scripted fakes. [`AnthropicClient`] is the production implementation over
//! the Anthropic Messages API.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Default base URL of the Anthropic API.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// API version header value.
const API_VERSION: &str = "2023-06-01";

/// Errors from completion calls. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with an error status.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// The service is rate limiting this key.
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited {
        /// Seconds from the `retry-after` header, when present.
        retry_after: Option<u64>,
    },

    /// The response could not be decoded or carried no text.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Which class of model serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelTier {
    /// Cheap, low-latency model for short structured answers and chat.
    Fast,
    /// Stronger model for program generation.
    Capable,
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The student.
    User,
    /// The tutor.
    Assistant,
    /// Instructions; never forwarded as a chat turn.
    System,
}

impl Role {
    /// Lowercase wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Model class to use.
    pub tier: ModelTier,
    /// Optional system instruction.
    pub system: Option<String>,
    /// Conversation, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Output token cap.
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// A one-shot request carrying a single user prompt.
    pub fn prompt(tier: ModelTier, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            tier,
            system: None,
            messages: vec![ChatMessage::user(prompt)],
            max_tokens,
        }
    }
}

/// Anything that can turn a conversation into text.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Returns the text of the model's reply.
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

impl MessagesResponse {
    fn into_text(self) -> Option<String> {
        self.content
            .into_iter()
            .find(|b| b.content_type == "text")
            .and_then(|b| b.text)
    }
}

/// HTTP client for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: Client,
    api_key: String,
    base_url: String,
    fast_model: String,
    capable_model: String,
}

impl AnthropicClient {
    /// Creates a client against the public API.
    pub fn new(
        api_key: impl Into<String>,
        fast_model: impl Into<String>,
        capable_model: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            fast_model: fast_model.into(),
            capable_model: capable_model.into(),
        }
    }

    /// Points the client at another base URL (mock servers in tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Model id serving `tier`.
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast_model,
            ModelTier::Capable => &self.capable_model,
        }
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    #[instrument(skip(self, request), fields(tier = ?request.tier, turns = request.messages.len()))]
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let body = MessagesRequest {
            model: self.model_for(request.tier),
            max_tokens: request.max_tokens,
            messages: &request.messages,
            system: request.system.as_deref(),
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(CompletionError::RateLimited { retry_after });
        }

        if status >= 400 {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "(no body)".to_string());
            return Err(CompletionError::Api { status, message });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(format!("failed to parse response: {e}")))?;

        let text = parsed
            .into_text()
            .ok_or_else(|| CompletionError::InvalidResponse("no text block in response".to_string()))?;
        debug!(reply_len = text.len(), "Completion received");
        Ok(text)
    }
}

static LEADING_FENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_+-]*[ \t]*\r?\n?").ok());

static TRAILING_FENCE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\r?\n?```$").ok());

/// Removes a leading code fence (optionally language-tagged) and a trailing
/// fence, then trims surrounding whitespace.
pub fn strip_code_fences(text: &str) -> String {
    let mut stripped = text.trim().to_string();
    if let Some(re) = LEADING_FENCE.as_ref() {
        stripped = re.replace(&stripped, "").into_owned();
    }
    if let Some(re) = TRAILING_FENCE.as_ref() {
        stripped = re.replace(&stripped, "").into_owned();
    }
    stripped.trim().to_string()
}
