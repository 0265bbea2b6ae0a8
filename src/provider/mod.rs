//! Chat-completions client for the LLM provider.
//!
//! Speaks the OpenAI-compatible `/chat/completions` wire format with bearer
//! auth (DeepSeek by default). Defines the [`ChatApi`] trait the
//! orchestrators depend on, so tests can substitute a scripted provider.
//!
//! Retry policy: at most three attempts per call. 429 and 5xx/transport
//! failures are retried with exponential backoff capped at 30 s plus 0–10 %
//! jitter; a `Retry-After` header takes precedence. 401 and other 4xx are
//! surfaced immediately.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::AppError;

/// Maximum attempts per completion call.
const MAX_ATTEMPTS: u32 = 3;

/// Base backoff before doubling, in milliseconds.
const BACKOFF_BASE_MS: u64 = 500;

/// Backoff ceiling, in milliseconds.
const BACKOFF_CAP_MS: u64 = 30_000;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// Human user message.
    User,
}

/// A message sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message author.
    pub role: Role,
    /// Plain text content.
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A completed chat call: the first choice's content plus usage metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletion {
    /// `choices[0].message.content`, verbatim.
    pub content: String,
    /// Model that served the response.
    pub model: String,
    /// Total tokens billed for the call.
    pub tokens_used: u32,
}

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Chat-completions request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct WireRequest {
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum completion tokens.
    pub max_tokens: u32,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
}

/// Chat-completions response envelope.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct WireResponse {
    /// Response choices.
    pub choices: Vec<WireChoice>,
    /// Model that served the response.
    #[serde(default)]
    pub model: Option<String>,
    /// Token usage.
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

/// A single response choice.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct WireChoice {
    /// Assistant message for this choice.
    pub message: WireMessage,
}

/// Assistant message payload.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct WireMessage {
    /// Text content.
    #[serde(default)]
    pub content: Option<String>,
}

/// Token usage statistics.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct WireUsage {
    /// Total tokens billed.
    #[serde(default)]
    pub total_tokens: Option<u32>,
    /// Prompt tokens.
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    /// Completion tokens.
    #[serde(default)]
    pub completion_tokens: Option<u32>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by the chat client.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider rejected the bearer token (HTTP 401).
    #[error("provider rejected credentials: {0}")]
    Authentication(String),

    /// Rate limited (HTTP 429); carries the server's `Retry-After` if present.
    #[error("provider rate limited: {body}")]
    RateLimit {
        /// Sanitized response body.
        body: String,
        /// Server-requested delay before the next attempt.
        retry_after: Option<Duration>,
    },

    /// HTTP 5xx or transport failure.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Any other non-success status.
    #[error("provider returned status {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },

    /// Response did not match the chat-completion envelope.
    #[error("provider response parse error: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Whether the retry loop may attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::Transient(_))
    }
}

impl From<ProviderError> for AppError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Authentication(msg) => AppError::Authentication(msg),
            ProviderError::RateLimit { body, .. } => AppError::RateLimit(body),
            ProviderError::Transient(msg) => AppError::TransientNetwork(msg),
            ProviderError::Api { status, body } => {
                AppError::TransientNetwork(format!("provider status {status}: {body}"))
            }
            ProviderError::Parse(msg) => AppError::Parsing(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The completion interface the orchestrators depend on.
///
/// Implementations must be `Send + Sync`; the client is stateless apart from
/// the bearer key, so concurrent orchestrator calls are independent.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Request a completion and return the first choice's content.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] after the retry budget is exhausted or on a
    /// non-retryable failure.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
    ) -> Result<ChatCompletion, ProviderError>;

    /// The model identifier sent with every request.
    fn model_id(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP chat-completions client.
#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    model: String,
    temperature: f32,
    api_key: String,
    client: reqwest::Client,
}

impl ChatClient {
    /// Create a client from LLM config.
    ///
    /// # Errors
    ///
    /// Fails fast when the API key is absent or the HTTP client cannot be
    /// constructed.
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = config.require_api_key()?.to_owned();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
            client,
        })
    }

    /// Single request/response round trip, no retry.
    async fn attempt(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<ChatCompletion, ProviderError> {
        let body = WireRequest {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens,
            messages: messages.to_vec(),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let payload = check_http_response(response).await?;
        parse_completion(&payload)
    }
}

#[async_trait]
impl ChatApi for ChatClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
    ) -> Result<ChatCompletion, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = retry_delay(attempt, last_error.as_ref());
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying chat call");
                tokio::time::sleep(delay).await;
            }

            match self.attempt(&messages, max_tokens).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "chat call failed; will retry");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::Transient("retry budget exhausted".to_owned())))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Response handling (pub for integration testing)
// ---------------------------------------------------------------------------

/// Classify an HTTP response, returning the body text on success.
///
/// 401 → [`ProviderError::Authentication`], 429 → [`ProviderError::RateLimit`]
/// with `Retry-After`, 5xx → [`ProviderError::Transient`], other non-2xx →
/// [`ProviderError::Api`].
///
/// # Errors
///
/// Returns the mapped [`ProviderError`] for any non-success status.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::Transient(e.to_string()))?;

    if status.is_success() {
        return Ok(body);
    }

    let body = sanitize_error_body(&body);
    match status.as_u16() {
        401 => Err(ProviderError::Authentication(body)),
        429 => Err(ProviderError::RateLimit { body, retry_after }),
        s if s >= 500 => Err(ProviderError::Transient(format!("status {s}: {body}"))),
        s => Err(ProviderError::Api { status: s, body }),
    }
}

/// Parse a chat-completion envelope into a [`ChatCompletion`].
///
/// # Errors
///
/// Returns [`ProviderError::Parse`] when the envelope or `choices[0]` content
/// is missing.
pub fn parse_completion(body: &str) -> Result<ChatCompletion, ProviderError> {
    let resp: WireResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("missing choices[0]".to_owned()))?;

    let content = choice
        .message
        .content
        .ok_or_else(|| ProviderError::Parse("missing choices[0].message.content".to_owned()))?;

    let tokens_used = resp
        .usage
        .as_ref()
        .and_then(|u| {
            u.total_tokens.or_else(|| {
                match (u.prompt_tokens, u.completion_tokens) {
                    (Some(p), Some(c)) => Some(p.saturating_add(c)),
                    _ => None,
                }
            })
        })
        .unwrap_or(0);

    Ok(ChatCompletion {
        content,
        model: resp.model.unwrap_or_default(),
        tokens_used,
    })
}

/// Compute the delay before attempt `attempt` (1-based for retries).
///
/// `Retry-After` from a rate-limit response wins; otherwise exponential
/// backoff `min(base·2^attempt, 30 s)` with 0–10 % jitter.
fn retry_delay(attempt: u32, last_error: Option<&ProviderError>) -> Duration {
    if let Some(ProviderError::RateLimit {
        retry_after: Some(after),
        ..
    }) = last_error
    {
        return *after;
    }

    let exp = BACKOFF_BASE_MS.saturating_mul(1_u64 << attempt.min(10));
    let capped = exp.min(BACKOFF_CAP_MS);
    let jitter = rand::thread_rng().gen_range(0.0..0.1_f64);
    let with_jitter = (capped as f64 * (1.0 + jitter)) as u64;
    Duration::from_millis(with_jitter)
}

/// Collapse whitespace, redact key-looking substrings, and truncate a
/// provider error body before it reaches logs or error messages.
fn sanitize_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [r"sk-[A-Za-z0-9]{16,}", r"Bearer [A-Za-z0-9_\-\.]{10,}"] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}
