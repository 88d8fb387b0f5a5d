//! LLM Provider Abstraction Layer
//!
//! This module provides a common interface for text generation across providers
//! (OpenAI, Ollama). Agents depend only on the `LLMProvider` trait; the concrete
//! provider is picked from configuration by [`build_provider`] and wrapped in a
//! [`RetryingProvider`] so transient failures are retried with backoff.

use crate::config::LLMConfig;
use crate::secrets::SecretManager;
use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod ollama;
pub mod openai;
pub mod retry;

pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
pub use retry::RetryingProvider;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl LLMError {
    /// Errors worth retrying: the same request may succeed later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LLMError::RateLimitExceeded | LLMError::Timeout | LLMError::NetworkError(_)
        )
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LLMError::Timeout
        } else {
            LLMError::NetworkError(e.to_string())
        }
    }
}

impl From<LLMError> for EngineError {
    fn from(e: LLMError) -> Self {
        EngineError::LLMProvider(e.to_string())
    }
}

/// Message in a prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// JSON schema the response must follow
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    /// Schema name, required by providers that register schemas by name
    pub name: String,
    pub schema: Value,
}

/// A single text generation request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,

    /// Constrain the output to this schema when set
    pub response_schema: Option<ResponseSchema>,

    /// Completion token limit; providers fall back to their configured default
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// A request with a single user prompt
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            response_schema: None,
            max_tokens: None,
        }
    }

    pub fn with_schema(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.response_schema = Some(ResponseSchema {
            name: name.into(),
            schema,
        });
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Generate text for the request
    ///
    /// # Returns
    /// * `Ok(String)` - The raw completion text
    /// * `Err(LLMError)` - If the request fails
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Build the configured provider, wrapped with retries
///
/// # Errors
/// Returns `EngineError::Config` for an unknown provider and
/// `EngineError::KeyringError` when a cloud provider has no API key.
pub fn build_provider(
    config: &LLMConfig,
    secrets: &SecretManager,
) -> std::result::Result<Arc<dyn LLMProvider>, EngineError> {
    let timeout = Duration::from_secs(config.request_timeout_secs);

    let inner: Arc<dyn LLMProvider> = match config.default_provider.as_str() {
        "openai" => {
            let api_key = secrets.get_secret(crate::secrets::KNOWN_KEYS[0])?;
            Arc::new(OpenAIProvider::new(config.openai.clone(), api_key, timeout)?)
        }
        "ollama" => Arc::new(OllamaProvider::new(
            config.ollama.base_url.clone(),
            config.ollama.model.clone(),
            timeout,
        )?),
        other => {
            return Err(EngineError::Config(format!(
                "Unknown LLM provider '{}'",
                other
            )))
        }
    };

    tracing::info!(
        "Using LLM provider '{}' (max_retries={})",
        inner.name(),
        config.max_retries
    );

    Ok(Arc::new(RetryingProvider::new(
        inner,
        config.max_retries,
        Duration::from_millis(config.initial_backoff_ms),
    )))
}

/// Build the shared HTTP client used by providers
pub(crate) fn http_client(timeout: Duration) -> std::result::Result<reqwest::Client, EngineError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EngineError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Extract a JSON object from model output.
///
/// Handles multiple output formats:
/// 1. Raw JSON
/// 2. Fenced JSON (with or without trailing text): ` ```json\n{...}\n``` `
/// 3. JSON embedded in prose; the first balanced `{...}` is taken
pub fn parse_json_response(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            return Some(value);
        }
    }

    let pos = trimmed.find('{')?;
    let json_str = extract_balanced_json(&trimmed[pos..])?;
    serde_json::from_str(json_str).ok()
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
/// Returns `None` if no fenced block is found.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
