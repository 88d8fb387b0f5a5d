use super::{GenerationRequest, LLMError, LLMProvider};
use crate::config::OpenAIConfig;
use crate::secrets::SecretString;
use async_trait::async_trait;
use sdk::errors::EngineError;
use serde_json::json;
use std::time::Duration;

pub struct OpenAIProvider {
    config: OpenAIConfig,
    api_key: SecretString,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(
        config: OpenAIConfig,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            config,
            api_key,
            client: super::http_client(timeout)?,
        })
    }

    fn build_payload(&self, request: &GenerationRequest) -> serde_json::Value {
        let messages: Vec<_> = request
            .messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content
                })
            })
            .collect();

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
        });

        if let Some(schema) = &request.response_schema {
            payload["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": true
                }
            });
        }

        payload
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &GenerationRequest) -> super::Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let payload = self.build_payload(request);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(LLMError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                500..=599 => LLMError::NetworkError(format!("HTTP {}: {}", status, text)),
                _ => LLMError::InvalidRequest(text),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let choice = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| LLMError::ParseError("No choices in response".to_string()))?;

        if let Some(refusal) = choice
            .pointer("/message/refusal")
            .and_then(|r| r.as_str())
        {
            return Err(LLMError::InvalidRequest(format!("Model refused: {}", refusal)));
        }

        choice
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(String::from)
            .ok_or_else(|| LLMError::ParseError("Empty content".to_string()))
    }
}
