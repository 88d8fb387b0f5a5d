//! Retry wrapper for LLM providers
//!
//! Retries rate-limit, timeout and network errors with exponential backoff.
//! Every other error is returned on the first attempt.

use super::{GenerationRequest, LLMProvider, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on a single backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct RetryingProvider {
    inner: Arc<dyn LLMProvider>,
    max_retries: u32,
    initial_backoff: Duration,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LLMProvider>, max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            initial_backoff,
        }
    }
}

#[async_trait]
impl LLMProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            match self.inner.generate(request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "{} request failed ({}), retry {}/{} in {:?}",
                        self.inner.name(),
                        e,
                        attempt,
                        self.max_retries,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
