use super::{check_status, http_client, SearchClient};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::SearchResponse;
use std::time::Duration;

const NAME: &str = "search";

/// Client for the search service (`GET {base}/search?q=...`)
#[derive(Debug, Clone)]
pub struct GoogleSearchClient {
    base_url: String,
    client: reqwest::Client,
}

impl GoogleSearchClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(NAME, timeout)?,
        })
    }
}

#[async_trait]
impl SearchClient for GoogleSearchClient {
    async fn search(&self, query: &str) -> Result<SearchResponse, EngineError> {
        let url = format!("{}/search", self.base_url);
        tracing::debug!("GET {} q={}", url, query);

        let response = self
            .client
            .get(&url)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| EngineError::collaborator(NAME, e))?;

        check_status(NAME, response)
            .await?
            .json::<SearchResponse>()
            .await
            .map_err(|e| EngineError::collaborator(NAME, format!("invalid response: {}", e)))
    }
}
