use super::{check_status, http_client, ScrapeClient};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::ScrapeResponse;
use serde::Serialize;
use std::time::Duration;

const NAME: &str = "scrape";

/// Client for the scrape service (`POST {base}/batch_scrape_urls`)
#[derive(Debug, Clone)]
pub struct FirecrawlClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct BatchScrapeRequest<'a> {
    urls: &'a [String],
    formats: [&'static str; 1],
    force_fetch: bool,
}

impl FirecrawlClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(NAME, timeout)?,
        })
    }
}

#[async_trait]
impl ScrapeClient for FirecrawlClient {
    async fn scrape(
        &self,
        urls: &[String],
        use_cache: bool,
    ) -> Result<ScrapeResponse, EngineError> {
        let url = format!("{}/batch_scrape_urls", self.base_url);
        let body = BatchScrapeRequest {
            urls,
            formats: ["markdown"],
            force_fetch: !use_cache,
        };
        tracing::debug!("POST {} ({} urls, force_fetch={})", url, urls.len(), !use_cache);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::collaborator(NAME, e))?;

        check_status(NAME, response)
            .await?
            .json::<ScrapeResponse>()
            .await
            .map_err(|e| EngineError::collaborator(NAME, format!("invalid response: {}", e)))
    }
}
