//! External collaborators used by the retrieval agent
//!
//! Search and scrape are reached through traits so agents can run against the
//! bundled HTTP clients or any other implementation (fakes in tests).

pub mod scrape;
pub mod search;

pub use scrape::FirecrawlClient;
pub use search::GoogleSearchClient;

use crate::config::CollaboratorsConfig;
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{ScrapeResponse, SearchResponse};
use std::sync::Arc;
use std::time::Duration;

/// Web search collaborator
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Run a query and return the result records
    ///
    /// # Errors
    /// Returns `EngineError::Collaborator` on network, HTTP or decoding failure.
    async fn search(&self, query: &str) -> Result<SearchResponse, EngineError>;
}

/// Page scraping collaborator
#[async_trait]
pub trait ScrapeClient: Send + Sync {
    /// Scrape pages as markdown. Results are ordered like `urls`.
    ///
    /// `use_cache = false` asks the service for a fresh fetch.
    async fn scrape(&self, urls: &[String], use_cache: bool)
        -> Result<ScrapeResponse, EngineError>;
}

/// The collaborators handed to the retrieval agent
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn SearchClient>,
    pub scrape: Arc<dyn ScrapeClient>,
}

impl Collaborators {
    /// HTTP clients for the configured endpoints
    pub fn from_config(config: &CollaboratorsConfig) -> Result<Self, EngineError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        Ok(Self {
            search: Arc::new(GoogleSearchClient::new(&config.search_base_url, timeout)?),
            scrape: Arc::new(FirecrawlClient::new(&config.scrape_base_url, timeout)?),
        })
    }
}

/// Turn a non-2xx response into a collaborator error carrying the body
pub(crate) async fn check_status(
    collaborator: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EngineError::collaborator(
        collaborator,
        format!("HTTP {}: {}", status, body.trim()),
    ))
}

pub(crate) fn http_client(collaborator: &str, timeout: Duration) -> Result<reqwest::Client, EngineError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EngineError::collaborator(collaborator, e))
}
