//! Retrieval Agent
//!
//! Runs web searches and page scrapes through the collaborators, memoized per
//! run by exact query or URL. Collaborator failures never fail the task: they
//! come back as error-shaped records or placeholder text so synthesis can see
//! what went wrong. Only malformed parameters fail a retrieval task.
//!
//! Parameters (first match wins):
//! - `query`: search results, `{"query", "results": [records]}`
//! - `url`: one page, `{"url", "content"}`
//! - `urls`: a batch of pages, `{"pages": [{"url", "content"}]}`
//! - `use_cache` (optional, default true): allow the scrape service to serve cached pages

use super::{Agent, AgentInput};
use crate::chunker::Chunker;
use crate::conductor::context::RunContext;
use crate::conductor::types::TaskKind;
use crate::secrets::scrub;
use crate::tools::Collaborators;
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::SearchRecord;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct RetrievalAgent {
    collaborators: Collaborators,
    /// Cuts page text to the configured budget on output
    page_chunker: Chunker,
}

impl RetrievalAgent {
    pub fn new(collaborators: Collaborators, page_token_budget: usize) -> Self {
        Self {
            collaborators,
            page_chunker: Chunker::new(page_token_budget),
        }
    }

    /// Search results for `query`; a failed lookup yields one error record
    pub async fn search(&self, ctx: &RunContext, query: &str) -> Vec<SearchRecord> {
        let (records, hit) = ctx
            .searches()
            .get_or_init(query, || async {
                match self.collaborators.search.search(query).await {
                    Ok(response) => {
                        info!("Retrieved {} search result(s) for '{}'", response.items.len(), query);
                        response.items
                    }
                    Err(e) => {
                        error!("Search failed for query '{}': {}", query, e);
                        vec![SearchRecord::error(query, scrub(&e.to_string()))]
                    }
                }
            })
            .await;

        if hit {
            debug!("Cache hit for search query: {}", query);
        }
        records
    }

    /// Markdown of one page, or a bracketed placeholder explaining why not
    pub async fn retrieve_webpage(&self, ctx: &RunContext, url: &str, use_cache: bool) -> String {
        let (content, hit) = ctx
            .pages()
            .get_or_init(url, || async {
                let urls = [url.to_string()];
                match self.collaborators.scrape.scrape(&urls, use_cache).await {
                    Ok(response) => match response.data.into_iter().next() {
                        Some(page) => page_content(url, page.markdown),
                        None => {
                            warn!("Empty response from scrape service for {}", url);
                            no_content(url)
                        }
                    },
                    Err(e) => {
                        error!("Webpage retrieval failed for URL '{}': {}", url, e);
                        retrieval_error(url, &e)
                    }
                }
            })
            .await;

        if hit {
            debug!("Cache hit for URL: {}", url);
        }
        content
    }

    /// Page contents in input order, scraping only URLs not cached yet
    pub async fn retrieve_webpages(
        &self,
        ctx: &RunContext,
        urls: &[String],
        use_cache: bool,
    ) -> Vec<String> {
        let mut seen = HashSet::new();
        let to_fetch: Vec<String> = urls
            .iter()
            .filter(|u| ctx.pages().get(u).is_none() && seen.insert(u.as_str()))
            .cloned()
            .collect();

        if !to_fetch.is_empty() {
            match self.collaborators.scrape.scrape(&to_fetch, use_cache).await {
                Ok(response) if response.data.len() == to_fetch.len() => {
                    for (url, page) in to_fetch.iter().zip(response.data) {
                        ctx.pages().insert(url, page_content(url, page.markdown));
                    }
                    info!("Retrieved {} webpage(s) in one batch", to_fetch.len());
                }
                Ok(response) => {
                    warn!(
                        "Batch scrape returned {} page(s) for {} URL(s)",
                        response.data.len(),
                        to_fetch.len()
                    );
                    for url in &to_fetch {
                        ctx.pages().insert(url, no_content(url));
                    }
                }
                Err(e) => {
                    error!("Batch webpages retrieval failed: {}", e);
                    for url in &to_fetch {
                        ctx.pages().insert(url, retrieval_error(url, &e));
                    }
                }
            }
        }

        urls.iter()
            .map(|url| ctx.pages().get(url).unwrap_or_else(|| no_content(url)))
            .collect()
    }
}

fn page_content(url: &str, markdown: Option<String>) -> String {
    match markdown {
        Some(text) if !text.is_empty() => text,
        _ => {
            warn!("No markdown content found at {}. Using placeholder.", url);
            format!("[No data found from {}]", url)
        }
    }
}

fn no_content(url: &str) -> String {
    format!("[No content retrieved from {}]", url)
}

fn retrieval_error(url: &str, e: &EngineError) -> String {
    format!("[Error retrieving {}: {}]", url, scrub(&e.to_string()))
}

#[async_trait]
impl Agent for RetrievalAgent {
    fn kind(&self) -> TaskKind {
        TaskKind::Retrieval
    }

    async fn execute(&self, input: AgentInput, ctx: Arc<RunContext>) -> Result<Value, EngineError> {
        let use_cache = match input.params.get("use_cache") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(EngineError::invalid_params(
                    TaskKind::Retrieval,
                    format!("'use_cache' must be a boolean, got {}", other),
                ))
            }
        };

        if let Some(query) = input.params.get("query") {
            // Memo keys are the exact query string
            let query = query
                .as_str()
                .filter(|q| !q.trim().is_empty())
                .ok_or_else(|| {
                    EngineError::invalid_params(TaskKind::Retrieval, "'query' must be a non-empty string")
                })?;
            let records = self.search(&ctx, query).await;
            return Ok(json!({ "query": query, "results": records }));
        }

        if let Some(url) = input.params.get("url") {
            let url = url
                .as_str()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| {
                    EngineError::invalid_params(TaskKind::Retrieval, "'url' must be a non-empty string")
                })?;
            let content = self.retrieve_webpage(&ctx, url, use_cache).await;
            return Ok(json!({ "url": url, "content": self.page_chunker.truncate(&content) }));
        }

        if let Some(urls) = input.params.get("urls") {
            let urls: Vec<String> = urls
                .as_array()
                .ok_or_else(|| {
                    EngineError::invalid_params(TaskKind::Retrieval, "'urls' must be an array")
                })?
                .iter()
                .map(|u| {
                    u.as_str()
                        .filter(|s| !s.trim().is_empty())
                        .map(String::from)
                        .ok_or_else(|| {
                            EngineError::invalid_params(
                                TaskKind::Retrieval,
                                format!("'urls' entries must be non-empty strings, got {}", u),
                            )
                        })
                })
                .collect::<Result<_, _>>()?;
            if urls.is_empty() {
                return Err(EngineError::invalid_params(TaskKind::Retrieval, "'urls' is empty"));
            }

            let contents = self.retrieve_webpages(&ctx, &urls, use_cache).await;
            let pages: Vec<Value> = urls
                .iter()
                .zip(contents)
                .map(|(url, content)| json!({ "url": url, "content": self.page_chunker.truncate(&content) }))
                .collect();
            return Ok(json!({ "pages": pages }));
        }

        Err(EngineError::invalid_params(
            TaskKind::Retrieval,
            "expected one of 'query', 'url' or 'urls'",
        ))
    }
}
