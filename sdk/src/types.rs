//! Wire types exchanged between agents, collaborators and the orchestrator

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Convergence status reported by a synthesis pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisStatus {
    /// The summary answers the query
    Complete,
    /// More evidence is needed; see `additional_tasks`
    Incomplete,
}

/// Structured output of a synthesis pass
///
/// ```json
/// {
///   "status": "incomplete",
///   "summary": "Partial answer [1]",
///   "additional_tasks": [
///     {"tool": "google_search", "parameters": {"q": "follow-up"}},
///     {"tool": "scrape_urls", "parameters": {"urls": ["https://a.example"]}}
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisResult {
    pub status: SynthesisStatus,

    #[serde(default)]
    pub summary: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_tasks: Vec<AdditionalTask>,
}

impl SynthesisResult {
    /// A converged result with no follow-up work
    pub fn complete(summary: impl Into<String>) -> Self {
        Self {
            status: SynthesisStatus::Complete,
            summary: summary.into(),
            additional_tasks: Vec::new(),
        }
    }

    /// An incomplete result requesting more work
    pub fn incomplete(summary: impl Into<String>, additional_tasks: Vec<AdditionalTask>) -> Self {
        Self {
            status: SynthesisStatus::Incomplete,
            summary: summary.into(),
            additional_tasks,
        }
    }

    /// Parse a result from an opaque JSON value
    pub fn from_value(value: &Value) -> Result<Self, String> {
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn is_complete(&self) -> bool {
        self.status == SynthesisStatus::Complete
    }
}

/// A follow-up tool request emitted by an incomplete synthesis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdditionalTask {
    pub tool: String,

    #[serde(default)]
    pub parameters: Value,
}

/// Typed view of an `AdditionalTask`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRequest {
    GoogleSearch { query: String },
    ScrapeUrls { urls: Vec<String> },
}

impl AdditionalTask {
    pub fn google_search(query: impl Into<String>) -> Self {
        Self {
            tool: "google_search".to_string(),
            parameters: serde_json::json!({ "q": query.into() }),
        }
    }

    pub fn scrape_urls(urls: Vec<String>) -> Self {
        Self {
            tool: "scrape_urls".to_string(),
            parameters: serde_json::json!({ "urls": urls }),
        }
    }

    /// Interpret the request; unknown tools and malformed parameters are rejected
    pub fn request(&self) -> Result<ToolRequest, String> {
        match self.tool.as_str() {
            "google_search" => {
                let query = self
                    .parameters
                    .get("q")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .ok_or_else(|| "google_search requires a non-empty 'q'".to_string())?;
                Ok(ToolRequest::GoogleSearch {
                    query: query.to_string(),
                })
            }
            "scrape_urls" => {
                let urls: Vec<String> = self
                    .parameters
                    .get("urls")
                    .and_then(Value::as_array)
                    .ok_or_else(|| "scrape_urls requires a 'urls' array".to_string())?
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(String::from)
                    .collect();
                Ok(ToolRequest::ScrapeUrls { urls })
            }
            other => Err(format!("unknown tool '{}'", other)),
        }
    }
}

/// One web search hit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRecord {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub link: String,

    #[serde(default)]
    pub snippet: String,

    /// Provider-specific fields passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SearchRecord {
    pub fn new(
        title: impl Into<String>,
        link: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            snippet: snippet.into(),
            extra: Map::new(),
        }
    }

    /// The record substituted for a failed lookup
    pub fn error(query: &str, error: impl std::fmt::Display) -> Self {
        Self::new(
            "[Error]",
            "",
            format!("No data found for '{}' due to error: {}", query, error),
        )
    }

    pub fn is_error(&self) -> bool {
        self.title == "[Error]" && self.link.is_empty()
    }
}

/// Response of the search collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub items: Vec<SearchRecord>,
}

/// One scraped page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapedPage {
    #[serde(default)]
    pub markdown: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response of the scrape collaborator, ordered like the requested URLs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeResponse {
    #[serde(default)]
    pub data: Vec<ScrapedPage>,
}
