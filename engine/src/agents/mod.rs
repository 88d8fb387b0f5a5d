//! Task Agents
//!
//! One stateless agent per task kind. The orchestrator hands each agent an
//! owned copy of the task parameters, the results of its dependencies in
//! dependency order, and the shared run context. Agents never touch the task
//! registry.

pub mod retrieval;
pub mod synthesis;
pub mod validation;

pub use retrieval::RetrievalAgent;
pub use synthesis::SynthesisAgent;
pub use validation::ValidationAgent;

use crate::conductor::context::RunContext;
use crate::conductor::types::{TaskId, TaskKind};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::SearchRecord;
use serde_json::{Map, Value};
use std::fmt::Write;
use std::sync::Arc;

/// Result of a completed dependency
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyResult {
    pub id: TaskId,
    pub kind: TaskKind,
    pub result: Value,
}

/// Everything an agent needs to execute one task
#[derive(Debug, Clone)]
pub struct AgentInput {
    pub task_id: TaskId,
    pub params: Map<String, Value>,
    pub dependencies: Vec<DependencyResult>,
}

impl AgentInput {
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Results of dependencies of the given kind, in dependency order
    pub fn results_of(&self, kind: TaskKind) -> impl Iterator<Item = &DependencyResult> {
        self.dependencies.iter().filter(move |d| d.kind == kind)
    }
}

/// Executor for one kind of task
#[async_trait]
pub trait Agent: Send + Sync {
    /// The task kind this agent serves
    fn kind(&self) -> TaskKind;

    /// Execute a task and return its result.
    ///
    /// # Errors
    /// An error marks the task failed; it never aborts the run.
    async fn execute(&self, input: AgentInput, ctx: Arc<RunContext>) -> Result<Value, EngineError>;
}

/// Render retrieval results as numbered sources for a prompt.
///
/// Links are numbered through the run's citation registry, so a source keeps
/// its `[n]` across synthesis passes and validation.
pub fn render_sources<'a>(
    retrievals: impl IntoIterator<Item = &'a DependencyResult>,
    ctx: &RunContext,
) -> String {
    let mut out = String::new();

    for dep in retrievals {
        let result = &dep.result;

        if let Some(records) = result.get("results").and_then(Value::as_array) {
            let query = result.get("query").and_then(Value::as_str).unwrap_or_default();
            for record in records {
                let Ok(record) = serde_json::from_value::<SearchRecord>(record.clone()) else {
                    continue;
                };
                if record.is_error() || record.link.is_empty() {
                    let _ = writeln!(out, "(search '{}': {})\n", query, record.snippet);
                    continue;
                }
                let n = ctx.cite(&record.link);
                let _ = writeln!(
                    out,
                    "[{}] {} - {}\n{}\n",
                    n, record.title, record.link, record.snippet
                );
            }
        }

        if let (Some(url), Some(content)) = (
            result.get("url").and_then(Value::as_str),
            result.get("content").and_then(Value::as_str),
        ) {
            render_page(&mut out, ctx, url, content);
        }

        if let Some(pages) = result.get("pages").and_then(Value::as_array) {
            for page in pages {
                if let (Some(url), Some(content)) = (
                    page.get("url").and_then(Value::as_str),
                    page.get("content").and_then(Value::as_str),
                ) {
                    render_page(&mut out, ctx, url, content);
                }
            }
        }
    }

    out
}

fn render_page(out: &mut String, ctx: &RunContext, url: &str, content: &str) {
    let n = ctx.cite(url);
    let _ = writeln!(out, "[{}] {}\n{}\n", n, url, content);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dep(result: Value) -> DependencyResult {
        DependencyResult {
            id: "r".to_string(),
            kind: TaskKind::Retrieval,
            result,
        }
    }

    #[test]
    fn test_render_sources_numbers_links() {
        let ctx = RunContext::new();
        let deps = vec![
            dep(json!({"query": "q", "results": [
                {"title": "A", "link": "http://a", "snippet": "first"},
                {"title": "[Error]", "link": "", "snippet": "No data found for 'q' due to error: down"}
            ]})),
            dep(json!({"url": "http://b", "content": "# B"})),
            dep(json!({"pages": [{"url": "http://a", "content": "# A page"}]})),
        ];

        let text = render_sources(&deps, &ctx);
        assert!(text.contains("[1] A - http://a\nfirst"));
        assert!(text.contains("(search 'q': No data found"));
        assert!(text.contains("[2] http://b\n# B"));
        // Same link keeps its number
        assert!(text.contains("[1] http://a\n# A page"));
    }
}
