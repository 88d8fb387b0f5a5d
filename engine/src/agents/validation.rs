//! Validation Agent
//!
//! Checks a summary against its sources and writes a markdown report of
//! inaccuracies and unsupported claims. Summaries over the validation token
//! budget are chunked and each chunk validated on its own; the reports are
//! joined under numbered headings in document order.
//!
//! Unlike retrieval and synthesis, a generation failure here fails the task.

use super::{render_sources, Agent, AgentInput};
use crate::chunker::{wrap_with_markers, Chunker};
use crate::conductor::context::RunContext;
use crate::conductor::types::TaskKind;
use crate::llm::{GenerationRequest, LLMProvider};
use async_trait::async_trait;
use futures::future::try_join_all;
use sdk::errors::EngineError;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Completion token limit for one validation call
pub const VALIDATION_MAX_TOKENS: u32 = 5000;

pub struct ValidationAgent {
    llm: Arc<dyn LLMProvider>,
    chunker: Chunker,
}

impl ValidationAgent {
    pub fn new(llm: Arc<dyn LLMProvider>, token_budget: usize) -> Self {
        Self {
            llm,
            chunker: Chunker::new(token_budget),
        }
    }

    /// Validate `summary` against `sources`
    ///
    /// # Errors
    /// Returns `EngineError::LLMProvider` if any chunk fails to generate.
    pub async fn validate(&self, summary: &str, sources: &str) -> Result<String, EngineError> {
        Ok(self.validate_chunked(summary, sources).await?.0)
    }

    /// Report plus the number of chunks validated
    async fn validate_chunked(
        &self,
        summary: &str,
        sources: &str,
    ) -> Result<(String, usize), EngineError> {
        let chunks = self.chunker.chunk(summary);

        if chunks.len() <= 1 {
            let report = self.validate_text(summary, sources).await?;
            info!("Generated validation report");
            return Ok((report, 1));
        }

        let total = chunks.len();
        info!("Validating summary in {} chunks", total);

        let wrapped = wrap_with_markers(&chunks);
        let reports = try_join_all(wrapped.iter().map(|chunk| self.validate_text(chunk, sources))).await?;

        let report = reports
            .iter()
            .enumerate()
            .map(|(i, report)| format!("## Validation of part {}/{}\n\n{}", i + 1, total, report.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok((report, total))
    }

    async fn validate_text(&self, summary: &str, sources: &str) -> Result<String, EngineError> {
        let prompt = format!(
            "Verify the following summary against the provided sources. Identify any \
             inaccuracies or unsupported claims.\n\n\
             Summary:\n{}\n\n\
             Sources:\n{}\n\n\
             Provide a detailed validation report in Markdown format.",
            summary, sources
        );
        let request = GenerationRequest::prompt(prompt).with_max_tokens(VALIDATION_MAX_TOKENS);
        Ok(self.llm.generate(&request).await?)
    }
}

#[async_trait]
impl Agent for ValidationAgent {
    fn kind(&self) -> TaskKind {
        TaskKind::Validation
    }

    async fn execute(&self, input: AgentInput, ctx: Arc<RunContext>) -> Result<Value, EngineError> {
        let summary = input
            .param_str("summary")
            .map(String::from)
            .or_else(|| {
                input
                    .results_of(TaskKind::Synthesis)
                    .find_map(|d| d.result.get("summary").and_then(Value::as_str))
                    .map(String::from)
            })
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                EngineError::invalid_params(
                    TaskKind::Validation,
                    "no 'summary' param and no synthesis dependency with a summary",
                )
            })?;

        let sources = match input.param_str("sources") {
            Some(sources) => sources.to_string(),
            None => render_sources(input.results_of(TaskKind::Retrieval), &ctx),
        };

        let (report, chunks) = self.validate_chunked(&summary, &sources).await?;
        Ok(json!({ "report": report, "chunks": chunks }))
    }
}
