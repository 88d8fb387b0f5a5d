//! Synthesis Agent
//!
//! Summarizes retrieval results into a cited markdown answer and reports
//! whether the answer is complete. An incomplete answer lists the searches or
//! scrapes that would fill the gaps; the evaluator turns those into follow-up
//! tasks.
//!
//! Generation failures never fail the task. They produce a `complete` result
//! whose summary explains the failure, which ends the branch.

use super::{render_sources, Agent, AgentInput};
use crate::conductor::context::RunContext;
use crate::conductor::types::TaskKind;
use crate::llm::{parse_json_response, GenerationRequest, LLMProvider, Message};
use crate::secrets::scrub;
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::SynthesisResult;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Completion token limit for one synthesis call
pub const SYNTHESIS_MAX_TOKENS: u32 = 3000;

const SYSTEM_PROMPT: &str = "You are a research analyst. You answer questions using only the \
sources you are given, citing them with their bracketed numbers like [1]. When the sources \
are not enough to answer well, say so and request more research.";

pub struct SynthesisAgent {
    llm: Arc<dyn LLMProvider>,
    max_tokens: u32,
}

impl SynthesisAgent {
    pub fn new(llm: Arc<dyn LLMProvider>) -> Self {
        Self {
            llm,
            max_tokens: SYNTHESIS_MAX_TOKENS,
        }
    }

    /// Produce a structured synthesis result for `query`.
    ///
    /// Always returns a value: model output is passed through for schema
    /// checking, and a generation error becomes a degraded `complete` result.
    pub async fn synthesize(&self, query: &str, sources: &str, iteration: u64) -> Value {
        let request = GenerationRequest {
            messages: vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(build_prompt(query, sources, iteration)),
            ],
            response_schema: None,
            max_tokens: Some(self.max_tokens),
        }
        .with_schema("synthesis_result", response_schema());

        match self.llm.generate(&request).await {
            Ok(text) => {
                info!("Synthesized summary for query: {}", query);
                // Unparseable output is handed on as text and rejected by the evaluator
                parse_json_response(&text).unwrap_or(Value::String(text))
            }
            Err(e) => {
                warn!("Synthesis failed for query '{}': {}", query, e);
                SynthesisResult::complete(format!(
                    "Synthesis failed for query '{}': {}",
                    query,
                    scrub(&e.to_string())
                ))
                .to_value()
            }
        }
    }
}

#[async_trait]
impl Agent for SynthesisAgent {
    fn kind(&self) -> TaskKind {
        TaskKind::Synthesis
    }

    async fn execute(&self, input: AgentInput, ctx: Arc<RunContext>) -> Result<Value, EngineError> {
        let query = input
            .param_str("query")
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| {
                EngineError::invalid_params(TaskKind::Synthesis, "'query' must be a non-empty string")
            })?
            .to_string();
        let iteration = input
            .params
            .get("iteration")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let sources = render_sources(input.results_of(TaskKind::Retrieval), &ctx);
        Ok(self.synthesize(&query, &sources, iteration).await)
    }
}

fn build_prompt(query: &str, sources: &str, iteration: u64) -> String {
    let sources = if sources.trim().is_empty() {
        "(no sources retrieved yet)"
    } else {
        sources
    };

    format!(
        "Query: '{query}'\n\n\
         Research passes completed before this one: {iteration}\n\n\
         Sources:\n{sources}\n\
         Write a detailed markdown summary answering the query, with clear headings and \
         bullet points where appropriate, citing sources as [n].\n\n\
         Set \"status\" to \"complete\" if the sources answer the query. Otherwise set it to \
         \"incomplete\" and list in \"additional_tasks\" the research that would fill the gaps:\n\
         - {{\"tool\": \"google_search\", \"parameters\": {{\"q\": \"<query>\", \"urls\": []}}}}\n\
         - {{\"tool\": \"scrape_urls\", \"parameters\": {{\"q\": \"\", \"urls\": [\"<url>\"]}}}}\n\
         Only request scrapes of URLs that appear in the sources or that you are confident exist."
    )
}

/// JSON schema of the synthesis result, in strict structured-output form
fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "status": { "type": "string", "enum": ["complete", "incomplete"] },
            "summary": { "type": "string" },
            "additional_tasks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "tool": { "type": "string", "enum": ["google_search", "scrape_urls"] },
                        "parameters": {
                            "type": "object",
                            "properties": {
                                "q": { "type": "string" },
                                "urls": { "type": "array", "items": { "type": "string" } }
                            },
                            "required": ["q", "urls"],
                            "additionalProperties": false
                        }
                    },
                    "required": ["tool", "parameters"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["status", "summary", "additional_tasks"],
        "additionalProperties": false
    })
}
