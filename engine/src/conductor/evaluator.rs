//! Conductor Evaluator
//!
//! Turns a raw agent result into a `TaskOutcome`. For synthesis tasks this is
//! where convergence is decided: a `complete` result ends the branch, an
//! `incomplete` one asks for more retrieval until the iteration cap is reached.

use crate::conductor::types::{
    BranchOutcome, FollowUp, RetrievalRequest, TaskFailure, TaskKind, TaskOutcome,
};
use sdk::errors::EngineError;
use sdk::types::{SynthesisResult, ToolRequest};
use serde_json::Value;
use tracing::warn;

/// Default number of synthesis passes before replanning stops
pub const DEFAULT_MAX_ITERATIONS: u32 = 8;

#[derive(Debug, Clone)]
pub struct Evaluator {
    max_iterations: u32,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

impl Evaluator {
    pub fn new(max_iterations: u32) -> Self {
        Self { max_iterations }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Evaluate the result of a successful agent call.
    ///
    /// `iteration` is the run's synthesis counter after counting this
    /// completion; it only matters for synthesis tasks. `query` is the query
    /// a follow-up pass inherits.
    pub fn evaluate(&self, kind: TaskKind, result: Value, iteration: u32, query: &str) -> TaskOutcome {
        match kind {
            TaskKind::Retrieval | TaskKind::Validation => TaskOutcome::Completed {
                result,
                follow_up: None,
            },
            TaskKind::Synthesis => self.evaluate_synthesis(result, iteration, query),
        }
    }

    fn evaluate_synthesis(&self, result: Value, iteration: u32, query: &str) -> TaskOutcome {
        let parsed = match SynthesisResult::from_value(&result) {
            Ok(parsed) => parsed,
            Err(e) => {
                return TaskOutcome::Failed(TaskFailure::from(EngineError::Schema(format!(
                    "synthesis result does not match schema: {}",
                    e
                ))))
            }
        };

        let follow_up = if parsed.is_complete() {
            FollowUp::Deliver(BranchOutcome::Converged {
                summary: parsed.summary,
            })
        } else if iteration < self.max_iterations {
            FollowUp::Replan {
                retrievals: retrieval_requests(&parsed),
                query: query.to_string(),
                iteration,
            }
        } else {
            warn!(
                "Iteration cap of {} reached with synthesis still incomplete",
                self.max_iterations
            );
            FollowUp::Deliver(BranchOutcome::CapExhausted {
                summary: parsed.summary,
            })
        };

        TaskOutcome::Completed {
            result,
            follow_up: Some(follow_up),
        }
    }
}

/// Retrieval work for each valid `additional_tasks` entry, in order.
/// Malformed entries and unknown tools are skipped.
fn retrieval_requests(result: &SynthesisResult) -> Vec<RetrievalRequest> {
    let mut requests = Vec::new();
    for task in &result.additional_tasks {
        match task.request() {
            Ok(ToolRequest::GoogleSearch { query }) => {
                requests.push(RetrievalRequest::Query(query));
            }
            Ok(ToolRequest::ScrapeUrls { urls }) => {
                requests.extend(urls.into_iter().map(RetrievalRequest::Url));
            }
            Err(e) => warn!("Skipping additional task '{}': {}", task.tool, e),
        }
    }
    requests
}
