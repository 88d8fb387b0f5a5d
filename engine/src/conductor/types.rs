//! Conductor types: tasks, outcomes and the run report

use crate::secrets;
use sdk::errors::{EngineError, FailureKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Registry key of a task, unique within a run
pub type TaskId = String;

/// Kind of work a task performs; each kind is served by one agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Retrieval,
    Synthesis,
    Validation,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Retrieval => write!(f, "retrieval"),
            TaskKind::Synthesis => write!(f, "synthesis"),
            TaskKind::Validation => write!(f, "validation"),
        }
    }
}

/// Lifecycle state. Transitions only move forward:
/// `pending -> in_progress -> completed | failed`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Classified failure stored on a failed task in place of a result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
    pub transient: bool,
}

impl From<&EngineError> for TaskFailure {
    fn from(e: &EngineError) -> Self {
        let kind = e.failure_kind();
        Self {
            kind,
            message: secrets::scrub(&e.to_string()),
            transient: kind.is_transient(),
        }
    }
}

impl From<EngineError> for TaskFailure {
    fn from(e: EngineError) -> Self {
        Self::from(&e)
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A unit of schedulable work
///
/// Identity (`id`, `kind`, `params`, `dependencies`) is fixed at creation.
/// Status, result and failure are written only by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,

    #[serde(rename = "type")]
    kind: TaskKind,

    #[serde(default)]
    params: Map<String, Value>,

    #[serde(default)]
    dependencies: Vec<TaskId>,

    status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<TaskFailure>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind,
            params: Map::new(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            result: None,
            failure: None,
        }
    }

    /// Search the web for `query`
    pub fn retrieval(id: impl Into<TaskId>, query: impl Into<String>) -> Self {
        Self::new(id, TaskKind::Retrieval).with_param("query", Value::String(query.into()))
    }

    /// Fetch a single page
    pub fn retrieval_url(id: impl Into<TaskId>, url: impl Into<String>) -> Self {
        Self::new(id, TaskKind::Retrieval).with_param("url", Value::String(url.into()))
    }

    /// Fetch several pages in one batch
    pub fn retrieval_urls(id: impl Into<TaskId>, urls: Vec<String>) -> Self {
        Self::new(id, TaskKind::Retrieval).with_param(
            "urls",
            Value::Array(urls.into_iter().map(Value::String).collect()),
        )
    }

    /// Answer `query` from the results of its dependencies
    pub fn synthesis(id: impl Into<TaskId>, query: impl Into<String>) -> Self {
        Self::new(id, TaskKind::Synthesis).with_param("query", Value::String(query.into()))
    }

    /// Check a summary against its sources
    pub fn validation(id: impl Into<TaskId>) -> Self {
        Self::new(id, TaskKind::Validation)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Add dependencies, keeping first-seen order and dropping repeats
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        for id in ids {
            let id = id.into();
            if !self.dependencies.contains(&id) {
                self.dependencies.push(id);
            }
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Result of a completed task
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Failure of a failed task
    pub fn failure(&self) -> Option<&TaskFailure> {
        self.failure.as_ref()
    }

    pub(crate) fn reset_state(&mut self) {
        self.status = TaskStatus::Pending;
        self.result = None;
        self.failure = None;
    }

    pub(crate) fn mark_in_progress(&mut self) {
        self.status = TaskStatus::InProgress;
    }

    pub(crate) fn mark_completed(&mut self, result: Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
    }

    pub(crate) fn mark_failed(&mut self, failure: TaskFailure) {
        self.status = TaskStatus::Failed;
        self.failure = Some(failure);
    }
}

/// Retrieval work requested by a synthesis pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalRequest {
    Query(String),
    Url(String),
}

/// What the scheduler should do after a task completes
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    /// Spawn the retrievals, then another synthesis pass for `query`
    Replan {
        retrievals: Vec<RetrievalRequest>,
        query: String,
        iteration: u32,
    },
    /// The branch is finished
    Deliver(BranchOutcome),
}

/// Evaluated result of one agent call
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed {
        result: Value,
        follow_up: Option<FollowUp>,
    },
    Failed(TaskFailure),
}

/// How a branch of synthesis passes ended
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BranchOutcome {
    /// Synthesis reported `complete`
    Converged { summary: String },
    /// The iteration cap stopped replanning while still `incomplete`
    CapExhausted { summary: String },
    /// The last synthesis task failed
    Failed { error: String },
}

impl BranchOutcome {
    /// The deliverable, if the branch produced a non-blank one
    pub fn summary(&self) -> Option<&str> {
        match self {
            BranchOutcome::Converged { summary } | BranchOutcome::CapExhausted { summary } => {
                Some(summary.as_str()).filter(|s| !s.trim().is_empty())
            }
            BranchOutcome::Failed { .. } => None,
        }
    }

    /// Fill a blank summary with the last one the branch produced
    pub fn or_summary(self, fallback: Option<String>) -> Self {
        let Some(fallback) = fallback else {
            return self;
        };
        match self {
            BranchOutcome::Converged { summary } if summary.trim().is_empty() => {
                BranchOutcome::Converged { summary: fallback }
            }
            BranchOutcome::CapExhausted { summary } if summary.trim().is_empty() => {
                BranchOutcome::CapExhausted { summary: fallback }
            }
            other => other,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BranchOutcome::Converged { .. } => "converged",
            BranchOutcome::CapExhausted { .. } => "cap_exhausted",
            BranchOutcome::Failed { .. } => "failed",
        }
    }
}

/// A chain of synthesis passes started by one seed synthesis task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchReport {
    /// The seed synthesis task
    pub root: TaskId,

    /// The most recent synthesis task of the branch
    pub last_synthesis: TaskId,

    /// `None` while the branch is still running
    pub outcome: Option<BranchOutcome>,

    /// Validation spawned for the deliverable, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<TaskId>,
}

/// Final state of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Every task, in registration order
    pub tasks: Vec<Task>,
    pub branches: Vec<BranchReport>,
    /// Synthesis completions counted during the run
    pub iterations: u32,
    pub cancelled: bool,
}

impl RunReport {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status() == status).count()
    }

    pub fn count_kind(&self, kind: TaskKind) -> usize {
        self.tasks.iter().filter(|t| t.kind() == kind).count()
    }

    /// Validation report text for a branch, when its validation completed
    pub fn validation_report(&self, branch: &BranchReport) -> Option<&str> {
        let id = branch.validation.as_deref()?;
        self.task(id)?.result()?.get("report")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dependencies_deduplicated_in_order() {
        let task = Task::synthesis("s", "q").depends_on(["b", "a", "b", "c"]);
        assert_eq!(task.dependencies(), &["b", "a", "c"]);
    }

    #[test]
    fn test_constructors_set_params() {
        let task = Task::retrieval_urls("r", vec!["http://a".into(), "http://b".into()]);
        assert_eq!(task.kind(), TaskKind::Retrieval);
        assert_eq!(task.params()["urls"], json!(["http://a", "http://b"]));
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.result().is_none());
    }

    #[test]
    fn test_failure_from_error_is_scrubbed() {
        let err = EngineError::collaborator(
            "search",
            "401 for key sk-1234567890abcdefghijklmnop",
        );
        let failure = TaskFailure::from(&err);
        assert_eq!(failure.kind, FailureKind::Collaborator);
        assert!(failure.transient);
        assert!(failure.message.contains("[REDACTED]"));
        assert!(!failure.message.contains("sk-1234567890"));
    }

    #[test]
    fn test_task_serializes_type_field() {
        let value = serde_json::to_value(Task::retrieval("r1", "rust")).unwrap();
        assert_eq!(value["type"], "retrieval");
        assert_eq!(value["status"], "pending");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_branch_outcome_tagging() {
        let outcome = BranchOutcome::CapExhausted {
            summary: "partial".into(),
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"outcome": "cap_exhausted", "summary": "partial"})
        );
        assert_eq!(outcome.summary(), Some("partial"));
        assert_eq!(BranchOutcome::Failed { error: "x".into() }.summary(), None);
    }

    #[test]
    fn test_blank_summary_is_no_deliverable() {
        let blank = BranchOutcome::CapExhausted {
            summary: "  ".into(),
        };
        assert_eq!(blank.summary(), None);
        assert_eq!(
            blank.clone().or_summary(Some("earlier".into())),
            BranchOutcome::CapExhausted {
                summary: "earlier".into()
            }
        );
        assert_eq!(blank.clone().or_summary(None), blank);

        let kept = BranchOutcome::Converged {
            summary: "final".into(),
        };
        assert_eq!(kept.clone().or_summary(Some("earlier".into())), kept);
    }
}
