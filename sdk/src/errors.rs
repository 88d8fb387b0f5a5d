//! Error types and handling
//!
//! This module provides the error types used throughout the Thinker engine.
//! All errors implement the `ThinkerErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable (transient) or
//! infrastructure-level.
//!
//! # Error Categories
//!
//! - **Scheduler invariants**: duplicate task ids, unknown dependencies.
//!   Raised synchronously when a task is registered.
//! - **Task input**: malformed task parameters. Fatal to that task only.
//! - **Collaborator**: search, scrape or text-generation failures. Transient.
//! - **Schema**: synthesis output that does not match the expected structure.
//! - **Execution**: failed dependencies, timeouts, cancellation, agent panics.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Trait for Thinker error extensions
///
/// Provides additional context for errors, including user-friendly hints and
/// recoverability information.
pub trait ThinkerErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors are transient: resubmitting the same work may
    /// succeed. Non-recoverable errors need different input or configuration.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, FailureKind, ThinkerErrorExt};
///
/// let error = EngineError::DuplicateTask("retrieval_1".to_string());
/// assert_eq!(error.failure_kind(), FailureKind::SchedulerInvariant);
/// assert!(!error.is_recoverable());
///
/// let transient = EngineError::collaborator("search", "HTTP 503");
/// assert!(transient.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Scheduler invariant errors
    #[error("Task id already registered: {0}")]
    DuplicateTask(String),

    #[error("Task {task} depends on unregistered task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    // Task input errors
    #[error("Invalid parameters for {kind} task: {reason}")]
    InvalidTaskParams { kind: String, reason: String },

    #[error("No agent registered for task type: {0}")]
    NoAgent(String),

    // Collaborator errors
    #[error("{collaborator} collaborator failed: {message}")]
    Collaborator {
        collaborator: String,
        message: String,
    },

    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    // Schema errors
    #[error("Schema error: {0}")]
    Schema(String),

    // Execution errors
    #[error("Dependency {0} did not complete")]
    DependencyFailed(String),

    #[error("Agent call timed out after {0}s")]
    AgentTimeout(u64),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Agent panicked: {0}")]
    AgentPanicked(String),

    // Keyring errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Build a collaborator error
    pub fn collaborator(collaborator: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Collaborator {
            collaborator: collaborator.into(),
            message: message.to_string(),
        }
    }

    /// Build an invalid-parameters error
    pub fn invalid_params(kind: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::InvalidTaskParams {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }

    /// Classify this error into the coarse taxonomy recorded on failed tasks
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::DuplicateTask(_) | Self::UnknownDependency { .. } => {
                FailureKind::SchedulerInvariant
            }
            Self::InvalidTaskParams { .. } | Self::NoAgent(_) => FailureKind::InvalidInput,
            Self::Collaborator { .. } | Self::LLMProvider(_) => FailureKind::Collaborator,
            Self::Schema(_) => FailureKind::Schema,
            Self::DependencyFailed(_) => FailureKind::DependencyFailed,
            Self::AgentTimeout(_) => FailureKind::Timeout,
            Self::Cancelled => FailureKind::Cancelled,
            Self::AgentPanicked(_) => FailureKind::Panicked,
            Self::Config(_) | Self::KeyringError(_) | Self::Io(_) => FailureKind::Internal,
        }
    }
}

/// Coarse failure classification stored on failed tasks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed task parameters or unsupported task type
    InvalidInput,
    /// Network or provider failure in an external collaborator
    Collaborator,
    /// Synthesis output did not parse as the expected structure
    Schema,
    /// Registration-time invariant violation
    SchedulerInvariant,
    /// A dependency ended in `failed`
    DependencyFailed,
    /// The agent call exceeded its deadline
    Timeout,
    /// The run was cancelled before the task finished
    Cancelled,
    /// The agent panicked
    Panicked,
    /// Configuration, keyring or IO failure
    Internal,
}

impl FailureKind {
    /// Transient failures may succeed if the same work is resubmitted
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Collaborator | Self::Timeout)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidInput => "invalid_input",
            Self::Collaborator => "collaborator",
            Self::Schema => "schema",
            Self::SchedulerInvariant => "scheduler_invariant",
            Self::DependencyFailed => "dependency_failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Panicked => "panicked",
            Self::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

impl ThinkerErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::DuplicateTask(_) => "Each task needs a unique id within a run",
            Self::UnknownDependency { .. } => "Register dependencies before the tasks that use them",

            Self::InvalidTaskParams { .. } => "Task parameters are missing or malformed",
            Self::NoAgent(_) => "No agent handles this task type",

            Self::Collaborator { .. } => "External service unavailable. Check the service and your network",
            Self::LLMProvider(_) => "LLM provider unavailable. Check your API keys and network",

            Self::Schema(_) => "The synthesis step returned malformed output",

            Self::DependencyFailed(_) => "An upstream task failed. Inspect the failed dependency",
            Self::AgentTimeout(_) => "The task took too long. Try again or raise agent_timeout_secs",
            Self::Cancelled => "The run was cancelled",
            Self::AgentPanicked(_) => "An agent crashed while running the task",

            Self::KeyringError(_) => "Failed to access secure storage. Check system keychain",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        self.failure_kind().is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_errors_are_not_recoverable() {
        let dup = EngineError::DuplicateTask("t1".to_string());
        let unknown = EngineError::UnknownDependency {
            task: "t2".to_string(),
            dependency: "missing".to_string(),
        };
        assert!(!dup.is_recoverable());
        assert!(!unknown.is_recoverable());
        assert_eq!(unknown.failure_kind(), FailureKind::SchedulerInvariant);
        assert_eq!(
            unknown.to_string(),
            "Task t2 depends on unregistered task missing"
        );
    }

    #[test]
    fn test_transient_vs_infrastructure() {
        assert!(EngineError::collaborator("scrape", "timeout").is_recoverable());
        assert!(EngineError::AgentTimeout(30).is_recoverable());
        assert!(!EngineError::invalid_params("retrieval", "missing query").is_recoverable());
        assert!(!EngineError::Schema("missing status".to_string()).is_recoverable());
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::DependencyFailed.to_string(), "dependency_failed");
        let json = serde_json::to_string(&FailureKind::InvalidInput).unwrap();
        assert_eq!(json, "\"invalid_input\"");
    }
}
