//! Conductor System
//!
//! Schedules research tasks, evaluates agent results, and grows the task
//! graph until every branch converges, hits the iteration cap, or fails.

pub mod context;
pub mod evaluator;
pub mod orchestrator;
pub mod types;

pub use context::{Memo, RunContext};
pub use evaluator::Evaluator;
pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use types::{
    BranchOutcome, BranchReport, RunReport, Task, TaskFailure, TaskId, TaskKind, TaskStatus,
};
