//! Orchestrator
//!
//! Owns the task registry and the ready queue, dispatches ready tasks to the
//! agent for their kind, and grows the task graph when a synthesis pass asks
//! for more evidence.
//!
//! Scheduling is event driven: every registered task keeps a count of
//! dependencies that have not completed yet, and every task keeps the list of
//! tasks waiting on it. Completing a task decrements its dependents' counts
//! and queues the ones that reach zero. Failing a task fails all of its
//! transitive dependents.
//!
//! Agents run on a `JoinSet`, at most `max_concurrency` at a time. Only the
//! scheduler loop touches the registry; agents get owned copies of their
//! inputs.
//!
//! # Examples
//!
//! ```no_run
//! use thinker_engine::conductor::{Orchestrator, OrchestratorOptions, Task};
//!
//! # async fn demo() -> Result<(), sdk::errors::EngineError> {
//! let mut orchestrator = Orchestrator::new(OrchestratorOptions::default());
//! orchestrator.add_task(Task::retrieval("retrieval-1", "rust async runtimes"))?;
//! orchestrator.add_task(
//!     Task::synthesis("synthesis-1", "rust async runtimes").depends_on(["retrieval-1"]),
//! )?;
//! let report = orchestrator.run().await;
//! println!("{} iterations", report.iterations);
//! # Ok(())
//! # }
//! ```

use crate::agents::{Agent, AgentInput, DependencyResult};
use crate::config::OrchestratorConfig;
use crate::conductor::context::RunContext;
use crate::conductor::evaluator::Evaluator;
use crate::conductor::types::{
    BranchOutcome, BranchReport, FollowUp, RetrievalRequest, RunReport, Task, TaskFailure,
    TaskId, TaskKind, TaskOutcome, TaskStatus,
};
use futures::FutureExt;
use sdk::errors::EngineError;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Synthesis completions after which replanning stops
    pub max_iterations: u32,
    /// Agents running at the same time
    pub max_concurrency: usize,
    /// Deadline for one agent call
    pub agent_timeout: Duration,
    /// Spawn a validation task for each branch deliverable
    pub validate_deliverables: bool,
}

impl From<&OrchestratorConfig> for OrchestratorOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_concurrency: config.max_concurrency.max(1),
            agent_timeout: Duration::from_secs(config.agent_timeout_secs),
            validate_deliverables: config.validate_deliverables,
        }
    }
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

type Observer = Box<dyn Fn(&Task) + Send + Sync>;
type AgentResult = (TaskId, Result<Value, EngineError>);

pub struct Orchestrator {
    options: OrchestratorOptions,
    evaluator: Evaluator,
    agents: HashMap<TaskKind, Arc<dyn Agent>>,
    context: Arc<RunContext>,

    tasks: HashMap<TaskId, Task>,
    /// Registration order
    order: Vec<TaskId>,
    /// Dependencies not yet completed, for tasks still waiting
    pending: HashMap<TaskId, usize>,
    /// Reverse dependency edges
    dependents: HashMap<TaskId, Vec<TaskId>>,
    ready: VecDeque<TaskId>,

    /// Every retrieval task registered so far
    retrievals: Vec<TaskId>,
    /// Synthesis task id -> index into `branches`
    branch_of: HashMap<TaskId, usize>,
    branches: Vec<BranchReport>,
    /// Latest non-blank summary per branch
    summaries: HashMap<usize, String>,

    observer: Option<Observer>,
    cancelled: bool,
}

impl Orchestrator {
    pub fn new(options: OrchestratorOptions) -> Self {
        Self {
            evaluator: Evaluator::new(options.max_iterations),
            options,
            agents: HashMap::new(),
            context: Arc::new(RunContext::new()),
            tasks: HashMap::new(),
            order: Vec::new(),
            pending: HashMap::new(),
            dependents: HashMap::new(),
            ready: VecDeque::new(),
            retrievals: Vec::new(),
            branch_of: HashMap::new(),
            branches: Vec::new(),
            summaries: HashMap::new(),
            observer: None,
            cancelled: false,
        }
    }

    /// Register the agent serving `agent.kind()`, replacing any previous one
    pub fn register_agent(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.kind(), agent);
    }

    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.register_agent(agent);
        self
    }

    /// Hook invoked with each task right before its agent runs
    pub fn on_task_start(&mut self, observer: impl Fn(&Task) + Send + Sync + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// Shared state of this run
    pub fn context(&self) -> &Arc<RunContext> {
        &self.context
    }

    /// Register a task and queue it once its dependencies complete.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the registry untouched, if:
    /// - the id is already registered (`DuplicateTask`)
    /// - a dependency id was never registered (`UnknownDependency`)
    pub fn add_task(&mut self, task: Task) -> Result<(), EngineError> {
        self.register(task, None)
    }

    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Tasks in registration order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Results of every completed task, keyed by id
    pub fn completed_results(&self) -> HashMap<TaskId, Value> {
        self.tasks
            .values()
            .filter_map(|t| t.result().map(|r| (t.id().to_string(), r.clone())))
            .collect()
    }

    pub fn branches(&self) -> &[BranchReport] {
        &self.branches
    }

    /// Run until no runnable work remains
    pub async fn run(&mut self) -> RunReport {
        self.run_with_cancel(CancellationToken::new()).await
    }

    /// Run until no runnable work remains or `cancel` fires.
    ///
    /// On cancellation in-flight agents are aborted and every unfinished task
    /// is marked failed with a `cancelled` failure.
    pub async fn run_with_cancel(&mut self, cancel: CancellationToken) -> RunReport {
        info!(
            "Run started: {} task(s), {} ready, concurrency {}",
            self.tasks.len(),
            self.ready.len(),
            self.options.max_concurrency
        );

        let mut in_flight: JoinSet<AgentResult> = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                self.cancel_unfinished(&mut in_flight).await;
                break;
            }

            while in_flight.len() < self.options.max_concurrency {
                let Some(id) = self.ready.pop_front() else {
                    break;
                };
                self.dispatch(id, &mut in_flight, &cancel);
            }

            if in_flight.is_empty() {
                break;
            }

            // Cancellation first, so a cancelled agent result never cascades
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                joined = in_flight.join_next() => match joined {
                    Some(Ok((id, result))) => self.finish(&id, result),
                    Some(Err(e)) => error!("Agent task ended without a result: {}", e),
                    None => {}
                },
            }
        }

        self.sweep_unfinished();

        let report = self.report();
        info!(
            "Run finished: {} completed, {} failed, {} synthesis iteration(s)",
            report.count(TaskStatus::Completed),
            report.count(TaskStatus::Failed),
            report.iterations
        );
        report
    }

    /// Snapshot of the run
    pub fn report(&self) -> RunReport {
        RunReport {
            tasks: self.tasks().cloned().collect(),
            branches: self.branches.clone(),
            iterations: self.context.iterations(),
            cancelled: self.cancelled,
        }
    }

    fn register(&mut self, mut task: Task, branch: Option<usize>) -> Result<(), EngineError> {
        if self.tasks.contains_key(task.id()) {
            return Err(EngineError::DuplicateTask(task.id().to_string()));
        }
        if let Some(missing) = task
            .dependencies()
            .iter()
            .find(|d| !self.tasks.contains_key(d.as_str()))
        {
            return Err(EngineError::UnknownDependency {
                task: task.id().to_string(),
                dependency: missing.clone(),
            });
        }

        task.reset_state();
        let id = task.id().to_string();

        let mut waiting = 0;
        let mut failed_dependency = None;
        for dep in task.dependencies() {
            match self.tasks.get(dep).map(Task::status) {
                Some(TaskStatus::Completed) => {}
                Some(TaskStatus::Failed) => {
                    failed_dependency.get_or_insert_with(|| dep.clone());
                }
                _ => {
                    waiting += 1;
                    self.dependents
                        .entry(dep.clone())
                        .or_default()
                        .push(id.clone());
                }
            }
        }

        match task.kind() {
            TaskKind::Retrieval => self.retrievals.push(id.clone()),
            TaskKind::Synthesis => {
                let index = match branch {
                    Some(index) => {
                        self.branches[index].last_synthesis = id.clone();
                        index
                    }
                    None => {
                        self.branches.push(BranchReport {
                            root: id.clone(),
                            last_synthesis: id.clone(),
                            outcome: None,
                            validation: None,
                        });
                        self.branches.len() - 1
                    }
                };
                self.branch_of.insert(id.clone(), index);
            }
            TaskKind::Validation => {}
        }

        debug!(
            "Registered {} task {} ({} dependencies, {} waiting)",
            task.kind(),
            id,
            task.dependencies().len(),
            waiting
        );

        self.order.push(id.clone());
        self.tasks.insert(id.clone(), task);

        if let Some(dep) = failed_dependency {
            self.fail(&id, TaskFailure::from(EngineError::DependencyFailed(dep)));
        } else if waiting == 0 {
            self.ready.push_back(id);
        } else {
            self.pending.insert(id, waiting);
        }

        Ok(())
    }

    fn dispatch(
        &mut self,
        id: TaskId,
        in_flight: &mut JoinSet<AgentResult>,
        cancel: &CancellationToken,
    ) {
        let Some(task) = self.tasks.get(&id) else {
            return;
        };
        // Stale queue entry for a task failed by a cascade
        if task.status() != TaskStatus::Pending {
            return;
        }

        let kind = task.kind();
        let Some(agent) = self.agents.get(&kind).cloned() else {
            error!("No agent registered for {} task {}", kind, id);
            self.fail(&id, TaskFailure::from(EngineError::NoAgent(kind.to_string())));
            return;
        };

        let input = AgentInput {
            task_id: id.clone(),
            params: task.params().clone(),
            dependencies: task
                .dependencies()
                .iter()
                .filter_map(|dep| self.tasks.get(dep))
                .map(|dep| DependencyResult {
                    id: dep.id().to_string(),
                    kind: dep.kind(),
                    result: dep.result().cloned().unwrap_or(Value::Null),
                })
                .collect(),
        };

        if let Some(task) = self.tasks.get_mut(&id) {
            task.mark_in_progress();
            if let Some(observer) = &self.observer {
                observer(task);
            }
        }

        info!("Starting {} task {}", kind, id);

        let ctx = self.context.clone();
        let cancel = cancel.clone();
        let deadline = self.options.agent_timeout;

        in_flight.spawn(async move {
            let call = AssertUnwindSafe(agent.execute(input, ctx)).catch_unwind();
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(EngineError::Cancelled),
                outcome = tokio::time::timeout(deadline, call) => match outcome {
                    Err(_) => Err(EngineError::AgentTimeout(deadline.as_secs())),
                    Ok(Err(panic)) => Err(EngineError::AgentPanicked(panic_message(panic.as_ref()))),
                    Ok(Ok(result)) => result,
                },
            };
            (id, result)
        });
    }

    fn finish(&mut self, id: &str, result: Result<Value, EngineError>) {
        let Some(task) = self.tasks.get(id) else {
            return;
        };
        let kind = task.kind();
        let query = task.param_str("query").unwrap_or_default().to_string();

        let value = match result {
            Ok(value) => value,
            Err(e) => {
                if matches!(e, EngineError::Cancelled) {
                    warn!("{} task {} cancelled", kind, id);
                } else {
                    error!("{} task {} failed: {}", kind, id, e);
                }
                self.fail(id, TaskFailure::from(&e));
                return;
            }
        };

        // A synthesis is judged as if already counted; only a parsed result
        // is a completion and advances the counter
        let iteration = match kind {
            TaskKind::Synthesis => self.context.iterations() + 1,
            _ => self.context.iterations(),
        };

        match self.evaluator.evaluate(kind, value, iteration, &query) {
            TaskOutcome::Failed(failure) => {
                error!("{} task {} failed: {}", kind, id, failure);
                self.fail(id, failure);
            }
            TaskOutcome::Completed { result, follow_up } => {
                if kind == TaskKind::Synthesis {
                    self.context.next_iteration();
                    self.remember_summary(id, &result);
                }
                self.complete(id, result);
                if let Some(follow_up) = follow_up {
                    self.apply_follow_up(id, follow_up);
                }
            }
        }
    }

    fn complete(&mut self, id: &str, result: Value) {
        if let Some(task) = self.tasks.get_mut(id) {
            task.mark_completed(result);
            info!("{} task {} completed", task.kind(), id);
        }

        for dependent in self.dependents.remove(id).unwrap_or_default() {
            let Some(count) = self.pending.get_mut(&dependent) else {
                continue;
            };
            *count -= 1;
            if *count > 0 {
                continue;
            }
            self.pending.remove(&dependent);
            if self.tasks.get(&dependent).map(Task::status) == Some(TaskStatus::Pending) {
                debug!("Task {} is ready", dependent);
                self.ready.push_back(dependent);
            }
        }
    }

    /// Mark a task failed and fail everything that depends on it
    fn fail(&mut self, id: &str, failure: TaskFailure) {
        let mut stack = vec![(id.to_string(), failure)];

        while let Some((id, failure)) = stack.pop() {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            if task.status().is_terminal() {
                continue;
            }

            let kind = task.kind();
            let message = failure.to_string();
            task.mark_failed(failure);
            self.pending.remove(&id);

            if kind == TaskKind::Synthesis {
                self.set_branch_outcome(&id, BranchOutcome::Failed { error: message });
            }

            for dependent in self.dependents.remove(&id).unwrap_or_default() {
                warn!("Task {} failed because dependency {} failed", dependent, id);
                stack.push((
                    dependent,
                    TaskFailure::from(EngineError::DependencyFailed(id.clone())),
                ));
            }
        }
    }

    fn apply_follow_up(&mut self, synthesis_id: &str, follow_up: FollowUp) {
        match follow_up {
            FollowUp::Replan {
                retrievals,
                query,
                iteration,
            } => {
                let branch = self.branch_of.get(synthesis_id).copied();
                let mut spawned = 0;

                for request in retrievals {
                    let id = self.fresh_id("retrieval");
                    let task = match request {
                        RetrievalRequest::Query(q) => Task::retrieval(id, q),
                        RetrievalRequest::Url(u) => Task::retrieval_url(id, u),
                    };
                    match self.register(task, None) {
                        Ok(()) => spawned += 1,
                        Err(e) => error!("Could not spawn follow-up retrieval: {}", e),
                    }
                }

                // Retrievals that already failed would fail the new pass on arrival
                let sources: Vec<TaskId> = self
                    .retrievals
                    .iter()
                    .filter(|r| {
                        self.tasks.get(r.as_str()).map(Task::status) != Some(TaskStatus::Failed)
                    })
                    .cloned()
                    .collect();

                let next_id = self.fresh_id("synthesis");
                let next = Task::synthesis(next_id.clone(), query)
                    .with_param("iteration", json!(iteration))
                    .depends_on(sources);

                info!(
                    "Synthesis {} incomplete after iteration {}: spawned {} retrieval(s), next pass {}",
                    synthesis_id, iteration, spawned, next_id
                );

                if let Err(e) = self.register(next, branch) {
                    error!("Could not spawn follow-up synthesis: {}", e);
                }
            }
            FollowUp::Deliver(outcome) => {
                let fallback = self
                    .branch_of
                    .get(synthesis_id)
                    .and_then(|index| self.summaries.get(index))
                    .cloned();
                let outcome = outcome.or_summary(fallback);
                info!(
                    "Branch ended at {}: {}",
                    synthesis_id,
                    outcome.label()
                );
                let deliverable = outcome.summary().map(String::from);
                self.set_branch_outcome(synthesis_id, outcome);

                match deliverable {
                    Some(summary) if self.options.validate_deliverables => {
                        self.spawn_validation(synthesis_id, summary);
                    }
                    Some(_) => {}
                    None => warn!("Branch ended at {} without a summary", synthesis_id),
                }
            }
        }
    }

    /// Validate a deliverable against the retrievals its synthesis consumed
    fn spawn_validation(&mut self, synthesis_id: &str, summary: String) {
        let Some(synthesis) = self.tasks.get(synthesis_id) else {
            return;
        };
        let mut dependencies = vec![synthesis_id.to_string()];
        dependencies.extend(
            synthesis
                .dependencies()
                .iter()
                .filter(|d| self.tasks.get(d.as_str()).map(Task::kind) == Some(TaskKind::Retrieval))
                .cloned(),
        );

        let id = self.fresh_id("validation");
        let task = Task::validation(id.clone())
            .with_param("summary", json!(summary))
            .depends_on(dependencies);
        match self.register(task, None) {
            Ok(()) => {
                if let Some(&index) = self.branch_of.get(synthesis_id) {
                    self.branches[index].validation = Some(id);
                }
            }
            Err(e) => error!("Could not spawn validation: {}", e),
        }
    }

    fn remember_summary(&mut self, synthesis_id: &str, result: &Value) {
        let Some(&index) = self.branch_of.get(synthesis_id) else {
            return;
        };
        if let Some(summary) = result.get("summary").and_then(Value::as_str) {
            if !summary.trim().is_empty() {
                self.summaries.insert(index, summary.to_string());
            }
        }
    }

    /// Only the latest synthesis of a branch decides its outcome
    fn set_branch_outcome(&mut self, synthesis_id: &str, outcome: BranchOutcome) {
        if let Some(&index) = self.branch_of.get(synthesis_id) {
            let branch = &mut self.branches[index];
            if branch.last_synthesis == synthesis_id {
                branch.outcome = Some(outcome);
            }
        }
    }

    fn fresh_id(&self, prefix: &str) -> TaskId {
        loop {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            let id = format!("{}-{}", prefix, &suffix[..8]);
            if !self.tasks.contains_key(&id) {
                return id;
            }
        }
    }

    async fn cancel_unfinished(&mut self, in_flight: &mut JoinSet<AgentResult>) {
        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}

        let unfinished: Vec<TaskId> = self
            .order
            .iter()
            .filter(|id| {
                self.tasks
                    .get(id.as_str())
                    .is_some_and(|t| !t.status().is_terminal())
            })
            .cloned()
            .collect();

        warn!(
            "Run cancelled: {} unfinished task(s) marked failed",
            unfinished.len()
        );

        let failure = TaskFailure::from(EngineError::Cancelled);
        for id in unfinished {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            let kind = task.kind();
            task.mark_failed(failure.clone());
            if kind == TaskKind::Synthesis {
                self.set_branch_outcome(
                    &id,
                    BranchOutcome::Failed {
                        error: failure.to_string(),
                    },
                );
            }
        }

        self.ready.clear();
        self.pending.clear();
        self.dependents.clear();
        self.cancelled = true;
    }

    /// Fail tasks whose agent never reported back
    fn sweep_unfinished(&mut self) {
        let lost: Vec<TaskId> = self
            .order
            .iter()
            .filter(|id| {
                self.tasks.get(id.as_str()).map(Task::status) == Some(TaskStatus::InProgress)
            })
            .cloned()
            .collect();

        for id in lost {
            self.fail(
                &id,
                TaskFailure::from(EngineError::AgentPanicked(
                    "agent task aborted before reporting a result".to_string(),
                )),
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
