//! Integration tests for the orchestrator scheduling loop
//!
//! Agents are scripted stand-ins so each test controls exactly what every
//! task returns, how long it takes, and whether it panics.

use async_trait::async_trait;
use sdk::errors::{EngineError, FailureKind};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thinker_engine::agents::{Agent, AgentInput};
use thinker_engine::conductor::{
    BranchOutcome, Orchestrator, OrchestratorOptions, RunContext, Task, TaskKind, TaskStatus,
};
use tokio_util::sync::CancellationToken;

/// Returns `{"query": ..}` for each retrieval, optionally after a delay
struct StubRetrieval {
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl StubRetrieval {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Agent for StubRetrieval {
    fn kind(&self) -> TaskKind {
        TaskKind::Retrieval
    }

    async fn execute(&self, input: AgentInput, _ctx: Arc<RunContext>) -> Result<Value, EngineError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if input.params.contains_key("explode") {
            panic!("retrieval blew up");
        }
        Ok(json!({
            "query": input.params.get("query").cloned().unwrap_or(Value::Null),
            "results": []
        }))
    }
}

/// Plays back scripted synthesis results; the last one repeats
struct ScriptedSynthesis {
    script: Mutex<VecDeque<Value>>,
    seen_dependencies: Mutex<Vec<Vec<String>>>,
}

impl ScriptedSynthesis {
    fn new(script: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen_dependencies: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Agent for ScriptedSynthesis {
    fn kind(&self) -> TaskKind {
        TaskKind::Synthesis
    }

    async fn execute(&self, input: AgentInput, _ctx: Arc<RunContext>) -> Result<Value, EngineError> {
        self.seen_dependencies
            .lock()
            .unwrap()
            .push(input.dependencies.iter().map(|d| d.id.clone()).collect());

        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(next.unwrap_or(Value::Null))
    }
}

/// Echoes the summary it was asked to validate
struct EchoValidation;

#[async_trait]
impl Agent for EchoValidation {
    fn kind(&self) -> TaskKind {
        TaskKind::Validation
    }

    async fn execute(&self, input: AgentInput, _ctx: Arc<RunContext>) -> Result<Value, EngineError> {
        let summary = input
            .param_str("summary")
            .or_else(|| {
                input
                    .results_of(TaskKind::Synthesis)
                    .find_map(|d| d.result.get("summary").and_then(Value::as_str))
            })
            .unwrap_or_default()
            .to_string();
        Ok(json!({ "report": format!("checked: {}", summary), "chunks": 1 }))
    }
}

/// Sleeps far longer than any test deadline
struct StuckAgent(TaskKind);

#[async_trait]
impl Agent for StuckAgent {
    fn kind(&self) -> TaskKind {
        self.0
    }

    async fn execute(&self, _input: AgentInput, _ctx: Arc<RunContext>) -> Result<Value, EngineError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Value::Null)
    }
}

fn incomplete(follow_up_query: &str) -> Value {
    json!({
        "status": "incomplete",
        "summary": "partial",
        "additional_tasks": [
            {"tool": "google_search", "parameters": {"q": follow_up_query, "urls": []}}
        ]
    })
}

fn complete(summary: &str) -> Value {
    json!({"status": "complete", "summary": summary, "additional_tasks": []})
}

fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        max_iterations: 8,
        max_concurrency: 1,
        agent_timeout: Duration::from_secs(30),
        validate_deliverables: false,
    }
}

fn seeded(options: OrchestratorOptions, synthesis: Arc<ScriptedSynthesis>) -> Orchestrator {
    let mut orch = Orchestrator::new(options)
        .with_agent(StubRetrieval::new(Duration::ZERO))
        .with_agent(synthesis)
        .with_agent(Arc::new(EchoValidation));
    orch.add_task(Task::retrieval("retrieval-1", "rust async"))
        .unwrap();
    orch.add_task(Task::synthesis("synthesis-1", "rust async").depends_on(["retrieval-1"]))
        .unwrap();
    orch
}

#[tokio::test]
async fn test_converges_on_first_pass() {
    let synthesis = ScriptedSynthesis::new(vec![complete("Tokio dominates.")]);
    let mut orch = seeded(options(), synthesis.clone());

    let report = orch.run().await;

    assert_eq!(report.iterations, 1);
    assert_eq!(report.count(TaskStatus::Completed), 2);
    assert_eq!(report.tasks.len(), 2);
    assert_eq!(
        report.branches[0].outcome,
        Some(BranchOutcome::Converged {
            summary: "Tokio dominates.".into()
        })
    );
    assert_eq!(
        synthesis.seen_dependencies.lock().unwrap()[0],
        vec!["retrieval-1".to_string()]
    );
}

#[tokio::test]
async fn test_replan_then_converge() {
    let synthesis = ScriptedSynthesis::new(vec![incomplete("tokio vs async-std"), complete("done")]);
    let mut orch = seeded(options(), synthesis.clone());

    let report = orch.run().await;

    assert_eq!(report.iterations, 2);
    assert_eq!(report.count_kind(TaskKind::Retrieval), 2);
    assert_eq!(report.count_kind(TaskKind::Synthesis), 2);
    assert_eq!(report.count(TaskStatus::Failed), 0);

    // The follow-up retrieval carries the requested query
    let follow_up = report
        .tasks
        .iter()
        .find(|t| t.kind() == TaskKind::Retrieval && t.id() != "retrieval-1")
        .unwrap();
    assert_eq!(follow_up.param_str("query"), Some("tokio vs async-std"));

    // The second pass sees every retrieval and inherits the query
    let second = report
        .tasks
        .iter()
        .find(|t| t.kind() == TaskKind::Synthesis && t.id() != "synthesis-1")
        .unwrap();
    assert_eq!(second.param_str("query"), Some("rust async"));
    assert_eq!(second.params()["iteration"], json!(1));
    assert_eq!(synthesis.seen_dependencies.lock().unwrap()[1].len(), 2);

    let branch = &report.branches[0];
    assert_eq!(branch.root, "synthesis-1");
    assert_eq!(branch.last_synthesis, second.id());
    assert_eq!(branch.outcome.as_ref().unwrap().label(), "converged");
}

#[tokio::test]
async fn test_never_converging_stops_at_cap() {
    let synthesis = ScriptedSynthesis::new(vec![incomplete("more")]);
    let mut orch = seeded(options(), synthesis);

    let report = orch.run().await;

    assert_eq!(report.iterations, 8);
    assert_eq!(report.count_kind(TaskKind::Synthesis), 8);
    assert_eq!(report.count_kind(TaskKind::Retrieval), 8);
    assert_eq!(report.count(TaskStatus::Failed), 0);
    assert!(report.tasks.iter().all(|t| t.status() == TaskStatus::Completed));
    assert_eq!(
        report.branches[0].outcome,
        Some(BranchOutcome::CapExhausted {
            summary: "partial".into()
        })
    );
}

#[tokio::test]
async fn test_cap_of_one_allows_no_replan() {
    let synthesis = ScriptedSynthesis::new(vec![incomplete("more")]);
    let mut orch = seeded(
        OrchestratorOptions {
            max_iterations: 1,
            ..options()
        },
        synthesis,
    );

    let report = orch.run().await;
    assert_eq!(report.count_kind(TaskKind::Synthesis), 1);
    assert_eq!(report.branches[0].outcome.as_ref().unwrap().label(), "cap_exhausted");
}

#[tokio::test]
async fn test_zero_tasks_returns_immediately() {
    let mut orch = Orchestrator::new(options());
    let report = orch.run().await;
    assert!(report.tasks.is_empty());
    assert!(report.branches.is_empty());
    assert!(!report.cancelled);
}

#[tokio::test]
async fn test_registration_errors_leave_registry_untouched() {
    let mut orch = seeded(options(), ScriptedSynthesis::new(vec![complete("x")]));

    let err = orch.add_task(Task::retrieval("retrieval-1", "other")).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateTask(_)));

    let err = orch
        .add_task(Task::synthesis("synthesis-2", "q").depends_on(["nope"]))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::UnknownDependency { ref dependency, .. } if dependency == "nope"
    ));

    assert_eq!(orch.len(), 2);
    assert_eq!(
        orch.get_task("retrieval-1").unwrap().param_str("query"),
        Some("rust async")
    );
}

#[tokio::test]
async fn test_schema_violation_fails_branch() {
    let synthesis = ScriptedSynthesis::new(vec![json!("not an object")]);
    let mut orch = seeded(
        OrchestratorOptions {
            validate_deliverables: true,
            ..options()
        },
        synthesis,
    );

    let report = orch.run().await;

    let task = report.task("synthesis-1").unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);
    assert_eq!(task.failure().unwrap().kind, FailureKind::Schema);
    assert!(task.result().is_none());
    assert!(matches!(
        report.branches[0].outcome,
        Some(BranchOutcome::Failed { .. })
    ));
    // No summary, nothing to validate
    assert_eq!(report.count_kind(TaskKind::Validation), 0);
    // A result that does not parse is not a completion
    assert_eq!(report.iterations, 0);
}

#[tokio::test]
async fn test_malformed_pass_leaves_cap_budget_intact() {
    let synthesis = ScriptedSynthesis::new(vec![
        json!("garbage"),
        incomplete("more"),
        complete("done"),
    ]);
    let mut orch = Orchestrator::new(OrchestratorOptions {
        max_iterations: 2,
        ..options()
    })
    .with_agent(StubRetrieval::new(Duration::ZERO))
    .with_agent(synthesis);
    orch.add_task(Task::retrieval("retrieval-1", "q")).unwrap();
    orch.add_task(Task::synthesis("s-broken", "q").depends_on(["retrieval-1"]))
        .unwrap();
    orch.add_task(Task::synthesis("s-healthy", "q").depends_on(["retrieval-1"]))
        .unwrap();

    let report = orch.run().await;

    assert_eq!(
        report.task("s-broken").unwrap().failure().unwrap().kind,
        FailureKind::Schema
    );
    // The healthy branch still gets both of its passes
    assert_eq!(report.iterations, 2);
    assert_eq!(
        report.branches[1].outcome,
        Some(BranchOutcome::Converged {
            summary: "done".into()
        })
    );
}

#[tokio::test]
async fn test_panicking_agent_fails_only_its_subgraph() {
    let mut orch = Orchestrator::new(options())
        .with_agent(StubRetrieval::new(Duration::ZERO))
        .with_agent(ScriptedSynthesis::new(vec![complete("ok")]));
    orch.add_task(Task::retrieval("bad", "x").with_param("explode", json!(true)))
        .unwrap();
    orch.add_task(Task::retrieval("good", "y")).unwrap();
    orch.add_task(Task::synthesis("s-bad", "x").depends_on(["bad"]))
        .unwrap();
    orch.add_task(Task::synthesis("s-good", "y").depends_on(["good"]))
        .unwrap();

    let report = orch.run().await;

    let bad = report.task("bad").unwrap();
    assert_eq!(bad.failure().unwrap().kind, FailureKind::Panicked);
    assert!(bad.failure().unwrap().message.contains("retrieval blew up"));
    assert_eq!(
        report.task("s-bad").unwrap().failure().unwrap().kind,
        FailureKind::DependencyFailed
    );

    assert_eq!(report.task("good").unwrap().status(), TaskStatus::Completed);
    assert_eq!(report.task("s-good").unwrap().status(), TaskStatus::Completed);
    assert_eq!(report.branches.len(), 2);
}

#[tokio::test]
async fn test_failed_retrieval_does_not_block_other_replans() {
    let synthesis = ScriptedSynthesis::new(vec![incomplete("deeper"), complete("ok")]);
    let mut orch = Orchestrator::new(options())
        .with_agent(StubRetrieval::new(Duration::ZERO))
        .with_agent(synthesis.clone());
    orch.add_task(Task::retrieval("bad", "x").with_param("explode", json!(true)))
        .unwrap();
    orch.add_task(Task::retrieval("good", "y")).unwrap();
    orch.add_task(Task::synthesis("s-good", "y").depends_on(["good"]))
        .unwrap();

    let report = orch.run().await;

    assert_eq!(report.task("bad").unwrap().status(), TaskStatus::Failed);
    assert_eq!(report.count_kind(TaskKind::Synthesis), 2);
    assert_eq!(report.count(TaskStatus::Failed), 1);
    assert_eq!(
        report.branches[0].outcome,
        Some(BranchOutcome::Converged {
            summary: "ok".into()
        })
    );

    // The second pass reads every retrieval except the failed one
    let seen = synthesis.seen_dependencies.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen[1].contains(&"good".to_string()));
    assert!(!seen[1].contains(&"bad".to_string()));
    assert_eq!(seen[1].len(), 2);
}

#[tokio::test]
async fn test_summaryless_incomplete_at_cap_is_not_validated() {
    let synthesis = ScriptedSynthesis::new(vec![json!({"status": "incomplete"})]);
    let mut orch = seeded(
        OrchestratorOptions {
            max_iterations: 1,
            validate_deliverables: true,
            ..options()
        },
        synthesis,
    );

    let report = orch.run().await;

    let outcome = report.branches[0].outcome.as_ref().unwrap();
    assert_eq!(outcome.label(), "cap_exhausted");
    assert_eq!(outcome.summary(), None);
    assert_eq!(report.count_kind(TaskKind::Validation), 0);
    assert_eq!(report.count(TaskStatus::Failed), 0);
}

#[tokio::test]
async fn test_blank_final_pass_keeps_last_summary() {
    let synthesis = ScriptedSynthesis::new(vec![
        incomplete("more"),
        json!({"status": "incomplete", "summary": ""}),
    ]);
    let mut orch = seeded(
        OrchestratorOptions {
            max_iterations: 2,
            validate_deliverables: true,
            ..options()
        },
        synthesis,
    );

    let report = orch.run().await;

    let branch = &report.branches[0];
    assert_eq!(
        branch.outcome,
        Some(BranchOutcome::CapExhausted {
            summary: "partial".into()
        })
    );
    assert_eq!(report.validation_report(branch), Some("checked: partial"));
}

#[tokio::test]
async fn test_agent_timeout_fails_task() {
    let mut orch = Orchestrator::new(OrchestratorOptions {
        agent_timeout: Duration::from_millis(50),
        ..options()
    })
    .with_agent(Arc::new(StuckAgent(TaskKind::Retrieval)));
    orch.add_task(Task::retrieval("r1", "slow")).unwrap();

    let report = orch.run().await;
    let failure = report.task("r1").unwrap().failure().unwrap().clone();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert!(failure.transient);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let retrieval = StubRetrieval::new(Duration::from_millis(50));
    let mut orch = Orchestrator::new(OrchestratorOptions {
        max_concurrency: 2,
        ..options()
    })
    .with_agent(retrieval.clone());
    for i in 0..6 {
        orch.add_task(Task::retrieval(format!("r{}", i), format!("q{}", i)))
            .unwrap();
    }

    let report = orch.run().await;

    assert_eq!(report.count(TaskStatus::Completed), 6);
    assert_eq!(retrieval.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_sequential_by_default() {
    let retrieval = StubRetrieval::new(Duration::from_millis(10));
    let mut orch = Orchestrator::new(OrchestratorOptions::default()).with_agent(retrieval.clone());
    for i in 0..3 {
        orch.add_task(Task::retrieval(format!("r{}", i), "q")).unwrap();
    }

    orch.run().await;
    assert_eq!(retrieval.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancellation_fails_unfinished_tasks() {
    let mut orch = Orchestrator::new(options())
        .with_agent(Arc::new(StuckAgent(TaskKind::Retrieval)))
        .with_agent(ScriptedSynthesis::new(vec![complete("never")]));
    orch.add_task(Task::retrieval("r1", "q")).unwrap();
    orch.add_task(Task::synthesis("s1", "q").depends_on(["r1"]))
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = orch.run_with_cancel(cancel).await;

    assert!(report.cancelled);
    for id in ["r1", "s1"] {
        let task = report.task(id).unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.failure().unwrap().kind, FailureKind::Cancelled);
    }
    assert!(matches!(
        report.branches[0].outcome,
        Some(BranchOutcome::Failed { .. })
    ));
}

#[tokio::test]
async fn test_deliverable_is_validated() {
    let synthesis = ScriptedSynthesis::new(vec![complete("final answer")]);
    let mut orch = seeded(
        OrchestratorOptions {
            validate_deliverables: true,
            ..options()
        },
        synthesis,
    );

    let report = orch.run().await;

    let branch = &report.branches[0];
    let validation_id = branch.validation.clone().unwrap();
    let validation = report.task(&validation_id).unwrap();
    assert_eq!(validation.kind(), TaskKind::Validation);
    assert_eq!(validation.dependencies(), &["synthesis-1", "retrieval-1"]);
    assert_eq!(
        report.validation_report(branch),
        Some("checked: final answer")
    );
    // Validation does not count as a synthesis iteration
    assert_eq!(report.iterations, 1);
}

#[tokio::test]
async fn test_observer_sees_each_dispatch() {
    let synthesis = ScriptedSynthesis::new(vec![complete("x")]);
    let mut orch = seeded(options(), synthesis);

    let started = Arc::new(Mutex::new(Vec::new()));
    let log = started.clone();
    orch.on_task_start(move |task| {
        assert_eq!(task.status(), TaskStatus::InProgress);
        log.lock().unwrap().push(task.id().to_string());
    });

    orch.run().await;
    assert_eq!(
        *started.lock().unwrap(),
        vec!["retrieval-1".to_string(), "synthesis-1".to_string()]
    );
}

#[tokio::test]
async fn test_completed_results_keyed_by_id() {
    let synthesis = ScriptedSynthesis::new(vec![complete("x")]);
    let mut orch = seeded(options(), synthesis);
    orch.run().await;

    let results = orch.completed_results();
    assert_eq!(results.len(), 2);
    assert_eq!(results["retrieval-1"]["query"], "rust async");
    assert_eq!(results["synthesis-1"]["status"], "complete");
}
