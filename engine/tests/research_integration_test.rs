//! End-to-end research run against mocked search, scrape and OpenAI services

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thinker_engine::conductor::{BranchOutcome, TaskKind, TaskStatus};
use thinker_engine::config::Config;
use thinker_engine::handlers::{build_orchestrator, render_report, seed_research};
use thinker_engine::llm::{LLMProvider, OpenAIProvider};
use thinker_engine::secrets::SecretString;
use thinker_engine::tools::Collaborators;
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn completion(content: Value) -> ResponseTemplate {
    let content = match content {
        Value::String(text) => text,
        other => other.to_string(),
    };
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    }))
}

fn config_for(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.collaborators.search_base_url = server.uri();
    config.collaborators.scrape_base_url = server.uri();
    config.llm.openai.base_url = server.uri();
    config
}

fn provider(config: &Config) -> Arc<dyn LLMProvider> {
    Arc::new(
        OpenAIProvider::new(
            config.llm.openai.clone(),
            SecretString::new("sk-test-key"),
            Duration::from_secs(5),
        )
        .unwrap(),
    )
}

async fn mount_collaborators(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"title": "Tokio", "link": "https://tokio.rs", "snippet": "An async runtime for Rust"}
            ]
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/batch_scrape_urls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"markdown": "# Tokio\nTokio is an event-driven runtime."}]
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_research_replans_then_converges_and_validates() {
    let server = MockServer::start().await;
    mount_collaborators(&server).await;

    // Validation prompts are plain; synthesis prompts carry the schema name
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Verify the following summary"))
        .respond_with(completion(json!("No unsupported claims found.")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("synthesis_result"))
        .respond_with(completion(json!({
            "status": "incomplete",
            "summary": "Tokio is a runtime [1].",
            "additional_tasks": [
                {"tool": "scrape_urls", "parameters": {"q": "", "urls": ["https://tokio.rs"]}}
            ]
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("synthesis_result"))
        .respond_with(completion(json!({
            "status": "complete",
            "summary": "Tokio is an event-driven runtime [1].",
            "additional_tasks": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let collaborators = Collaborators::from_config(&config.collaborators).unwrap();
    let mut orchestrator = build_orchestrator(&config, provider(&config), collaborators);
    seed_research(&mut orchestrator, "what is tokio").unwrap();

    let report = orchestrator.run().await;

    assert_eq!(report.iterations, 2);
    assert_eq!(report.count(TaskStatus::Failed), 0);
    assert_eq!(report.count_kind(TaskKind::Retrieval), 2);
    assert_eq!(report.count_kind(TaskKind::Validation), 1);

    let scrape = report
        .tasks
        .iter()
        .find(|t| t.param_str("url").is_some())
        .unwrap();
    assert_eq!(scrape.result().unwrap()["content"], "# Tokio\nTokio is an event-driven runtime.");

    let branch = &report.branches[0];
    assert_eq!(
        branch.outcome,
        Some(BranchOutcome::Converged {
            summary: "Tokio is an event-driven runtime [1].".into()
        })
    );
    assert_eq!(
        report.validation_report(branch),
        Some("No unsupported claims found.")
    );

    // Search hit and scraped page share one citation number
    let citations = orchestrator.context().citations();
    assert_eq!(citations, vec![(1, "https://tokio.rs".to_string())]);

    let text = render_report(&report, &citations);
    assert!(text.contains("Tokio is an event-driven runtime [1]."));
    assert!(text.contains("[1] https://tokio.rs"));
}

#[tokio::test]
async fn test_llm_outage_degrades_to_complete_summary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("context length exceeded"))
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.orchestrator.validate_deliverables = false;
    let collaborators = Collaborators::from_config(&config.collaborators).unwrap();
    let mut orchestrator = build_orchestrator(&config, provider(&config), collaborators);
    seed_research(&mut orchestrator, "q").unwrap();

    let report = orchestrator.run().await;

    assert_eq!(report.count(TaskStatus::Failed), 0);
    let summary = report.branches[0]
        .outcome
        .as_ref()
        .and_then(BranchOutcome::summary)
        .unwrap();
    assert!(summary.starts_with("Synthesis failed for query 'q'"));
    assert!(summary.contains("context length exceeded"));
}

#[tokio::test]
async fn test_validation_outage_fails_only_validation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Verify the following summary"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(completion(json!({
            "status": "complete",
            "summary": "Nothing found.",
            "additional_tasks": []
        })))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let collaborators = Collaborators::from_config(&config.collaborators).unwrap();
    let mut orchestrator = build_orchestrator(&config, provider(&config), collaborators);
    seed_research(&mut orchestrator, "q").unwrap();

    let report = orchestrator.run().await;

    let branch = &report.branches[0];
    assert_eq!(branch.outcome.as_ref().unwrap().label(), "converged");
    let validation = report.task(branch.validation.as_deref().unwrap()).unwrap();
    assert_eq!(validation.status(), TaskStatus::Failed);
    assert!(report.validation_report(branch).is_none());
}
