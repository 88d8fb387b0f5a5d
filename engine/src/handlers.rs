//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - research: Run the orchestrator on a query and print the summary
//! - chunk: Split a file into token-budgeted chunks
//! - config show / path: Inspect configuration
//! - secret set / delete / status: Manage API keys in the keychain

use anyhow::{Context, Result};
use serde_json::json;
use std::fmt::Write;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::agents::{RetrievalAgent, SynthesisAgent, ValidationAgent};
use crate::chunker::{wrap_with_markers, Chunker};
use crate::conductor::{BranchOutcome, Orchestrator, OrchestratorOptions, RunReport, Task, TaskStatus};
use crate::config::Config;
use crate::llm::{build_provider, LLMProvider};
use crate::secrets::{SecretManager, KNOWN_KEYS, SERVICE_NAME};
use crate::tools::Collaborators;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Build an orchestrator with all three agents registered
pub fn build_orchestrator(
    config: &Config,
    llm: Arc<dyn LLMProvider>,
    collaborators: Collaborators,
) -> Orchestrator {
    Orchestrator::new(OrchestratorOptions::from(&config.orchestrator))
        .with_agent(Arc::new(RetrievalAgent::new(
            collaborators,
            config.chunking.page_token_budget,
        )))
        .with_agent(Arc::new(SynthesisAgent::new(llm.clone())))
        .with_agent(Arc::new(ValidationAgent::new(
            llm,
            config.chunking.validation_token_budget,
        )))
}

/// Seed a research run: one search and one synthesis pass over it
pub fn seed_research(
    orchestrator: &mut Orchestrator,
    query: &str,
) -> std::result::Result<(), sdk::errors::EngineError> {
    orchestrator.add_task(Task::retrieval("retrieval-1", query))?;
    orchestrator.add_task(Task::synthesis("synthesis-1", query).depends_on(["retrieval-1"]))?;
    Ok(())
}

/// Research a query
///
/// Builds the configured LLM provider and collaborator clients, runs the
/// orchestrator until the branch ends or `cancel` fires, and prints the
/// report. Fails when no branch produced a summary.
pub async fn handle_research(
    query: String,
    config: &Config,
    format: OutputFormat,
    cancel: CancellationToken,
) -> Result<()> {
    let secrets = SecretManager::new(SERVICE_NAME);
    let llm = build_provider(&config.llm, &secrets).context("Failed to set up LLM provider")?;
    let collaborators =
        Collaborators::from_config(&config.collaborators).context("Failed to set up collaborators")?;

    let mut orchestrator = build_orchestrator(config, llm, collaborators);
    seed_research(&mut orchestrator, &query)?;

    if let OutputFormat::Text = format {
        println!("Researching: {}", query);
        println!();
    }

    let report = orchestrator.run_with_cancel(cancel).await;
    let citations = orchestrator.context().citations();

    match format {
        OutputFormat::Text => print!("{}", render_report(&report, &citations)),
        OutputFormat::Json => {
            let sources: Vec<_> = citations
                .iter()
                .map(|(n, link)| json!({ "number": n, "link": link }))
                .collect();
            let output = json!({
                "query": query,
                "report": report,
                "sources": sources,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if report.cancelled {
        anyhow::bail!("Research cancelled");
    }
    if !report
        .branches
        .iter()
        .any(|b| b.outcome.as_ref().and_then(BranchOutcome::summary).is_some())
    {
        anyhow::bail!("Research produced no summary");
    }
    Ok(())
}

/// Render a run report as human-readable text
pub fn render_report(report: &RunReport, citations: &[(usize, String)]) -> String {
    let mut out = String::new();

    for branch in &report.branches {
        match &branch.outcome {
            Some(BranchOutcome::Converged { summary }) => {
                let _ = writeln!(out, "{}\n", summary.trim());
            }
            Some(BranchOutcome::CapExhausted { summary }) => {
                let _ = writeln!(out, "{}\n", summary.trim());
                let _ = writeln!(
                    out,
                    "⚠ Iteration cap reached before the summary was complete\n"
                );
            }
            Some(BranchOutcome::Failed { error }) => {
                let _ = writeln!(out, "✗ Research failed: {}\n", error);
            }
            None => {
                let _ = writeln!(out, "✗ Research did not finish\n");
            }
        }

        if let Some(validation) = report.validation_report(branch) {
            let _ = writeln!(out, "Validation:\n{}\n", validation.trim());
        }
    }

    if !citations.is_empty() {
        let _ = writeln!(out, "Sources:");
        for (n, link) in citations {
            let _ = writeln!(out, "  [{}] {}", n, link);
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(
        out,
        "  Tasks: {} completed, {} failed",
        report.count(TaskStatus::Completed),
        report.count(TaskStatus::Failed)
    );
    let _ = writeln!(out, "  Iterations: {}", report.iterations);
    if report.cancelled {
        let _ = writeln!(out, "  Cancelled");
    }

    out
}

/// Chunk a text file
pub async fn handle_chunk(
    file: &Path,
    budget: Option<usize>,
    markers: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let chunker = Chunker::new(budget.unwrap_or(config.chunking.validation_token_budget));
    let mut chunks = chunker.chunk(&text);
    if markers {
        chunks = wrap_with_markers(&chunks);
    }

    match format {
        OutputFormat::Text => {
            for chunk in &chunks {
                println!("{}", chunk);
                println!("---");
            }
            println!(
                "{} chunk(s) at a {}-token budget",
                chunks.len(),
                chunker.token_budget()
            );
        }
        OutputFormat::Json => {
            let output = json!({
                "budget": chunker.token_budget(),
                "count": chunks.len(),
                "chunks": chunks,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Show the loaded configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let text = toml::to_string_pretty(config).context("Failed to serialize config")?;
            print!("{}", text);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

/// Print the configuration file path
pub fn handle_config_path(path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", path.display()),
        OutputFormat::Json => println!("{}", json!({ "path": path })),
    }
    Ok(())
}

/// Store a key read from the first line of `input`
pub fn handle_secret_set(
    manager: &SecretManager,
    key: &str,
    input: impl BufRead,
    format: OutputFormat,
) -> Result<()> {
    let mut lines = input.lines();
    let value = match lines.next() {
        Some(line) => line.context("Failed to read secret from stdin")?,
        None => String::new(),
    };
    manager.set_secret(key, value.trim())?;

    match format {
        OutputFormat::Text => println!("Stored '{}' in the keychain", key),
        OutputFormat::Json => println!("{}", json!({ "key": key, "stored": true })),
    }
    Ok(())
}

/// Remove a stored key
pub fn handle_secret_delete(
    manager: &SecretManager,
    key: &str,
    format: OutputFormat,
) -> Result<()> {
    manager.delete_secret(key)?;
    match format {
        OutputFormat::Text => println!("Deleted '{}' from the keychain", key),
        OutputFormat::Json => println!("{}", json!({ "key": key, "deleted": true })),
    }
    Ok(())
}

/// Which of `keys` currently resolve, in order
pub fn secret_status(manager: &SecretManager, keys: &[&str]) -> Vec<(String, bool)> {
    keys.iter()
        .map(|key| (key.to_string(), manager.has_secret(key)))
        .collect()
}

/// Report whether each known key resolves
pub fn handle_secret_status(manager: &SecretManager, format: OutputFormat) -> Result<()> {
    let status = secret_status(manager, KNOWN_KEYS);
    match format {
        OutputFormat::Text => {
            for (key, found) in &status {
                println!("{:<20} {}", key, if *found { "set" } else { "missing" });
            }
        }
        OutputFormat::Json => {
            let keys: serde_json::Map<String, serde_json::Value> = status
                .into_iter()
                .map(|(key, found)| (key, json!(found)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&keys)?);
        }
    }
    Ok(())
}
