// Thinker research engine
// Main entry point for the thinker binary

use clap::Parser;
use thinker_engine::cli::{Cli, Command, ConfigAction, SecretAction};
use thinker_engine::config::Config;
use thinker_engine::handlers::{
    handle_chunk, handle_config_path, handle_config_show, handle_research, handle_secret_delete,
    handle_secret_set, handle_secret_status, OutputFormat,
};
use thinker_engine::secrets::SecretManager;
use thinker_engine::telemetry::init_telemetry_with_level;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = if cli.config.is_some() {
        Config::load_from_path(&config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log beats the config level; RUST_LOG beats both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    tracing::info!(
        "Thinker Engine v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    // Handle commands
    match cli.command {
        Command::Research {
            query,
            max_iterations,
            no_validate,
        } => {
            if let Some(max) = max_iterations {
                config.orchestrator.max_iterations = max;
            }
            if no_validate {
                config.orchestrator.validate_deliverables = false;
            }
            config.validate()?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, cancelling research...");
                    on_signal.cancel();
                }
            });

            tracing::info!("Researching: {}", query);
            handle_research(query, &config, format, cancel).await
        }

        Command::Chunk {
            file,
            budget,
            markers,
        } => handle_chunk(&file, budget, markers, &config, format).await,

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => handle_config_path(&config_path, format),
        },

        Command::Secret { action } => {
            let manager = SecretManager::default();
            match action {
                SecretAction::Set { key } => {
                    handle_secret_set(&manager, &key, std::io::stdin().lock(), format)
                }
                SecretAction::Delete { key } => handle_secret_delete(&manager, &key, format),
                SecretAction::Status => handle_secret_status(&manager, format),
            }
        }
    }
}
