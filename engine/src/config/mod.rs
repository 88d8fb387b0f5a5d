//! Configuration management
//!
//! This module handles loading, validation, and management of the Thinker configuration.
//! Configuration is stored in TOML format at ~/.thinker/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level
//! - **llm**: Text generation provider, model and retry settings
//! - **collaborators**: Search and scrape service endpoints
//! - **orchestrator**: Iteration cap, concurrency, agent deadline
//! - **chunking**: Token budgets for validation and page output
//!
//! Every section is optional in the file; missing sections and fields take
//! their defaults.
//!
//! # Examples
//!
//! ```no_run
//! use thinker_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Iteration cap: {}", config.orchestrator.max_iterations);
//! println!("Default provider: {}", config.llm.default_provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// LLM provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// External search/scrape services
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,

    /// Scheduler settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Chunking budgets
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Default LLM provider (openai, ollama)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub request_timeout_secs: u64,

    /// Retries on rate-limit, timeout and network errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles on every retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// OpenAI provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// OpenAI provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for OpenAI API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Completion token limit per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    // Note: API key read from OPENAI_API_KEY or the OS keychain, not from config
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Search and scrape collaborator endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    /// Base URL of the search service (`GET {base}/search?q=`)
    #[serde(default = "default_search_base_url")]
    pub search_base_url: String,

    /// Base URL of the scrape service (`POST {base}/batch_scrape_urls`)
    #[serde(default = "default_scrape_base_url")]
    pub scrape_base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_collaborator_timeout")]
    pub request_timeout_secs: u64,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum synthesis passes per run before replanning stops
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Ready tasks executed at the same time (1 = sequential)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Deadline for a single agent call, in seconds
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,

    /// Spawn a validation task for every branch deliverable
    #[serde(default = "default_true")]
    pub validate_deliverables: bool,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Token budget per validation call
    #[serde(default = "default_validation_token_budget")]
    pub validation_token_budget: usize,

    /// Maximum tokens of page text kept per retrieved URL
    #[serde(default = "default_page_token_budget")]
    pub page_token_budget: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_llm_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    5000
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_search_base_url() -> String {
    "http://localhost:8085".to_string()
}

fn default_scrape_base_url() -> String {
    "http://localhost:8084".to_string()
}

fn default_collaborator_timeout() -> u64 {
    120
}

fn default_max_iterations() -> u32 {
    8
}

fn default_max_concurrency() -> usize {
    1
}

fn default_agent_timeout() -> u64 {
    900
}

fn default_validation_token_budget() -> usize {
    2000
}

fn default_page_token_budget() -> usize {
    8000
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            request_timeout_secs: default_llm_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            openai: OpenAIConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            search_base_url: default_search_base_url(),
            scrape_base_url: default_scrape_base_url(),
            request_timeout_secs: default_collaborator_timeout(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_concurrency: default_max_concurrency(),
            agent_timeout_secs: default_agent_timeout(),
            validate_deliverables: true,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            validation_token_budget: default_validation_token_budget(),
            page_token_budget: default_page_token_budget(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.thinker/config.toml)
    ///
    /// If the configuration file doesn't exist, writes a default configuration
    /// there first.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or written
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default();
        config.validate()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Wrote default configuration to {:?}", path);

        Ok(config)
    }

    /// Get the default configuration file path (~/.thinker/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".thinker").join("config.toml"))
    }

    /// Validate field values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The log level or provider name is unknown
    /// - The iteration cap, concurrency or any budget is zero
    /// - A collaborator URL is empty
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["openai", "ollama"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        if self.orchestrator.max_iterations == 0 {
            return Err(EngineError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.max_concurrency == 0 {
            return Err(EngineError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.agent_timeout_secs == 0 {
            return Err(EngineError::Config(
                "agent_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.chunking.validation_token_budget == 0 || self.chunking.page_token_budget == 0 {
            return Err(EngineError::Config(
                "chunking budgets must be greater than zero".to_string(),
            ));
        }

        for (name, url) in [
            ("search_base_url", &self.collaborators.search_base_url),
            ("scrape_base_url", &self.collaborators.scrape_base_url),
        ] {
            if url.trim().is_empty() {
                return Err(EngineError::Config(format!("{} cannot be empty", name)));
            }
        }

        Ok(())
    }
}
