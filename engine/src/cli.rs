//! CLI interface for Thinker
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for running research jobs.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Thinker research engine
///
/// Answers a research query by searching the web, reading pages, and
/// iteratively synthesizing a cited summary until it is complete.
#[derive(Parser, Debug)]
#[command(name = "thinker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Research a query and print the resulting summary
    Research {
        /// The question to research
        query: String,

        /// Override the synthesis iteration cap
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Skip validation of the final summary
        #[arg(long)]
        no_validate: bool,
    },

    /// Split a text file into token-budgeted chunks
    Chunk {
        /// File to chunk
        file: PathBuf,

        /// Token budget per chunk (default: chunking.validation_token_budget)
        #[arg(short, long)]
        budget: Option<usize>,

        /// Wrap chunks in numbered start/end markers
        #[arg(long)]
        markers: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage API keys in the OS keychain
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the configuration file path
    Path,
}

/// Keychain actions
#[derive(Subcommand, Debug)]
pub enum SecretAction {
    /// Store a key, reading its value from stdin
    Set {
        /// Key name (e.g., openai_api_key)
        key: String,
    },

    /// Remove a stored key
    Delete {
        /// Key name
        key: String,
    },

    /// Show which known keys resolve
    Status,
}
