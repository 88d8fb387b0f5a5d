//! Thinker Engine Library
//!
//! This library provides the research orchestration engine behind the
//! `thinker` binary. It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Secret management module
pub mod secrets;

/// LLM provider abstraction layer
pub mod llm;

/// Search and scrape collaborator clients
pub mod tools;

/// Token-budgeted text chunking
pub mod chunker;

/// Conductor orchestration module
pub mod conductor;

/// Retrieval, synthesis and validation agents
pub mod agents;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
