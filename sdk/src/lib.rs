//! Thinker SDK
//!
//! Shared error taxonomy and wire types for the Thinker research engine.
//! The engine crate and any external tooling that reads run reports or
//! produces synthesis output depend on this crate.

/// Error types and handling
pub mod errors;

/// Wire types exchanged with agents and collaborators
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, FailureKind, ThinkerErrorExt};
pub use types::{
    AdditionalTask, ScrapeResponse, ScrapedPage, SearchRecord, SearchResponse, SynthesisResult,
    SynthesisStatus, ToolRequest,
};
