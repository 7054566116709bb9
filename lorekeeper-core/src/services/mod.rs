//! External collaborators the annotation engine consumes.
//!
//! The engine only depends on these traits. [`ClaudeServices`] implements all
//! of them against the Anthropic Messages API; [`crate::testing`] has scripted
//! implementations for tests.

mod claude;

pub use claude::{ClaudeConfig, ClaudeServices};

use crate::consistency::Verdict;
use crate::show_tell::Suggestion;
use async_trait::async_trait;
use thiserror::Error;

/// Transport or protocol failure talking to an external service.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Opaque text generation service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Continue the story from `text`.
    async fn continue_text(&self, text: &str) -> Result<String, ServiceError>;

    /// Rewrite `text` following `instruction`, with surrounding `context`.
    async fn modify(
        &self,
        text: &str,
        context: &str,
        instruction: &str,
    ) -> Result<String, ServiceError>;

    /// Turn raw text into formatted prose, one paragraph per line.
    async fn format_rich(&self, text: &str) -> Result<String, ServiceError>;
}

/// Checks a paragraph against an entity's established description.
#[async_trait]
pub trait ConsistencyVerifier: Send + Sync {
    async fn verify(
        &self,
        paragraph: &str,
        entity_name: &str,
        entity_description: &str,
    ) -> Result<Verdict, ServiceError>;
}

/// Finds "telling" phrases in a manuscript and proposes "showing" rewrites.
#[async_trait]
pub trait ShowTellAnalyzer: Send + Sync {
    /// Suggestions in priority order.
    async fn analyze(&self, full_text: &str) -> Result<Vec<Suggestion>, ServiceError>;
}
