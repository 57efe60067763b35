//! Error kinds for the RAG pipeline.
//!
//! Every failure that reaches the orchestrator boundary is one of these
//! variants. None of them are retried inside the core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`RagError`].
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    /// The chunker received nothing to split. Ingest of the document is
    /// aborted and the index is left untouched.
    #[error("No text content found in document: {0}")]
    EmptyContent(String),

    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Stable, serializable tag for a [`RagError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyContent,
    IndexUnavailable,
    EmbeddingFailure,
    GenerationFailure,
    InvalidQuery,
    InvalidConfig,
}

impl RagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyContent(_) => ErrorKind::EmptyContent,
            Self::IndexUnavailable(_) => ErrorKind::IndexUnavailable,
            Self::EmbeddingFailure(_) => ErrorKind::EmbeddingFailure,
            Self::GenerationFailure(_) => ErrorKind::GenerationFailure,
            Self::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_snake_case() {
        let err = RagError::IndexUnavailable("connection refused".into());
        let json = serde_json::to_string(&err.kind()).unwrap();
        assert_eq!(json, "\"index_unavailable\"");
    }

    #[test]
    fn test_display_keeps_message() {
        let err = RagError::GenerationFailure("rate limited".into());
        assert_eq!(err.to_string(), "Generation failed: rate limited");
    }
}
