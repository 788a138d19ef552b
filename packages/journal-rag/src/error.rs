//! Typed errors for the retrieval engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Every error is attributed
//! to exactly one pipeline [`Stage`] so callers can tell "no data" apart
//! from "service degraded".

use std::fmt;

use thiserror::Error;

/// Boxed source error from a collaborator (store, model provider).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The pipeline stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Classification,
    Retrieval,
    Synthesis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Classification => f.write_str("classification"),
            Stage::Retrieval => f.write_str("retrieval"),
            Stage::Synthesis => f.write_str("synthesis"),
        }
    }
}

/// Errors that can occur while answering a query.
#[derive(Debug, Error)]
pub enum RagError {
    /// Language model unreachable or failed.
    ///
    /// During classification this is recovered by the rule-based fallback
    /// and never reaches the caller.
    #[error("language model unavailable during {stage}: {source}")]
    ModelUnavailable {
        stage: Stage,
        #[source]
        source: BoxError,
    },

    /// Embedding provider failed. Fatal for semantic, hybrid and analytical paths.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A stored embedding does not match the provider's dimension.
    ///
    /// Only the affected article is dropped from semantic ranking.
    #[error("embedding dimension mismatch for {article_id}: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch {
        article_id: String,
        expected: usize,
        actual: usize,
    },

    /// A model provider call failed (transport, status, malformed reply).
    ///
    /// The calling stage re-attributes it as `ModelUnavailable` or
    /// `EmbeddingUnavailable`.
    #[error("provider error: {0}")]
    Provider(#[source] BoxError),

    /// Article store operation failed
    #[error("storage error: {0}")]
    Store(#[source] BoxError),

    /// A model call exceeded the configured timeout
    #[error("{stage} timed out after {elapsed_ms}ms")]
    Timeout { stage: Stage, elapsed_ms: u64 },

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration value
    #[error("config error: {reason}")]
    Config { reason: String },
}

impl RagError {
    /// Build a store error from anything displayable.
    pub fn store(err: impl Into<BoxError>) -> Self {
        RagError::Store(err.into())
    }

    /// Build a provider error from anything displayable.
    pub fn provider(err: impl Into<BoxError>) -> Self {
        RagError::Provider(err.into())
    }

    /// Build a model error attributed to `stage`.
    pub fn model(stage: Stage, err: impl Into<BoxError>) -> Self {
        RagError::ModelUnavailable {
            stage,
            source: err.into(),
        }
    }

    /// The stage this error is attributed to.
    pub fn stage(&self) -> Stage {
        match self {
            RagError::ModelUnavailable { stage, .. } | RagError::Timeout { stage, .. } => *stage,
            RagError::EmbeddingUnavailable(_)
            | RagError::EmbeddingDimensionMismatch { .. }
            | RagError::Store(_)
            | RagError::Provider(_)
            | RagError::Config { .. }
            | RagError::Cancelled => Stage::Retrieval,
        }
    }
}

/// Why a classifier reply could not be turned into a classification.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON object found in model reply")]
    NoJsonObject,

    #[error("invalid JSON in model reply: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("unknown query category: {0}")]
    UnknownCategory(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, RagError>;
