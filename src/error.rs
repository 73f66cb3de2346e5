//! Top-level error types for the document-to-catalog matching pipeline.
//!
//! Each component owns a narrow error enum; [`CoreError`] composes them for
//! callers that don't care which stage failed.

use thiserror::Error;

/// Errors raised by the Catalog Store (component A).
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Errors raised by the Letter Store (component B).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("letter {0} not found")]
    LetterNotFound(i64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the LLM Client (component C).
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("LLM response was not valid JSON: {0}")]
    InvalidResponse(String),

    #[error("LLM request timed out")]
    Timeout,
}

impl LlmError {
    /// Whether a retry (within the client's own retry loop) is worth attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited(_) | Self::Timeout)
    }

    /// Error-kind tag used in `llm_api_calls.error_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Api(_) => "api",
            Self::RateLimited(_) => "rate_limited",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Timeout => "timeout",
        }
    }
}

/// Stage-tagged failure kinds, per `spec.md` §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Validation,
    Extract,
    Rerank,
    Catalog,
    Persist,
    Cancelled,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::Extract => "extract_error",
            Self::Rerank => "rerank_error",
            Self::Catalog => "catalog_error",
            Self::Persist => "persist_error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A single stage failure, carrying enough context for the orchestrator to
/// build a `ProcessingResult` without re-deriving the error kind.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: StageKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: StageKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StageKind::Validation, message)
    }

    pub fn extract(message: impl Into<String>) -> Self {
        Self::new(StageKind::Extract, message)
    }

    pub fn rerank(message: impl Into<String>) -> Self {
        Self::new(StageKind::Rerank, message)
    }

    pub fn persist(message: impl Into<String>) -> Self {
        Self::new(StageKind::Persist, message)
    }

    pub fn cancelled() -> Self {
        Self::new(StageKind::Cancelled, "cancelled")
    }
}

impl From<StoreError> for StageError {
    fn from(err: StoreError) -> Self {
        StageError::persist(err.to_string())
    }
}

/// Umbrella error for callers that just want a `Result<_, CoreError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("configuration error: {0}")]
    Configuration(String),
}
