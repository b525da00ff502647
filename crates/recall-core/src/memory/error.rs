//! ============================================================================
//! Memory Errors - Failure taxonomy for the memory pipeline
//! ============================================================================
//! Every pipeline operation returns `Result<_, MemoryError>`. Only
//! `EmbeddingUnavailable` and `StoreUnavailable` are transient; everything
//! else fails fast.
//! ============================================================================

use uuid::Uuid;

/// Errors surfaced by the embedding, store, writer and retriever layers
#[derive(Debug, Clone, thiserror::Error)]
pub enum MemoryError {
    /// Empty text, malformed filter, bad record. Never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding request rejected: {0}")]
    EmbeddingRejected(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Vector store rejected request: {0}")]
    StoreRejected(String),

    /// Some batches landed, the listed record ids did not
    #[error("Partial upsert failure: {upserted} upserted, {} failed ({cause})", failed.len())]
    PartialFailure {
        upserted: usize,
        failed: Vec<Uuid>,
        cause: String,
    },

    /// A query or delete was built without an organization constraint
    #[error("Missing tenant filter on {0}: organization_id is required")]
    MissingTenantFilter(&'static str),

    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(#[source] Box<MemoryError>),

    #[error("Ingest queue is full")]
    QueueFull,

    #[error("Ingest queue is closed")]
    QueueClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MemoryError {
    /// Whether a retry with backoff may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MemoryError::EmbeddingUnavailable(_) | MemoryError::StoreUnavailable(_)
        )
    }

    /// Wrap a read-path failure. Caller-side mistakes pass through unchanged so
    /// the composer can tell "you asked wrong" from "memory is down".
    pub fn into_retrieval(self) -> MemoryError {
        match self {
            MemoryError::InvalidInput(_)
            | MemoryError::MissingTenantFilter(_)
            | MemoryError::RetrievalUnavailable(_) => self,
            other => MemoryError::RetrievalUnavailable(Box::new(other)),
        }
    }
}
