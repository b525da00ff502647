//! ============================================================================
//! Memory Module - Tenant-scoped conversation memory
//! ============================================================================
//! Turns chat messages into vector embeddings, stores them with organization
//! metadata, and retrieves relevant prior context for one organization.
//!
//! ## Features
//! - Deterministic record ids: re-ingesting a message never duplicates it
//! - Every query and delete carries an organization filter
//! - Retries with backoff for transient embedding and store failures
//! - Background ingestion with bounded concurrency and redelivery
//!
//! ## Architecture
//! ```text
//! ChatMessage → IngestQueue → MemoryWriter → Embed → Record → Upsert
//!                                                              ↓
//!                                                   VectorIndex (Qdrant)
//!                                                              ↑
//! Query text  → MemoryRetriever → Embed → Filtered query ──────┘
//!                     ↓
//!               ContextBlock → prompt composer
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use recall_core::config::MemoryConfig;
//! use recall_core::memory::{ChatMessage, ContextBlock, MemoryService, SenderRole};
//!
//! let service = MemoryService::from_config(&MemoryConfig::from_env()?).await?;
//!
//! // After the conversation store has persisted the message
//! service.enqueue(ChatMessage::new("m1", "org-3pl-7", "u1", SenderRole::User, "Where is PO 4521?"))?;
//!
//! // Before composing a reply
//! let outcome = service.retriever().retrieve("org-3pl-7", "shipment status", 5).await;
//! let context = ContextBlock::from_outcome(outcome);
//! ```
//! ============================================================================

mod context;
mod embeddings;
mod error;
mod filter;
mod in_memory;
mod index;
mod qdrant;
mod queue;
mod record;
mod retriever;
mod retry;
mod service;
mod store;
mod types;
mod writer;

#[cfg(test)]
mod test_support;

// Re-export public types
pub use context::ContextBlock;
pub use embeddings::{
    create_embedding_service, validate_text, Embedder, EmbeddingApi, EmbeddingGenerator,
    EmbeddingService, DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBED_TIMEOUT, EMBEDDING_DIM,
};
pub use error::MemoryError;
pub use filter::{MetadataFilter, TenantFilter};
pub use in_memory::{cosine_similarity, InMemoryIndex};
pub use index::VectorIndex;
pub use qdrant::{QdrantIndex, COLLECTION_NAME};
pub use queue::{IngestQueue, IngestQueueConfig, IngestStats};
pub use record::{record_id, VectorRecordBuilder, RECORD_NAMESPACE};
pub use retriever::MemoryRetriever;
pub use retry::{calculate_delay, with_retry, RetryPolicy};
pub use service::MemoryService;
pub use store::{
    StoreOptions, VectorStoreClient, DEFAULT_MAX_TOP_K, DEFAULT_STORE_TIMEOUT,
    DEFAULT_UPSERT_BATCH_SIZE,
};
pub use types::{
    validate_vector, ChatMessage, EmbeddingTask, EmbeddingVector, RecordMetadata, RecordSource,
    RetrievalQuery, RetrievalResult, ScoredRecord, SenderRole, StoredRecord, VectorRecord,
};
pub use writer::MemoryWriter;
