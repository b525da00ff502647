//! ============================================================================
//! RECALL-CORE: Tenant-scoped chat memory
//! ============================================================================
//! This crate handles all backend logic for the Recall memory pipeline:
//! - Embedding chat messages through an external embedding endpoint
//! - Vector storage and organization-scoped retrieval via Qdrant
//! - Background ingestion with retry and redelivery
//! - Local conversation persistence via redb
//! ============================================================================

pub mod config;
pub mod db;
pub mod memory;

// Re-export main types for convenience
pub use config::{MemoryConfig, StoreBackend};
pub use db::ConversationDb;
pub use memory::{
    ChatMessage, ContextBlock, MemoryError, MemoryRetriever, MemoryService, MemoryWriter,
    MetadataFilter, RetrievalQuery, RetrievalResult, SenderRole,
};
