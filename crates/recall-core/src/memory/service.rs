//! ============================================================================
//! Memory Service - Composition root for the memory pipeline
//! ============================================================================
//! Builds the embedder, index, store client, writer, retriever and ingest
//! queue from configuration and hands them out. Nothing is global.
//! ============================================================================

use std::sync::Arc;

use tracing::info;

use super::embeddings::{create_embedding_service, Embedder, EmbeddingGenerator};
use super::error::MemoryError;
use super::in_memory::InMemoryIndex;
use super::index::VectorIndex;
use super::qdrant::QdrantIndex;
use super::queue::{IngestQueue, IngestStats};
use super::record::VectorRecordBuilder;
use super::retriever::MemoryRetriever;
use super::store::VectorStoreClient;
use super::types::ChatMessage;
use super::writer::MemoryWriter;
use crate::config::{MemoryConfig, StoreBackend};

/// Owns one wired-up memory pipeline
pub struct MemoryService {
    store: VectorStoreClient,
    writer: Arc<MemoryWriter>,
    retriever: Arc<MemoryRetriever>,
    queue: Arc<IngestQueue>,
}

impl MemoryService {
    /// Build the pipeline against the configured embedding endpoint and
    /// vector store. Connects to Qdrant when that backend is selected.
    pub async fn from_config(config: &MemoryConfig) -> Result<Self, MemoryError> {
        config.validate()?;

        let embedder = create_embedding_service(
            config.embedding_api,
            config.embedding_base_url.clone(),
            Some(config.embedding_model.clone()),
            config.embedding_api_key.clone(),
            config.openai_api_key.clone(),
        )?
        .with_task_prefix(config.embedding_task_prefix);

        let index: Arc<dyn VectorIndex> = match config.store_backend {
            StoreBackend::Qdrant => Arc::new(
                QdrantIndex::connect(
                    &config.qdrant_url,
                    config.qdrant_api_key.clone(),
                    &config.collection,
                    config.embedding_dim,
                    config.store_timeout(),
                )
                .await?,
            ),
            StoreBackend::Memory => Arc::new(InMemoryIndex::new()),
        };

        Ok(Self::with_parts(Arc::new(embedder), index, config))
    }

    /// Wire the pipeline around an existing embedder and index
    pub fn with_parts(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: &MemoryConfig,
    ) -> Self {
        let generator = EmbeddingGenerator::new(embedder, config.embedding_dim, config.embed_timeout());
        let store = VectorStoreClient::new(index, config.store_options());
        let retry = config.retry_policy();

        let writer = MemoryWriter::new(
            generator.clone(),
            VectorRecordBuilder::new(config.store_text),
            store.clone(),
            retry.clone(),
        );
        let retriever = MemoryRetriever::new(generator.clone(), store.clone(), retry);
        let queue = IngestQueue::spawn(writer.clone(), config.queue_config());

        info!(
            "Memory service ready (backend: {}, model: {}, dimension: {})",
            store.backend(),
            generator.model(),
            generator.dimension()
        );

        Self {
            store,
            writer: Arc::new(writer),
            retriever: Arc::new(retriever),
            queue: Arc::new(queue),
        }
    }

    pub fn writer(&self) -> Arc<MemoryWriter> {
        self.writer.clone()
    }

    pub fn retriever(&self) -> Arc<MemoryRetriever> {
        self.retriever.clone()
    }

    pub fn queue(&self) -> Arc<IngestQueue> {
        self.queue.clone()
    }

    pub fn store(&self) -> &VectorStoreClient {
        &self.store
    }

    /// Queue a persisted message for background ingestion
    pub fn enqueue(&self, message: ChatMessage) -> Result<(), MemoryError> {
        self.queue.enqueue(message)
    }

    pub fn ingest_stats(&self) -> IngestStats {
        self.queue.stats()
    }

    /// Check if the vector store is reachable
    pub async fn health_check(&self) -> Result<bool, MemoryError> {
        self.store.health_check().await
    }

    /// Stop accepting messages and drain the ingest queue
    pub async fn shutdown(&self) {
        info!("Shutting down memory service");
        self.queue.shutdown().await;
    }
}
