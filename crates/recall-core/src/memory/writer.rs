//! ============================================================================
//! Memory Writer - Message -> embedding -> record -> upsert
//! ============================================================================
//! Runs after the conversation store has persisted the message. Writing the
//! same message again overwrites its record, so redelivery is always safe.
//! ============================================================================

use std::collections::HashSet;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::embeddings::{validate_text, EmbeddingGenerator};
use super::error::MemoryError;
use super::record::{record_id, VectorRecordBuilder};
use super::retry::{calculate_delay, with_retry, RetryPolicy};
use super::store::VectorStoreClient;
use super::types::{ChatMessage, EmbeddingTask, VectorRecord};

/// Write path for chat memory
#[derive(Clone)]
pub struct MemoryWriter {
    generator: EmbeddingGenerator,
    builder: VectorRecordBuilder,
    store: VectorStoreClient,
    retry: RetryPolicy,
}

impl MemoryWriter {
    pub fn new(
        generator: EmbeddingGenerator,
        builder: VectorRecordBuilder,
        store: VectorStoreClient,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            generator,
            builder,
            store,
            retry,
        }
    }

    /// Embed and store one message
    pub async fn ingest(&self, message: &ChatMessage) -> Result<(), MemoryError> {
        validate_text(&message.text)?;

        debug!(
            "Ingesting message {} for organization {}",
            message.id, message.organization_id
        );

        let vector = with_retry("embed passage", &self.retry, move || {
            self.generator.embed(&message.text, EmbeddingTask::Passage)
        })
        .await?;

        let record = self.builder.build(message, vector)?;
        self.store.upsert(std::slice::from_ref(&record)).await?;

        debug!("Stored record {} for message {}", record.record_id, message.id);
        Ok(())
    }

    /// Embed and store many messages with one embedding call. Batches that fail
    /// are re-upserted from the already-built records; nothing is re-embedded.
    pub async fn ingest_batch(&self, messages: &[ChatMessage]) -> Result<usize, MemoryError> {
        if messages.is_empty() {
            return Ok(0);
        }
        for message in messages {
            validate_text(&message.text).map_err(|e| match e {
                MemoryError::InvalidInput(msg) => {
                    MemoryError::InvalidInput(format!("message {}: {}", message.id, msg))
                }
                other => other,
            })?;
        }

        // One record per message id; the first occurrence wins
        let mut seen = HashSet::new();
        let messages: Vec<&ChatMessage> = messages
            .iter()
            .filter(|m| seen.insert(record_id(&m.organization_id, &m.id)))
            .collect();

        let texts: Vec<String> = messages.iter().map(|m| m.text.clone()).collect();
        let texts = &texts;
        let vectors = with_retry("embed passages", &self.retry, move || {
            self.generator.embed_batch(texts, EmbeddingTask::Passage)
        })
        .await?;

        let records = messages
            .iter()
            .zip(vectors)
            .map(|(message, vector)| self.builder.build(message, vector))
            .collect::<Result<Vec<VectorRecord>, _>>()?;

        let mut pending = records;
        let mut written = 0usize;
        let mut attempt = 0u32;

        loop {
            match self.store.upsert(&pending).await {
                Ok(n) => {
                    written += n;
                    break;
                }
                Err(MemoryError::PartialFailure {
                    upserted,
                    failed,
                    cause,
                }) => {
                    written += upserted;
                    attempt += 1;

                    if attempt >= self.retry.max_attempts.max(1) {
                        warn!(
                            "Batch ingest left {} records unwritten after {} rounds",
                            failed.len(),
                            attempt
                        );
                        return Err(MemoryError::PartialFailure {
                            upserted: written,
                            failed,
                            cause,
                        });
                    }

                    let failed_ids: HashSet<Uuid> = failed.iter().copied().collect();
                    pending.retain(|r| failed_ids.contains(&r.record_id));
                    warn!(
                        "Re-upserting {} failed records (round {})",
                        pending.len(),
                        attempt
                    );
                    tokio::time::sleep(calculate_delay(attempt - 1, &self.retry)).await;
                }
                Err(e) if written > 0 => {
                    return Err(MemoryError::PartialFailure {
                        upserted: written,
                        failed: pending.iter().map(|r| r.record_id).collect(),
                        cause: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        info!("Ingested {} messages", written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::memory::embeddings::{Embedder, DEFAULT_EMBED_TIMEOUT};
    use crate::memory::filter::MetadataFilter;
    use crate::memory::in_memory::InMemoryIndex;
    use crate::memory::index::VectorIndex;
    use crate::memory::store::StoreOptions;
    use crate::memory::test_support::{FailingEmbedder, FlakyIndex, HashEmbedder, TEST_DIM};
    use crate::memory::types::SenderRole;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
        }
    }

    fn writer(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, batch_size: usize) -> MemoryWriter {
        let store = VectorStoreClient::new(
            index,
            StoreOptions {
                batch_size,
                retry: fast_retry(),
                ..StoreOptions::new(TEST_DIM)
            },
        );
        MemoryWriter::new(
            EmbeddingGenerator::new(embedder, TEST_DIM, DEFAULT_EMBED_TIMEOUT),
            VectorRecordBuilder::default(),
            store,
            fast_retry(),
        )
    }

    fn message(id: &str, text: &str) -> ChatMessage {
        ChatMessage::new(id, "org-A", "u1", SenderRole::User, text)
    }

    #[tokio::test]
    async fn test_ingest_rejects_blank_text() {
        let embedder = Arc::new(HashEmbedder::new(TEST_DIM));
        let w = writer(embedder.clone(), Arc::new(InMemoryIndex::new()), 100);

        let err = w.ingest(&message("m1", "  ")).await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_embedding_outage_is_retried() {
        let embedder = Arc::new(FailingEmbedder::first(
            2,
            MemoryError::EmbeddingUnavailable("503".into()),
        ));
        let index = Arc::new(InMemoryIndex::new());
        let w = writer(embedder.clone(), index.clone(), 100);

        w.ingest(&message("m1", "pallet count")).await.unwrap();
        assert_eq!(embedder.calls(), 3);
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_rejected_embedding_not_retried() {
        let embedder = Arc::new(FailingEmbedder::always(MemoryError::EmbeddingRejected(
            "400".into(),
        )));
        let w = writer(embedder.clone(), Arc::new(InMemoryIndex::new()), 100);

        let err = w.ingest(&message("m1", "pallet count")).await.unwrap_err();
        assert!(matches!(err, MemoryError::EmbeddingRejected(_)));
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn test_ingest_batch_single_embedding_call() {
        let embedder = Arc::new(HashEmbedder::new(TEST_DIM));
        let index = Arc::new(InMemoryIndex::new());
        let w = writer(embedder.clone(), index.clone(), 2);

        let messages: Vec<_> = (0..5)
            .map(|i| message(&format!("m{}", i), &format!("carrier update {}", i)))
            .collect();
        assert_eq!(w.ingest_batch(&messages).await.unwrap(), 5);
        assert_eq!(embedder.calls(), 1);
        assert_eq!(index.len().await, 5);
    }

    #[tokio::test]
    async fn test_ingest_batch_counts_duplicate_ids_once() {
        let embedder = Arc::new(HashEmbedder::new(TEST_DIM));
        let index = Arc::new(InMemoryIndex::new());
        let w = writer(embedder.clone(), index.clone(), 100);

        let messages = vec![
            message("m1", "gate pass for trailer 12"),
            message("m2", "gate pass for trailer 14"),
            message("m1", "gate pass for trailer 12, edited"),
        ];
        assert_eq!(w.ingest_batch(&messages).await.unwrap(), 2);
        assert_eq!(index.len().await, 2);

        let stored = w
            .store
            .fetch(MetadataFilter::for_organization("org-A"), &[record_id("org-A", "m1")])
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_batch_retries_only_failed_subset() {
        // Batches of 2: calls 0,1,2 cover the first round, call 1 is rejected.
        let index = Arc::new(FlakyIndex::new().reject_upsert_call(1));
        let embedder = Arc::new(HashEmbedder::new(TEST_DIM));
        let w = writer(embedder.clone(), index.clone(), 2);

        let messages: Vec<_> = (0..5)
            .map(|i| message(&format!("m{}", i), &format!("dock appointment {}", i)))
            .collect();

        assert_eq!(w.ingest_batch(&messages).await.unwrap(), 5);
        // One extra call for the two-record residue, no extra embedding
        assert_eq!(index.upsert_calls(), 4);
        assert_eq!(embedder.calls(), 1);
        assert_eq!(
            w.store
                .count(MetadataFilter::for_organization("org-A"))
                .await
                .unwrap(),
            5
        );
    }

    #[tokio::test]
    async fn test_ingest_batch_surfaces_residue() {
        let index = Arc::new(
            FlakyIndex::new()
                .reject_upsert_call(1)
                .reject_upsert_call(3)
                .reject_upsert_call(4),
        );
        let w = writer(Arc::new(HashEmbedder::new(TEST_DIM)), index, 2);

        let messages: Vec<_> = (0..5)
            .map(|i| message(&format!("m{}", i), &format!("dock appointment {}", i)))
            .collect();

        match w.ingest_batch(&messages).await.unwrap_err() {
            MemoryError::PartialFailure { upserted, failed, .. } => {
                assert_eq!(upserted, 3);
                assert_eq!(failed.len(), 2);
            }
            other => panic!("expected PartialFailure, got {:?}", other),
        }
    }
}
