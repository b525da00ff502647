//! Deterministic embedders and failure-injecting indexes for tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::embeddings::Embedder;
use super::error::MemoryError;
use super::filter::TenantFilter;
use super::in_memory::InMemoryIndex;
use super::index::VectorIndex;
use super::types::{EmbeddingTask, EmbeddingVector, ScoredRecord, StoredRecord, VectorRecord};

pub const TEST_DIM: usize = 64;

/// Bag-of-words embedder: each token hashes into one bucket, then the vector
/// is L2-normalized. Texts sharing words score higher.
pub struct HashEmbedder {
    dimension: usize,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> EmbeddingVector {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(&token.to_lowercase()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
        _task: EmbeddingTask,
    ) -> Result<Vec<EmbeddingVector>, MemoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model(&self) -> &str {
        "hash-bow"
    }
}

/// Fails the first `failures` calls with `error`, then embeds like `HashEmbedder`
pub struct FailingEmbedder {
    error: MemoryError,
    failures: u32,
    calls: AtomicU32,
    fallback: HashEmbedder,
}

impl FailingEmbedder {
    pub fn always(error: MemoryError) -> Self {
        Self::first(u32::MAX, error)
    }

    pub fn first(failures: u32, error: MemoryError) -> Self {
        Self {
            error,
            failures,
            calls: AtomicU32::new(0),
            fallback: HashEmbedder::new(TEST_DIM),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<EmbeddingVector>, MemoryError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(self.error.clone());
        }
        self.fallback.embed_batch(texts, task).await
    }

    fn model(&self) -> &str {
        "failing"
    }
}

/// In-memory index with scripted upsert failures and latency
#[derive(Default)]
pub struct FlakyIndex {
    inner: InMemoryIndex,
    unavailable_upserts: u32,
    rejected_upsert_calls: Vec<u32>,
    unavailable_queries: u32,
    delay: Option<Duration>,
    upsert_calls: AtomicU32,
    query_calls: AtomicU32,
}

impl FlakyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `n` upsert calls fail with `StoreUnavailable`
    pub fn unavailable_upserts(mut self, n: u32) -> Self {
        self.unavailable_upserts = n;
        self
    }

    /// Upsert call number `call` (zero-based) fails with `StoreRejected`
    pub fn reject_upsert_call(mut self, call: u32) -> Self {
        self.rejected_upsert_calls.push(call);
        self
    }

    /// The first `n` query calls fail with `StoreUnavailable`
    pub fn unavailable_queries(mut self, n: u32) -> Self {
        self.unavailable_queries = n;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn inner(&self) -> &InMemoryIndex {
        &self.inner
    }

    pub fn upsert_calls(&self) -> u32 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> u32 {
        self.query_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), MemoryError> {
        self.pause().await;
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.unavailable_upserts {
            return Err(MemoryError::StoreUnavailable("injected outage".to_string()));
        }
        if self.rejected_upsert_calls.contains(&call) {
            return Err(MemoryError::StoreRejected("injected rejection".to_string()));
        }
        self.inner.upsert(records).await
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &TenantFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        self.pause().await;
        let call = self.query_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.unavailable_queries {
            return Err(MemoryError::StoreUnavailable("injected outage".to_string()));
        }
        self.inner.query(vector, filter, limit).await
    }

    async fn fetch(
        &self,
        filter: &TenantFilter,
        record_ids: &[Uuid],
    ) -> Result<Vec<StoredRecord>, MemoryError> {
        self.pause().await;
        self.inner.fetch(filter, record_ids).await
    }

    async fn count(&self, filter: &TenantFilter) -> Result<u64, MemoryError> {
        self.inner.count(filter).await
    }

    async fn delete(&self, filter: &TenantFilter) -> Result<(), MemoryError> {
        self.inner.delete(filter).await
    }

    async fn health_check(&self) -> Result<bool, MemoryError> {
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// A misbehaving backend that ignores the tenant filter on queries
pub struct LeakyIndex {
    hits: Vec<ScoredRecord>,
}

impl LeakyIndex {
    pub fn returning(hits: Vec<ScoredRecord>) -> Self {
        Self { hits }
    }
}

#[async_trait]
impl VectorIndex for LeakyIndex {
    async fn upsert(&self, _records: &[VectorRecord]) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn query(
        &self,
        _vector: &[f32],
        _filter: &TenantFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        Ok(self.hits.iter().take(limit).cloned().collect())
    }

    async fn fetch(
        &self,
        _filter: &TenantFilter,
        _record_ids: &[Uuid],
    ) -> Result<Vec<StoredRecord>, MemoryError> {
        Ok(vec![])
    }

    async fn count(&self, _filter: &TenantFilter) -> Result<u64, MemoryError> {
        Ok(self.hits.len() as u64)
    }

    async fn delete(&self, _filter: &TenantFilter) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, MemoryError> {
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "leaky"
    }
}
