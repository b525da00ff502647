//! ============================================================================
//! Vector Store Client - Upsert/query/delete over a vector index
//! ============================================================================
//! Wraps a `VectorIndex` backend with:
//! - Record validation before any I/O
//! - Batching and per-batch retry for upserts
//! - Mandatory tenant filters on reads and deletes
//! - Deterministic result ordering
//! ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::MemoryError;
use super::filter::{MetadataFilter, TenantFilter};
use super::index::VectorIndex;
use super::retry::{with_retry, with_timeout, RetryPolicy};
use super::types::{
    validate_vector, RecordMetadata, RetrievalResult, ScoredRecord, StoredRecord, VectorRecord,
};

pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_TOP_K: usize = 50;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tuning for the store client
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub dimension: usize,
    pub batch_size: usize,
    pub max_top_k: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl StoreOptions {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            batch_size: DEFAULT_UPSERT_BATCH_SIZE,
            max_top_k: DEFAULT_MAX_TOP_K,
            timeout: DEFAULT_STORE_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Client for the external vector store
#[derive(Clone)]
pub struct VectorStoreClient {
    index: Arc<dyn VectorIndex>,
    options: StoreOptions,
}

impl VectorStoreClient {
    pub fn new(index: Arc<dyn VectorIndex>, options: StoreOptions) -> Self {
        Self { index, options }
    }

    pub fn dimension(&self) -> usize {
        self.options.dimension
    }

    pub fn max_top_k(&self) -> usize {
        self.options.max_top_k
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.options.retry
    }

    pub fn backend(&self) -> &'static str {
        self.index.name()
    }

    /// Insert or overwrite records. Returns how many were written.
    pub async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, MemoryError> {
        if records.is_empty() {
            return Ok(0);
        }

        for record in records {
            record.validate(self.options.dimension)?;
        }

        let batch_size = self.options.batch_size.max(1);
        let mut upserted = 0usize;
        let mut failed: Vec<Uuid> = Vec::new();
        let mut last_error: Option<MemoryError> = None;

        for (i, batch) in records.chunks(batch_size).enumerate() {
            debug!(
                "Upserting batch {} ({} records) into {}",
                i,
                batch.len(),
                self.index.name()
            );

            let result = with_retry("store upsert", &self.options.retry, move || {
                self.timed(self.index.upsert(batch))
            })
            .await;

            match result {
                Ok(()) => upserted += batch.len(),
                Err(e) => {
                    warn!("Upsert batch {} failed: {}", i, e);
                    failed.extend(batch.iter().map(|r| r.record_id));
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            None => Ok(upserted),
            Some(e) if upserted == 0 => Err(e),
            Some(e) => Err(MemoryError::PartialFailure {
                upserted,
                failed,
                cause: e.to_string(),
            }),
        }
    }

    /// Similarity search scoped to the filter's organization
    pub async fn query(
        &self,
        vector: &[f32],
        filter: MetadataFilter,
        top_k: usize,
    ) -> Result<RetrievalResult, MemoryError> {
        let tenant = filter.require_tenant("query")?;

        if top_k == 0 {
            return Err(MemoryError::InvalidInput("top_k must be at least 1".to_string()));
        }
        validate_vector(vector, self.options.dimension)?;

        let limit = top_k.min(self.options.max_top_k);
        if limit < top_k {
            debug!("Clamping top_k {} to {}", top_k, limit);
        }

        // Backends order equal scores arbitrarily, so over-fetch and rank here
        let candidates = limit.max(self.options.max_top_k);
        let scope = &tenant;
        let hits = with_retry("store query", &self.options.retry, move || {
            self.timed(self.index.query(vector, scope, candidates))
        })
        .await?;

        let mut hits = drop_foreign(hits, &tenant, |h| &h.metadata);
        hits.sort_by(ScoredRecord::rank_cmp);
        hits.truncate(limit);

        debug!("Query ({}) returned {} hits", tenant, hits.len());
        Ok(RetrievalResult::new(hits))
    }

    /// Read records back by id within a tenant
    pub async fn fetch(
        &self,
        filter: MetadataFilter,
        record_ids: &[Uuid],
    ) -> Result<Vec<StoredRecord>, MemoryError> {
        let tenant = filter.require_tenant("fetch")?;
        if record_ids.is_empty() {
            return Ok(vec![]);
        }

        let scope = &tenant;
        let records = with_retry("store fetch", &self.options.retry, move || {
            self.timed(self.index.fetch(scope, record_ids))
        })
        .await?;

        Ok(drop_foreign(records, &tenant, |r| &r.metadata))
    }

    /// Delete every record matching the filter. Returns the number removed.
    pub async fn delete_by_filter(&self, filter: MetadataFilter) -> Result<u64, MemoryError> {
        let tenant = filter.require_tenant("delete")?;

        let scope = &tenant;
        let matched = with_retry("store count", &self.options.retry, move || {
            self.timed(self.index.count(scope))
        })
        .await?;

        if matched == 0 {
            debug!("Nothing to delete for {}", tenant);
            return Ok(0);
        }

        with_retry("store delete", &self.options.retry, move || {
            self.timed(self.index.delete(scope))
        })
        .await?;

        info!("Deleted {} records where {}", matched, tenant);
        Ok(matched)
    }

    /// Exact record count within a tenant
    pub async fn count(&self, filter: MetadataFilter) -> Result<u64, MemoryError> {
        let tenant = filter.require_tenant("count")?;
        let scope = &tenant;
        with_retry("store count", &self.options.retry, move || {
            self.timed(self.index.count(scope))
        })
        .await
    }

    /// Check if the backend is reachable
    pub async fn health_check(&self) -> Result<bool, MemoryError> {
        self.timed(self.index.health_check()).await
    }

    async fn timed<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, MemoryError>>,
    ) -> Result<T, MemoryError> {
        let timeout = self.options.timeout;
        let backend = self.index.name();
        with_timeout(timeout, fut, || {
            MemoryError::StoreUnavailable(format!("{} timed out after {:?}", backend, timeout))
        })
        .await
    }
}

/// Backends are trusted to filter, but a hit outside the tenant is never returned
fn drop_foreign<T>(
    items: Vec<T>,
    tenant: &TenantFilter,
    metadata: impl Fn(&T) -> &RecordMetadata,
) -> Vec<T> {
    let before = items.len();
    let kept: Vec<T> = items
        .into_iter()
        .filter(|item| tenant.matches(metadata(item)))
        .collect();

    if kept.len() != before {
        error!(
            "Backend returned {} records outside {}; dropped",
            before - kept.len(),
            tenant
        );
    }
    kept
}
