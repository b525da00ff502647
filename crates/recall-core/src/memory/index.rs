//! ============================================================================
//! Vector Index - Backend seam for the vector store client
//! ============================================================================
//! One call per method, no retries, no batching. Every read or delete takes
//! a `TenantFilter`, so an unscoped request cannot be expressed here.
//! ============================================================================

use async_trait::async_trait;
use uuid::Uuid;

use super::error::MemoryError;
use super::filter::TenantFilter;
use super::types::{ScoredRecord, StoredRecord, VectorRecord};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite records by id
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), MemoryError>;

    /// Nearest neighbours among records matching `filter`
    async fn query(
        &self,
        vector: &[f32],
        filter: &TenantFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, MemoryError>;

    /// Read records back by id. Ids outside `filter` are not returned.
    async fn fetch(
        &self,
        filter: &TenantFilter,
        record_ids: &[Uuid],
    ) -> Result<Vec<StoredRecord>, MemoryError>;

    /// Exact number of records matching `filter`
    async fn count(&self, filter: &TenantFilter) -> Result<u64, MemoryError>;

    /// Remove every record matching `filter`
    async fn delete(&self, filter: &TenantFilter) -> Result<(), MemoryError>;

    async fn health_check(&self) -> Result<bool, MemoryError>;

    /// Backend name, for logging
    fn name(&self) -> &'static str;
}
