//! ============================================================================
//! In-Memory Index - Brute-force cosine index for local runs and tests
//! ============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::MemoryError;
use super::filter::TenantFilter;
use super::index::VectorIndex;
use super::types::{ScoredRecord, StoredRecord, VectorRecord};

/// Process-local vector index. Not persistent.
#[derive(Default)]
pub struct InMemoryIndex {
    records: RwLock<HashMap<Uuid, VectorRecord>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records across all tenants
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// Cosine similarity; zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), MemoryError> {
        let mut map = self.records.write().await;
        for record in records {
            map.insert(record.record_id, record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &TenantFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        let map = self.records.read().await;
        let mut hits: Vec<ScoredRecord> = map
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| ScoredRecord {
                record_id: r.record_id,
                metadata: r.metadata.clone(),
                source: r.source.clone(),
                score: cosine_similarity(vector, &r.vector),
            })
            .collect();

        hits.sort_by(ScoredRecord::rank_cmp);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn fetch(
        &self,
        filter: &TenantFilter,
        record_ids: &[Uuid],
    ) -> Result<Vec<StoredRecord>, MemoryError> {
        let map = self.records.read().await;
        Ok(record_ids
            .iter()
            .filter_map(|id| map.get(id))
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| StoredRecord {
                record_id: r.record_id,
                metadata: r.metadata.clone(),
                source: r.source.clone(),
            })
            .collect())
    }

    async fn count(&self, filter: &TenantFilter) -> Result<u64, MemoryError> {
        let map = self.records.read().await;
        Ok(map.values().filter(|r| filter.matches(&r.metadata)).count() as u64)
    }

    async fn delete(&self, filter: &TenantFilter) -> Result<(), MemoryError> {
        let mut map = self.records.write().await;
        map.retain(|_, r| !filter.matches(&r.metadata));
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, MemoryError> {
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::filter::MetadataFilter;
    use crate::memory::types::{RecordMetadata, RecordSource, SenderRole};

    fn record(org: &str, msg: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            record_id: crate::memory::record::record_id(org, msg),
            vector,
            metadata: RecordMetadata {
                organization_id: org.to_string(),
                user_id: "u1".to_string(),
                sender_role: SenderRole::User,
                created_at: 0,
            },
            source: RecordSource {
                message_id: msg.to_string(),
                text: None,
            },
        }
    }

    fn tenant(org: &str) -> TenantFilter {
        MetadataFilter::for_organization(org)
            .require_tenant("test")
            .unwrap()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let index = InMemoryIndex::new();
        index.upsert(&[record("org-A", "m1", vec![1.0, 0.0])]).await.unwrap();
        index.upsert(&[record("org-A", "m1", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_query_is_tenant_scoped() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[
                record("org-A", "m1", vec![1.0, 0.0]),
                record("org-B", "m2", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.0], &tenant("org-A"), 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.organization_id, "org-A");
    }

    #[tokio::test]
    async fn test_ties_ranked_before_truncation() {
        let index = InMemoryIndex::new();
        let records: Vec<_> = (0..8)
            .map(|i| {
                let mut r = record("org-A", &format!("m{}", i), vec![1.0, 0.0]);
                r.metadata.created_at = 100 + i;
                r
            })
            .collect();
        index.upsert(&records).await.unwrap();

        let hits = index.query(&[1.0, 0.0], &tenant("org-A"), 2).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.source.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m7", "m6"]);
    }

    #[tokio::test]
    async fn test_fetch_respects_tenant() {
        let index = InMemoryIndex::new();
        let a = record("org-A", "m1", vec![1.0, 0.0]);
        let b = record("org-B", "m1", vec![1.0, 0.0]);
        index.upsert(&[a.clone(), b.clone()]).await.unwrap();

        let found = index
            .fetch(&tenant("org-A"), &[a.record_id, b.record_id])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record_id, a.record_id);
    }

    #[tokio::test]
    async fn test_delete_only_matching() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[
                record("org-A", "m1", vec![1.0, 0.0]),
                record("org-A", "m2", vec![1.0, 0.0]),
                record("org-B", "m3", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        assert_eq!(index.count(&tenant("org-A")).await.unwrap(), 2);
        index.delete(&tenant("org-A")).await.unwrap();
        assert_eq!(index.count(&tenant("org-A")).await.unwrap(), 0);
        assert_eq!(index.count(&tenant("org-B")).await.unwrap(), 1);
    }
}
