//! ============================================================================
//! Memory Retriever - Query text -> embedding -> tenant-scoped search
//! ============================================================================
//! Fails closed: when the embedding service or the store is down the caller
//! gets `RetrievalUnavailable`, never results from outside the tenant and
//! never a silent empty list.
//! ============================================================================

use tracing::{debug, warn};

use super::embeddings::{validate_text, EmbeddingGenerator};
use super::error::MemoryError;
use super::filter::MetadataFilter;
use super::retry::{with_retry, RetryPolicy};
use super::store::VectorStoreClient;
use super::types::{EmbeddingTask, RetrievalQuery, RetrievalResult};

/// Read path for chat memory
#[derive(Clone)]
pub struct MemoryRetriever {
    generator: EmbeddingGenerator,
    store: VectorStoreClient,
    retry: RetryPolicy,
}

impl MemoryRetriever {
    pub fn new(generator: EmbeddingGenerator, store: VectorStoreClient, retry: RetryPolicy) -> Self {
        Self {
            generator,
            store,
            retry,
        }
    }

    /// Top-K prior messages of `organization_id` most similar to `query_text`
    pub async fn retrieve(
        &self,
        organization_id: &str,
        query_text: &str,
        top_k: usize,
    ) -> Result<RetrievalResult, MemoryError> {
        self.retrieve_query(&RetrievalQuery::new(organization_id, query_text, top_k))
            .await
    }

    /// Like `retrieve`, optionally narrowed to a user and/or sender role
    pub async fn retrieve_query(&self, query: &RetrievalQuery) -> Result<RetrievalResult, MemoryError> {
        let mut filter = MetadataFilter::for_organization(query.organization_id.clone());
        if let Some(user) = &query.user_id {
            filter = filter.user(user.clone());
        }
        if let Some(role) = query.sender_role {
            filter = filter.sender_role(role);
        }

        // Reject a bad request before spending an embedding call on it
        let tenant = filter.clone().require_tenant("query")?;
        validate_text(&query.query_text)?;
        if query.top_k == 0 {
            return Err(MemoryError::InvalidInput("top_k must be at least 1".to_string()));
        }

        debug!("Retrieving up to {} records ({})", query.top_k, tenant);

        let text = query.query_text.as_str();
        let vector = with_retry("embed query", &self.retry, move || {
            self.generator.embed(text, EmbeddingTask::Query)
        })
        .await
        .map_err(|e| self.fail_closed(e))?;

        let result = self
            .store
            .query(&vector, filter, query.top_k)
            .await
            .map_err(|e| self.fail_closed(e))?;

        debug!("Retrieved {} records ({})", result.len(), tenant);
        Ok(result)
    }

    fn fail_closed(&self, error: MemoryError) -> MemoryError {
        let error = error.into_retrieval();
        if matches!(error, MemoryError::RetrievalUnavailable(_)) {
            warn!("Memory retrieval failed: {}", error);
        }
        error
    }
}
