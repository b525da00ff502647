//! ============================================================================
//! Qdrant Index - Vector database operations over gRPC
//! ============================================================================
//! Stores chat memory points with a fixed payload schema. Writes use
//! `wait=true` so an acknowledged upsert is immediately searchable.
//! ============================================================================

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, points_selector::PointsSelectorOneOf, Condition,
    CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, GetPointsBuilder, PointId, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Qdrant, QdrantError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::MemoryError;
use super::filter::TenantFilter;
use super::index::VectorIndex;
use super::types::{
    RecordMetadata, RecordSource, ScoredRecord, SenderRole, StoredRecord, VectorRecord,
};

/// Default collection name for chat memory
pub const COLLECTION_NAME: &str = "chat_memory";

const FIELD_ORGANIZATION: &str = "organization_id";
const FIELD_USER: &str = "user_id";
const FIELD_ROLE: &str = "sender_role";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_MESSAGE_ID: &str = "message_id";
const FIELD_TEXT: &str = "text";

/// Vector index backed by a Qdrant collection
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
}

impl QdrantIndex {
    /// Connect to Qdrant and make sure the collection and payload indexes exist
    pub async fn connect(
        url: &str,
        api_key: Option<String>,
        collection: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, MemoryError> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .timeout(timeout)
            .build()
            .map_err(|e| MemoryError::Config(format!("Failed to create Qdrant client: {}", e)))?;

        let index = Self {
            client,
            collection: collection.to_string(),
        };

        index.ensure_collection(dimension).await?;

        Ok(index)
    }

    /// Ensure the memory collection exists with keyword indexes on the
    /// filterable metadata fields
    async fn ensure_collection(&self, dimension: usize) -> Result<(), MemoryError> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| classify_qdrant_error("check collection existence", e))?;

        if exists {
            debug!("Collection {} already exists", self.collection);
            return Ok(());
        }

        info!("Creating collection: {}", self.collection);

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
            )
            .await
            .map_err(|e| classify_qdrant_error("create collection", e))?;

        for field in [FIELD_ORGANIZATION, FIELD_USER, FIELD_ROLE] {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &self.collection,
                    field,
                    FieldType::Keyword,
                ))
                .await
                .map_err(|e| classify_qdrant_error("create payload index", e))?;
        }

        info!("Collection {} created successfully", self.collection);
        Ok(())
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), MemoryError> {
        let points: Vec<PointStruct> = records
            .iter()
            .map(|r| {
                PointStruct::new(
                    r.record_id.to_string(),
                    r.vector.clone(),
                    record_payload(&r.metadata, &r.source),
                )
            })
            .collect();

        debug!("Upserting {} points into {}", points.len(), self.collection);

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|e| classify_qdrant_error("upsert points", e))?;

        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &TenantFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        debug!("Searching {} ({}, limit: {})", self.collection, filter, limit);

        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector.to_vec(), limit as u64)
                    .filter(to_qdrant_filter(filter))
                    .with_payload(true),
            )
            .await
            .map_err(|e| classify_qdrant_error("search points", e))?;

        let hits = search_result
            .result
            .into_iter()
            .filter_map(|point| {
                let record_id = extract_uuid_from_point_id(point.id?)?;
                let (metadata, source) = parse_payload(&point.payload)?;
                Some(ScoredRecord {
                    record_id,
                    metadata,
                    source,
                    score: point.score,
                })
            })
            .collect();

        Ok(hits)
    }

    async fn fetch(
        &self,
        filter: &TenantFilter,
        record_ids: &[Uuid],
    ) -> Result<Vec<StoredRecord>, MemoryError> {
        if record_ids.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<PointId> = record_ids.iter().map(|id| PointId::from(id.to_string())).collect();

        let response = self
            .client
            .get_points(GetPointsBuilder::new(&self.collection, ids).with_payload(true))
            .await
            .map_err(|e| classify_qdrant_error("get points", e))?;

        // Lookup by id takes no filter; scope the result here
        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let record_id = extract_uuid_from_point_id(point.id?)?;
                let (metadata, source) = parse_payload(&point.payload)?;
                Some(StoredRecord {
                    record_id,
                    metadata,
                    source,
                })
            })
            .filter(|r| filter.matches(&r.metadata))
            .collect())
    }

    async fn count(&self, filter: &TenantFilter) -> Result<u64, MemoryError> {
        let response = self
            .client
            .count(
                CountPointsBuilder::new(&self.collection)
                    .filter(to_qdrant_filter(filter))
                    .exact(true),
            )
            .await
            .map_err(|e| classify_qdrant_error("count points", e))?;

        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    async fn delete(&self, filter: &TenantFilter) -> Result<(), MemoryError> {
        info!("Deleting points in {} where {}", self.collection, filter);

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsSelectorOneOf::Filter(to_qdrant_filter(filter)))
                    .wait(true),
            )
            .await
            .map_err(|e| classify_qdrant_error("delete points", e))?;

        Ok(())
    }

    async fn health_check(&self) -> Result<bool, MemoryError> {
        match self.client.health_check().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Qdrant health check failed: {}", e);
                Ok(false)
            }
        }
    }

    fn name(&self) -> &'static str {
        "qdrant"
    }
}

/// Translate a tenant filter into Qdrant `must` conditions
fn to_qdrant_filter(filter: &TenantFilter) -> Filter {
    let mut conditions = vec![Condition::matches(
        FIELD_ORGANIZATION,
        filter.organization_id().to_string(),
    )];
    if let Some(user) = filter.user_id() {
        conditions.push(Condition::matches(FIELD_USER, user.to_string()));
    }
    if let Some(role) = filter.sender_role() {
        conditions.push(Condition::matches(FIELD_ROLE, role.as_str().to_string()));
    }
    Filter::must(conditions)
}

fn record_payload(metadata: &RecordMetadata, source: &RecordSource) -> HashMap<String, Value> {
    let mut payload: HashMap<String, Value> = [
        (FIELD_ORGANIZATION.to_string(), Value::from(metadata.organization_id.clone())),
        (FIELD_USER.to_string(), Value::from(metadata.user_id.clone())),
        (FIELD_ROLE.to_string(), Value::from(metadata.sender_role.as_str().to_string())),
        (FIELD_CREATED_AT.to_string(), Value::from(metadata.created_at)),
        (FIELD_MESSAGE_ID.to_string(), Value::from(source.message_id.clone())),
    ]
    .into_iter()
    .collect();

    if let Some(text) = &source.text {
        payload.insert(FIELD_TEXT.to_string(), Value::from(text.clone()));
    }
    payload
}

/// Points with a payload outside the schema are skipped
fn parse_payload(payload: &HashMap<String, Value>) -> Option<(RecordMetadata, RecordSource)> {
    let metadata = RecordMetadata {
        organization_id: get_string(payload, FIELD_ORGANIZATION)?,
        user_id: get_string(payload, FIELD_USER)?,
        sender_role: get_string(payload, FIELD_ROLE)?.parse::<SenderRole>().ok()?,
        created_at: get_i64(payload, FIELD_CREATED_AT)?,
    };
    let source = RecordSource {
        message_id: get_string(payload, FIELD_MESSAGE_ID)?,
        text: get_string(payload, FIELD_TEXT),
    };
    Some((metadata, source))
}

/// Transport trouble is transient; requests the server refuses are not
fn classify_qdrant_error(operation: &str, error: QdrantError) -> MemoryError {
    let message = format!("Failed to {}: {}", operation, error);
    let lower = message.to_lowercase();

    if lower.contains("invalid argument")
        || lower.contains("invalidargument")
        || lower.contains("wrong input")
        || lower.contains("bad request")
        || lower.contains("dimension")
        || lower.contains("not found")
        || lower.contains("notfound")
        || lower.contains("unauthenticated")
        || lower.contains("permission denied")
    {
        return MemoryError::StoreRejected(message);
    }

    MemoryError::StoreUnavailable(message)
}

// Helper to extract UUID from PointId
fn extract_uuid_from_point_id(point_id: PointId) -> Option<Uuid> {
    match point_id.point_id_options? {
        PointIdOptions::Uuid(uuid_str) => Uuid::parse_str(&uuid_str).ok(),
        PointIdOptions::Num(_) => None, // Record ids are always UUIDs
    }
}

// Helper functions to extract values from payload
fn get_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str().map(|s| s.to_string()))
}

fn get_i64(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
    payload.get(key).and_then(|v| v.as_integer())
}
