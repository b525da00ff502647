//! ============================================================================
//! Memory Types - Data structures for tenant-scoped chat memory
//! ============================================================================
//! Chat messages, vector records, metadata and retrieval results.
//! ============================================================================

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MemoryError;

/// Fixed-length embedding produced by the external model
pub type EmbeddingVector = Vec<f32>;

/// Who sent a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    User,
    Assistant,
    System,
}

impl SenderRole {
    /// Wire/payload representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::User => "user",
            SenderRole::Assistant => "assistant",
            SenderRole::System => "system",
        }
    }

    /// Label used when rendering context for a prompt
    pub fn display_name(&self) -> &'static str {
        match self {
            SenderRole::User => "User",
            SenderRole::Assistant => "Assistant",
            SenderRole::System => "System",
        }
    }
}

impl std::fmt::Display for SenderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SenderRole {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(SenderRole::User),
            "assistant" => Ok(SenderRole::Assistant),
            "system" => Ok(SenderRole::System),
            _ => Err(MemoryError::InvalidInput(format!("Unknown sender role: {}", s))),
        }
    }
}

/// A chat message as recorded by the conversation store. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub sender_role: SenderRole,
    pub text: String,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
}

impl ChatMessage {
    /// Create a message stamped with the current time
    pub fn new(
        id: impl Into<String>,
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
        sender_role: SenderRole,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            sender_role,
            text: text.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Override the creation timestamp (milliseconds)
    pub fn at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Task hint sent to the embedding model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingTask {
    /// Content being stored
    Passage,
    /// A search query
    Query,
}

impl EmbeddingTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingTask::Passage => "passage",
            EmbeddingTask::Query => "query",
        }
    }
}

/// The filterable scoping fields of a record. Fixed schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub organization_id: String,
    pub user_id: String,
    pub sender_role: SenderRole,
    pub created_at: i64,
}

impl RecordMetadata {
    /// Check the schema before anything reaches the store
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.organization_id.trim().is_empty() {
            return Err(MemoryError::InvalidInput(
                "metadata.organization_id is empty".to_string(),
            ));
        }
        if self.user_id.trim().is_empty() {
            return Err(MemoryError::InvalidInput("metadata.user_id is empty".to_string()));
        }
        if self.created_at < 0 {
            return Err(MemoryError::InvalidInput(format!(
                "metadata.created_at is negative: {}",
                self.created_at
            )));
        }
        Ok(())
    }
}

/// Non-filterable provenance kept alongside a record for prompt rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSource {
    pub message_id: String,
    /// Message text, absent when text storage is disabled
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text: Option<String>,
}

/// The unit stored in the vector index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub record_id: Uuid,
    pub vector: EmbeddingVector,
    pub metadata: RecordMetadata,
    pub source: RecordSource,
}

impl VectorRecord {
    /// Validate identity, vector shape and metadata schema
    pub fn validate(&self, dimension: usize) -> Result<(), MemoryError> {
        if self.record_id.is_nil() {
            return Err(MemoryError::InvalidInput("record_id is nil".to_string()));
        }
        validate_vector(&self.vector, dimension)?;
        self.metadata.validate()
    }
}

/// Reject vectors of the wrong dimension or with NaN/inf components
pub fn validate_vector(vector: &[f32], dimension: usize) -> Result<(), MemoryError> {
    if vector.len() != dimension {
        return Err(MemoryError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(MemoryError::InvalidInput(
            "vector contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

/// A record as read back by id, without its vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record_id: Uuid,
    pub metadata: RecordMetadata,
    pub source: RecordSource,
}

/// One retrieved record with its similarity score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record_id: Uuid,
    pub metadata: RecordMetadata,
    pub source: RecordSource,
    pub score: f32,
}

impl ScoredRecord {
    /// Result order: descending score, then newer first
    pub fn rank_cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.metadata.created_at.cmp(&self.metadata.created_at))
    }
}

/// Ranked retrieval output: descending score, newer first on ties
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredRecord>,
}

impl RetrievalResult {
    pub fn new(hits: Vec<ScoredRecord>) -> Self {
        Self { hits }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn top(&self) -> Option<&ScoredRecord> {
        self.hits.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredRecord> {
        self.hits.iter()
    }
}

/// A read-path request. The organization always scopes the search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub organization_id: String,
    pub query_text: String,
    pub top_k: usize,
    /// Narrow to one user's messages
    #[serde(default)]
    pub user_id: Option<String>,
    /// Narrow to one sender role
    #[serde(default)]
    pub sender_role: Option<SenderRole>,
}

impl RetrievalQuery {
    pub fn new(organization_id: impl Into<String>, query_text: impl Into<String>, top_k: usize) -> Self {
        Self {
            organization_id: organization_id.into(),
            query_text: query_text.into(),
            top_k,
            user_id: None,
            sender_role: None,
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_role(mut self, sender_role: SenderRole) -> Self {
        self.sender_role = Some(sender_role);
        self
    }
}
