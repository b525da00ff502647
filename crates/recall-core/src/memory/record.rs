//! ============================================================================
//! Record Builder - Deterministic identity and metadata for chat messages
//! ============================================================================
//! A record id is the UUIDv5 of (organization_id, message_id), so building a
//! record for the same message twice always lands on the same point.
//! ============================================================================

use uuid::Uuid;

use super::error::MemoryError;
use super::types::{ChatMessage, EmbeddingVector, RecordMetadata, RecordSource, VectorRecord};

/// Namespace for chat memory record ids
pub const RECORD_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_3a52_9e0d_4b7a_8f21_d4c0_93e6_5a17);

/// Derive the record id for a message. The organization is length-prefixed
/// so ("a:b", "c") and ("a", "b:c") never collide.
pub fn record_id(organization_id: &str, message_id: &str) -> Uuid {
    let name = format!(
        "{}:{}:{}",
        organization_id.len(),
        organization_id,
        message_id
    );
    Uuid::new_v5(&RECORD_NAMESPACE, name.as_bytes())
}

/// Turns chat messages plus embeddings into store records
#[derive(Debug, Clone)]
pub struct VectorRecordBuilder {
    store_text: bool,
}

impl Default for VectorRecordBuilder {
    fn default() -> Self {
        Self { store_text: true }
    }
}

impl VectorRecordBuilder {
    pub fn new(store_text: bool) -> Self {
        Self { store_text }
    }

    pub fn build(&self, message: &ChatMessage, vector: EmbeddingVector) -> Result<VectorRecord, MemoryError> {
        if message.id.trim().is_empty() {
            return Err(MemoryError::InvalidInput("message id is empty".to_string()));
        }
        if vector.is_empty() {
            return Err(MemoryError::InvalidInput(format!(
                "empty embedding for message {}",
                message.id
            )));
        }

        let metadata = RecordMetadata {
            organization_id: message.organization_id.clone(),
            user_id: message.user_id.clone(),
            sender_role: message.sender_role,
            created_at: message.created_at,
        };
        metadata.validate()?;

        Ok(VectorRecord {
            record_id: record_id(&message.organization_id, &message.id),
            vector,
            metadata,
            source: RecordSource {
                message_id: message.id.clone(),
                text: self.store_text.then(|| message.text.clone()),
            },
        })
    }
}
