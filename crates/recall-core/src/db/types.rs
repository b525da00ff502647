//! ============================================================================
//! Database Types - Summaries reported by the conversation store
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Per-organization message totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationStats {
    pub organization_id: String,
    pub messages: u64,
    /// Newest `created_at` (ms), if any message exists
    pub last_message_at: Option<i64>,
}

/// Database statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationStats {
    pub total_messages: u64,
    /// Sorted by organization id
    pub organizations: Vec<OrganizationStats>,
    pub db_size_bytes: u64,
}
