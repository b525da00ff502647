// ============================================================================
// ConversationDb - Embedded Conversation Store (redb)
// ============================================================================
// Durable local storage for chat messages. A message is persisted here
// before it is handed to the ingest queue.
// Default path: ~/.recall/conversations.redb (override via RECALL_DB_PATH)
// ============================================================================

pub mod types;

pub use types::{ConversationStats, OrganizationStats};

use anyhow::{anyhow, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::memory::ChatMessage;

// Table definitions
const MESSAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");

/// Separates organization and message id in keys. Not valid in either.
const KEY_SEPARATOR: char = '\u{1f}';

fn message_key(organization_id: &str, message_id: &str) -> String {
    format!("{}{}{}", organization_id, KEY_SEPARATOR, message_id)
}

/// Key range covering every message of one organization
fn organization_range(organization_id: &str) -> (String, String) {
    (
        format!("{}{}", organization_id, KEY_SEPARATOR),
        // '\u{20}' sorts right after the separator
        format!("{}\u{20}", organization_id),
    )
}

/// Embedded conversation store
pub struct ConversationDb {
    db: Database,
    path: PathBuf,
}

impl ConversationDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses RECALL_DB_PATH env var or ~/.recall/conversations.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("RECALL_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let recall_dir = home.join(".recall");
            std::fs::create_dir_all(&recall_dir)
                .map_err(|e| anyhow!("Failed to create .recall directory: {}", e))?;
            recall_dir.join("conversations.redb")
        };

        info!("Opening conversation store at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(MESSAGES)
                .map_err(|e| anyhow!("Failed to create messages table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a message. Messages are immutable: if one with the same
    /// organization and id already exists, nothing is written and `false`
    /// is returned.
    pub fn append(&self, message: &ChatMessage) -> Result<bool> {
        if message.organization_id.contains(KEY_SEPARATOR) || message.id.contains(KEY_SEPARATOR) {
            return Err(anyhow!("Message {} contains a reserved character", message.id));
        }

        let key = message_key(&message.organization_id, &message.id);
        let value = bincode::serialize(message)
            .map_err(|e| anyhow!("Failed to serialize message: {}", e))?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let inserted;
        {
            let mut table = write_txn.open_table(MESSAGES)
                .map_err(|e| anyhow!("Failed to open messages table: {}", e))?;
            let exists = table
                .get(key.as_str())
                .map_err(|e| anyhow!("Failed to get message: {}", e))?
                .is_some();
            if !exists {
                table.insert(key.as_str(), value.as_slice())
                    .map_err(|e| anyhow!("Failed to insert message: {}", e))?;
            }
            inserted = !exists;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        if inserted {
            debug!("Stored message: {}", message.id);
        } else {
            debug!("Message {} already stored", message.id);
        }
        Ok(inserted)
    }

    pub fn get(&self, organization_id: &str, message_id: &str) -> Result<Option<ChatMessage>> {
        let key = message_key(organization_id, message_id);

        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(MESSAGES)
            .map_err(|e| anyhow!("Failed to open messages table: {}", e))?;

        match table.get(key.as_str()).map_err(|e| anyhow!("Failed to get message: {}", e))? {
            Some(value) => {
                let message: ChatMessage = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize message: {}", e))?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// All messages of an organization, oldest first
    pub fn list_organization(&self, organization_id: &str) -> Result<Vec<ChatMessage>> {
        let (start, end) = organization_range(organization_id);

        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(MESSAGES)
            .map_err(|e| anyhow!("Failed to open messages table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(start.as_str()..end.as_str())
            .map_err(|e| anyhow!("Failed to iterate messages: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let message: ChatMessage = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize message: {}", e))?;
            results.push(message);
        }

        results.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(results)
    }

    /// Delete every message of an organization. Returns how many were removed.
    pub fn purge_organization(&self, organization_id: &str) -> Result<usize> {
        let (start, end) = organization_range(organization_id);

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn.open_table(MESSAGES)
                .map_err(|e| anyhow!("Failed to open messages table: {}", e))?;

            let mut keys = Vec::new();
            for entry in table.range::<&str>(start.as_str()..end.as_str())
                .map_err(|e| anyhow!("Failed to iterate messages: {}", e))?
            {
                let (key, _value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
                keys.push(key.value().to_string());
            }

            for key in &keys {
                table.remove(key.as_str())
                    .map_err(|e| anyhow!("Failed to remove message: {}", e))?;
            }
            removed = keys.len();
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        info!("Purged {} messages for organization {}", removed, organization_id);
        Ok(removed)
    }

    // ========================================================================
    // Stats
    // ========================================================================

    pub fn stats(&self) -> Result<ConversationStats> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(MESSAGES)
            .map_err(|e| anyhow!("Failed to open messages table: {}", e))?;

        let total_messages = table.len()
            .map_err(|e| anyhow!("Failed to count messages: {}", e))?;

        let mut per_org: BTreeMap<String, OrganizationStats> = BTreeMap::new();
        for entry in table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate messages: {}", e))?
        {
            let (key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let organization_id = key
                .value()
                .split(KEY_SEPARATOR)
                .next()
                .unwrap_or_default()
                .to_string();
            let message: ChatMessage = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize message: {}", e))?;

            let org = per_org.entry(organization_id.clone()).or_insert_with(|| OrganizationStats {
                organization_id,
                messages: 0,
                last_message_at: None,
            });
            org.messages += 1;
            org.last_message_at = Some(
                org.last_message_at
                    .map_or(message.created_at, |t| t.max(message.created_at)),
            );
        }

        let db_size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);

        Ok(ConversationStats {
            total_messages,
            organizations: per_org.into_values().collect(),
            db_size_bytes,
        })
    }
}
