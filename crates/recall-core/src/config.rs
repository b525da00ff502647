// ============================================================================
// Memory Configuration - RECALL_* environment variables
// ============================================================================

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::memory::{
    EmbeddingApi, IngestQueueConfig, MemoryError, RetryPolicy, StoreOptions, COLLECTION_NAME,
    DEFAULT_EMBEDDING_MODEL, EMBEDDING_DIM,
};

/// Which vector index backs the store client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Qdrant,
    /// Process-local, not persistent
    Memory,
}

impl FromStr for StoreBackend {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "qdrant" => Ok(StoreBackend::Qdrant),
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            _ => Err(MemoryError::Config(format!("Unknown store backend: {}", s))),
        }
    }
}

/// Everything needed to build a `MemoryService`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub store_backend: StoreBackend,
    pub qdrant_url: String,
    #[serde(skip_serializing)]
    pub qdrant_api_key: Option<String>,
    pub collection: String,

    pub embedding_api: EmbeddingApi,
    pub embedding_base_url: Option<String>,
    #[serde(skip_serializing)]
    pub embedding_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub embedding_task_prefix: bool,
    pub embed_timeout_ms: u64,

    pub store_timeout_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub max_top_k: usize,
    pub upsert_batch_size: usize,
    pub store_text: bool,

    pub ingest_concurrency: usize,
    pub ingest_queue_capacity: usize,
    pub ingest_redeliveries: u32,
    pub ingest_backoff_base_ms: u64,
    pub ingest_backoff_max_ms: u64,

    pub db_path: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Qdrant,
            qdrant_url: "http://localhost:6334".to_string(),
            qdrant_api_key: None,
            collection: COLLECTION_NAME.to_string(),
            embedding_api: EmbeddingApi::OpenAi,
            embedding_base_url: None,
            embedding_api_key: None,
            openai_api_key: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dim: EMBEDDING_DIM,
            embedding_task_prefix: false,
            embed_timeout_ms: 10_000,
            store_timeout_ms: 5_000,
            retry_max_attempts: 4,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5_000,
            max_top_k: 50,
            upsert_batch_size: 100,
            store_text: true,
            ingest_concurrency: 8,
            ingest_queue_capacity: 1024,
            ingest_redeliveries: 3,
            ingest_backoff_base_ms: 1_000,
            ingest_backoff_max_ms: 30_000,
            db_path: None,
        }
    }
}

impl MemoryConfig {
    /// Read `RECALL_*` variables from the process environment. Call
    /// `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, MemoryError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys keep their defaults; set but
    /// unparseable keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MemoryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("RECALL_STORE_BACKEND") {
            config.store_backend = v.parse()?;
        }
        if let Some(v) = get("RECALL_QDRANT_URL") {
            config.qdrant_url = v;
        }
        config.qdrant_api_key = get("RECALL_QDRANT_API_KEY");
        if let Some(v) = get("RECALL_COLLECTION") {
            config.collection = v;
        }

        if let Some(v) = get("RECALL_EMBEDDING_API") {
            config.embedding_api = v.parse()?;
        }
        config.embedding_base_url = get("RECALL_EMBEDDING_BASE_URL");
        config.embedding_api_key = get("RECALL_EMBEDDING_API_KEY");
        config.openai_api_key = get("OPENAI_API_KEY");
        if let Some(v) = get("RECALL_EMBEDDING_MODEL") {
            config.embedding_model = v;
        }
        parse_into(&get, "RECALL_EMBEDDING_DIM", &mut config.embedding_dim)?;
        parse_into(&get, "RECALL_EMBEDDING_TASK_PREFIX", &mut config.embedding_task_prefix)?;
        parse_into(&get, "RECALL_EMBED_TIMEOUT_MS", &mut config.embed_timeout_ms)?;

        parse_into(&get, "RECALL_STORE_TIMEOUT_MS", &mut config.store_timeout_ms)?;
        parse_into(&get, "RECALL_RETRY_MAX_ATTEMPTS", &mut config.retry_max_attempts)?;
        parse_into(&get, "RECALL_RETRY_BASE_DELAY_MS", &mut config.retry_base_delay_ms)?;
        parse_into(&get, "RECALL_RETRY_MAX_DELAY_MS", &mut config.retry_max_delay_ms)?;
        parse_into(&get, "RECALL_MAX_TOP_K", &mut config.max_top_k)?;
        parse_into(&get, "RECALL_UPSERT_BATCH_SIZE", &mut config.upsert_batch_size)?;
        parse_into(&get, "RECALL_STORE_TEXT", &mut config.store_text)?;

        parse_into(&get, "RECALL_INGEST_CONCURRENCY", &mut config.ingest_concurrency)?;
        parse_into(&get, "RECALL_INGEST_QUEUE_CAPACITY", &mut config.ingest_queue_capacity)?;
        parse_into(&get, "RECALL_INGEST_REDELIVERIES", &mut config.ingest_redeliveries)?;
        parse_into(&get, "RECALL_INGEST_BACKOFF_BASE_MS", &mut config.ingest_backoff_base_ms)?;
        parse_into(&get, "RECALL_INGEST_BACKOFF_MAX_MS", &mut config.ingest_backoff_max_ms)?;

        config.db_path = get("RECALL_DB_PATH");

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the pipeline unusable
    pub fn validate(&self) -> Result<(), MemoryError> {
        let positive = [
            ("RECALL_EMBEDDING_DIM", self.embedding_dim as u64),
            ("RECALL_UPSERT_BATCH_SIZE", self.upsert_batch_size as u64),
            ("RECALL_MAX_TOP_K", self.max_top_k as u64),
            ("RECALL_INGEST_CONCURRENCY", self.ingest_concurrency as u64),
            ("RECALL_INGEST_QUEUE_CAPACITY", self.ingest_queue_capacity as u64),
            ("RECALL_RETRY_MAX_ATTEMPTS", self.retry_max_attempts as u64),
            ("RECALL_EMBED_TIMEOUT_MS", self.embed_timeout_ms),
            ("RECALL_STORE_TIMEOUT_MS", self.store_timeout_ms),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(MemoryError::Config(format!("{} must be greater than zero", key)));
            }
        }
        if self.collection.trim().is_empty() {
            return Err(MemoryError::Config("RECALL_COLLECTION must not be empty".to_string()));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(MemoryError::Config(
                "RECALL_RETRY_BASE_DELAY_MS exceeds RECALL_RETRY_MAX_DELAY_MS".to_string(),
            ));
        }
        if self.ingest_backoff_base_ms > self.ingest_backoff_max_ms {
            return Err(MemoryError::Config(
                "RECALL_INGEST_BACKOFF_BASE_MS exceeds RECALL_INGEST_BACKOFF_MAX_MS".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
            jitter: true,
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            dimension: self.embedding_dim,
            batch_size: self.upsert_batch_size,
            max_top_k: self.max_top_k,
            timeout: Duration::from_millis(self.store_timeout_ms),
            retry: self.retry_policy(),
        }
    }

    pub fn queue_config(&self) -> IngestQueueConfig {
        IngestQueueConfig {
            capacity: self.ingest_queue_capacity,
            concurrency: self.ingest_concurrency,
            redeliveries: self.ingest_redeliveries,
            backoff: RetryPolicy {
                max_attempts: self.ingest_redeliveries.saturating_add(1),
                base_delay_ms: self.ingest_backoff_base_ms,
                max_delay_ms: self.ingest_backoff_max_ms,
                jitter: true,
            },
        }
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn parse_into<T, G>(get: &G, key: &str, target: &mut T) -> Result<(), MemoryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| MemoryError::Config(format!("Invalid {}={:?}: {}", key, raw, e)))?;
    }
    Ok(())
}
