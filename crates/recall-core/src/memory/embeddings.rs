//! ============================================================================
//! Embedding Service - Vector embeddings for semantic memory search
//! ============================================================================
//! Generates text embeddings over HTTP. Two wire formats are supported:
//! OpenAI-compatible `/embeddings` and Pinecone-style `/embed` with an
//! explicit `input_type` task hint.
//!
//! `EmbeddingGenerator` wraps any `Embedder` with input validation, a
//! per-call timeout and a dimension check. It never retries; callers do.
//! ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::MemoryError;
use super::retry::with_timeout;
use super::types::{validate_vector, EmbeddingTask, EmbeddingVector};

/// Default embedding model (OpenAI compatible)
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Expected embedding dimension for text-embedding-3-small
pub const EMBEDDING_DIM: usize = 1536;

/// Default request timeout for the embedding endpoint
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that turns text into vectors. Implementations talk to the
/// external model; validation and timeouts live in `EmbeddingGenerator`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed several texts in one call, preserving input order
    async fn embed_batch(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<EmbeddingVector>, MemoryError>;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}

/// Which HTTP dialect the embedding endpoint speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingApi {
    /// `POST {base}/embeddings` with `{ model, input }`
    OpenAi,
    /// `POST {base}/embed` with `{ model, parameters: { input_type }, inputs }`
    Pinecone,
}

impl std::str::FromStr for EmbeddingApi {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "open_ai" => Ok(EmbeddingApi::OpenAi),
            "pinecone" => Ok(EmbeddingApi::Pinecone),
            _ => Err(MemoryError::Config(format!("Unknown embedding API: {}", s))),
        }
    }
}

/// HTTP embedding client
pub struct EmbeddingService {
    client: Client,
    api: EmbeddingApi,
    api_key: String,
    base_url: String,
    model: String,
    /// Prefix inputs with `passage: ` / `query: ` (E5-style models)
    task_prefix: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiData>,
    model: Option<String>,
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct EmbeddingUsage {
    prompt_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct PineconeRequest<'a> {
    model: &'a str,
    parameters: PineconeParameters,
    inputs: Vec<PineconeInput<'a>>,
}

#[derive(Debug, Serialize)]
struct PineconeParameters {
    input_type: &'static str,
    truncate: &'static str,
}

#[derive(Debug, Serialize)]
struct PineconeInput<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PineconeResponse {
    data: Vec<PineconeData>,
}

#[derive(Debug, Deserialize)]
struct PineconeData {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl EmbeddingService {
    /// Create a new embedding service using the OpenAI API
    pub fn new_openai(api_key: String) -> Self {
        Self::new_custom(
            EmbeddingApi::OpenAi,
            api_key,
            "https://api.openai.com/v1".to_string(),
            DEFAULT_EMBEDDING_MODEL.to_string(),
        )
    }

    /// Create with custom dialect, base URL and model
    pub fn new_custom(api: EmbeddingApi, api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            task_prefix: false,
        }
    }

    /// Enable `passage: ` / `query: ` input prefixes for the OpenAI dialect
    pub fn with_task_prefix(mut self, enabled: bool) -> Self {
        self.task_prefix = enabled;
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api(&self) -> EmbeddingApi {
        self.api
    }

    async fn embed_openai(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<EmbeddingVector>, MemoryError> {
        let input = texts
            .iter()
            .map(|t| {
                if self.task_prefix {
                    format!("{}: {}", task.as_str(), t)
                } else {
                    t.clone()
                }
            })
            .collect();

        let request = OpenAiRequest {
            model: &self.model,
            input,
        };

        let body = self
            .post(&format!("{}/embeddings", self.base_url), &request)
            .await?;

        let response: OpenAiResponse = serde_json::from_str(&body).map_err(|e| {
            MemoryError::EmbeddingRejected(format!("Failed to parse embedding response: {}", e))
        })?;

        if let Some(usage) = &response.usage {
            debug!(
                "Embedding tokens used: {:?} (model: {})",
                usage.total_tokens,
                response.model.as_deref().unwrap_or(&self.model)
            );
        }

        // Sort by index and extract embeddings
        let mut embeddings: Vec<(usize, Vec<f32>)> = response
            .data
            .into_iter()
            .map(|d| (d.index, d.embedding))
            .collect();
        embeddings.sort_by_key(|(idx, _)| *idx);

        Ok(embeddings.into_iter().map(|(_, e)| e).collect())
    }

    async fn embed_pinecone(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<EmbeddingVector>, MemoryError> {
        let request = PineconeRequest {
            model: &self.model,
            parameters: PineconeParameters {
                input_type: task.as_str(),
                truncate: "END",
            },
            inputs: texts.iter().map(|t| PineconeInput { text: t }).collect(),
        };

        let body = self
            .post(&format!("{}/embed", self.base_url), &request)
            .await?;

        let response: PineconeResponse = serde_json::from_str(&body).map_err(|e| {
            MemoryError::EmbeddingRejected(format!("Failed to parse embedding response: {}", e))
        })?;

        Ok(response.data.into_iter().map(|d| d.values).collect())
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, request: &T) -> Result<String, MemoryError> {
        let mut builder = self.client.post(url).json(request);
        builder = match self.api {
            EmbeddingApi::OpenAi => builder.header("Authorization", format!("Bearer {}", self.api_key)),
            EmbeddingApi::Pinecone => builder
                .header("Api-Key", &self.api_key)
                .header("X-Pinecone-API-Version", "2025-01"),
        };

        let response = builder.send().await.map_err(|e| {
            MemoryError::EmbeddingUnavailable(format!("Failed to send embedding request: {}", e))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            MemoryError::EmbeddingUnavailable(format!("Failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(classify_status(status, detail));
        }

        Ok(body)
    }
}

/// Map an HTTP failure onto the transient/permanent split
fn classify_status(status: StatusCode, detail: String) -> MemoryError {
    let message = format!("Embedding API error ({}): {}", status, detail);
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        MemoryError::EmbeddingUnavailable(message)
    } else {
        MemoryError::EmbeddingRejected(message)
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed_batch(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<EmbeddingVector>, MemoryError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(
            "Generating {} embeddings for {} texts",
            task.as_str(),
            texts.len()
        );

        match self.api {
            EmbeddingApi::OpenAi => self.embed_openai(texts, task).await,
            EmbeddingApi::Pinecone => self.embed_pinecone(texts, task).await,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Create an embedding service, trying the dedicated key first, then OpenAI
pub fn create_embedding_service(
    api: EmbeddingApi,
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    openai_api_key: Option<String>,
) -> Result<EmbeddingService, MemoryError> {
    let key = api_key
        .filter(|k| !k.is_empty())
        .or_else(|| {
            let fallback = openai_api_key.filter(|k| !k.is_empty());
            if fallback.is_some() {
                warn!("Embedding API key not set, falling back to OPENAI_API_KEY");
            }
            fallback
        })
        .ok_or_else(|| MemoryError::Config("No embedding API key available".to_string()))?;

    let base_url = base_url.unwrap_or_else(|| match api {
        EmbeddingApi::OpenAi => "https://api.openai.com/v1".to_string(),
        EmbeddingApi::Pinecone => "https://api.pinecone.io".to_string(),
    });
    let model = model.unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());

    Ok(EmbeddingService::new_custom(api, key, base_url, model))
}

/// Validated, time-bounded access to an `Embedder`
#[derive(Clone)]
pub struct EmbeddingGenerator {
    embedder: Arc<dyn Embedder>,
    dimension: usize,
    timeout: Duration,
}

impl EmbeddingGenerator {
    pub fn new(embedder: Arc<dyn Embedder>, dimension: usize, timeout: Duration) -> Self {
        Self {
            embedder,
            dimension,
            timeout,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model(&self) -> &str {
        self.embedder.model()
    }

    /// Embed one text. Blank input fails before the model is called.
    pub async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<EmbeddingVector, MemoryError> {
        let mut vectors = self.embed_batch(&[text.to_string()], task).await?;
        vectors
            .pop()
            .ok_or_else(|| MemoryError::EmbeddingRejected("No embedding returned".to_string()))
    }

    /// Embed many texts in one call
    pub async fn embed_batch(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<EmbeddingVector>, MemoryError> {
        for (i, text) in texts.iter().enumerate() {
            validate_text(text).map_err(|e| match e {
                MemoryError::InvalidInput(msg) => {
                    MemoryError::InvalidInput(format!("input {}: {}", i, msg))
                }
                other => other,
            })?;
        }
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let timeout = self.timeout;
        let vectors = with_timeout(
            timeout,
            self.embedder.embed_batch(texts, task),
            || MemoryError::EmbeddingUnavailable(format!("Embedding timed out after {:?}", timeout)),
        )
        .await?;

        if vectors.len() != texts.len() {
            return Err(MemoryError::EmbeddingRejected(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }

        for vector in &vectors {
            validate_vector(vector, self.dimension).map_err(|e| match e {
                MemoryError::InvalidInput(msg) => MemoryError::EmbeddingRejected(msg),
                other => other,
            })?;
        }

        Ok(vectors)
    }
}

/// Non-empty after trimming
pub fn validate_text(text: &str) -> Result<(), MemoryError> {
    if text.trim().is_empty() {
        return Err(MemoryError::InvalidInput(
            "text must not be empty or whitespace".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::test_support::{FailingEmbedder, HashEmbedder, TEST_DIM};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_service_creation() {
        let service = EmbeddingService::new_openai("test-key".to_string());
        assert_eq!(service.base_url(), "https://api.openai.com/v1");
        assert_eq!(service.model(), DEFAULT_EMBEDDING_MODEL);
        assert_eq!(service.api(), EmbeddingApi::OpenAi);
    }

    #[test]
    fn test_create_embedding_service_key_fallback() {
        let service =
            create_embedding_service(EmbeddingApi::OpenAi, None, None, None, Some("sk".into()))
                .unwrap();
        assert_eq!(service.base_url(), "https://api.openai.com/v1");

        let err = create_embedding_service(EmbeddingApi::Pinecone, None, None, Some(String::new()), None);
        assert!(matches!(err, Err(MemoryError::Config(_))));
    }

    #[test]
    fn test_api_parsing() {
        assert_eq!("openai".parse::<EmbeddingApi>().unwrap(), EmbeddingApi::OpenAi);
        assert_eq!("Pinecone".parse::<EmbeddingApi>().unwrap(), EmbeddingApi::Pinecone);
        assert!("cohere".parse::<EmbeddingApi>().is_err());
    }

    #[tokio::test]
    async fn test_empty_input_never_calls_model() {
        let embedder = Arc::new(FailingEmbedder::always(MemoryError::EmbeddingUnavailable(
            "should not be called".into(),
        )));
        let generator = EmbeddingGenerator::new(embedder.clone(), TEST_DIM, DEFAULT_EMBED_TIMEOUT);

        for text in ["", "   ", "\n\t"] {
            let err = generator.embed(text, EmbeddingTask::Query).await.unwrap_err();
            assert!(matches!(err, MemoryError::InvalidInput(_)));
        }
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_generator_dimension_check() {
        let generator = EmbeddingGenerator::new(
            Arc::new(HashEmbedder::new(8)),
            TEST_DIM,
            DEFAULT_EMBED_TIMEOUT,
        );
        let err = generator
            .embed("shipment", EmbeddingTask::Passage)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch { expected, actual: 8 } if expected == TEST_DIM
        ));
    }

    #[tokio::test]
    async fn test_generator_timeout_is_unavailable() {
        let generator = EmbeddingGenerator::new(
            Arc::new(HashEmbedder::new(TEST_DIM).with_delay(Duration::from_millis(200))),
            TEST_DIM,
            Duration::from_millis(10),
        );
        let err = generator
            .embed("shipment", EmbeddingTask::Passage)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_openai_wire_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "e5-large",
                "input": ["query: shipment status", "query: invoice"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0] },
                    { "index": 0, "embedding": [1.0, 0.0] }
                ],
                "model": "e5-large",
                "usage": { "prompt_tokens": 4, "total_tokens": 4 }
            })))
            .mount(&server)
            .await;

        let service = EmbeddingService::new_custom(
            EmbeddingApi::OpenAi,
            "sk-test".into(),
            server.uri(),
            "e5-large".into(),
        )
        .with_task_prefix(true);

        let vectors = service
            .embed_batch(
                &["shipment status".to_string(), "invoice".to_string()],
                EmbeddingTask::Query,
            )
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_pinecone_wire_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .and(header("Api-Key", "pc-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "multilingual-e5-large",
                "parameters": { "input_type": "passage", "truncate": "END" },
                "inputs": [{ "text": "Where is shipment 4521?" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "values": [0.5, 0.5] }]
            })))
            .mount(&server)
            .await;

        let service = EmbeddingService::new_custom(
            EmbeddingApi::Pinecone,
            "pc-test".into(),
            server.uri(),
            "multilingual-e5-large".into(),
        );

        let vectors = service
            .embed_batch(&["Where is shipment 4521?".to_string()], EmbeddingTask::Passage)
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.5]]);
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "rate limit exceeded" }
            })))
            .mount(&server)
            .await;

        let service = EmbeddingService::new_custom(
            EmbeddingApi::OpenAi,
            "sk".into(),
            server.uri(),
            "m".into(),
        );
        let err = service
            .embed_batch(&["hi".to_string()], EmbeddingTask::Query)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::EmbeddingUnavailable(ref m) if m.contains("rate limit")));

        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            MemoryError::EmbeddingUnavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, String::new()),
            MemoryError::EmbeddingRejected(_)
        ));
    }
}
