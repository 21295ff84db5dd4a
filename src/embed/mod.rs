//! Embedding clients.
//!
//! The indexer receives an [`EmbeddingClient`] by injection so tests and
//! offline deployments can swap the network-backed client for the
//! deterministic hash provider. [`HttpEmbeddingClient`] speaks the
//! OpenAI-compatible `/embeddings` contract, which also covers Ollama and
//! vLLM deployments.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::config::{EmbeddingConfig, EmbeddingProvider};

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding request timed out")]
    Timeout,

    #[error("embedding endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("embedding response malformed: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, EmbedError>;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Dimension of every vector this client produces.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the configured embedding client producing `dimension`-sized vectors.
pub fn client_from_config(
    cfg: &EmbeddingConfig,
    dimension: usize,
) -> Result<Box<dyn EmbeddingClient>> {
    match cfg.provider {
        EmbeddingProvider::Hash => Ok(Box::new(HashEmbedding::new(dimension))),
        EmbeddingProvider::OpenaiCompatible => Ok(Box::new(HttpEmbeddingClient::new(
            &cfg.endpoint,
            &cfg.model,
            dimension,
            cfg.api_key.clone(),
            Duration::from_secs(cfg.request_timeout_secs),
        )?)),
    }
}

/// OpenAI-compatible HTTP embedding client.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    pub fn new(
        endpoint: &str,
        model: &str,
        dimension: usize,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbedError::Timeout
            } else {
                EmbedError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Malformed(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbedError::Malformed(format!(
                "expected {} vectors, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        for data in &parsed.data {
            if data.embedding.len() != self.dimension {
                return Err(EmbedError::Malformed(format!(
                    "vector of length {}, expected {}",
                    data.embedding.len(),
                    self.dimension
                )));
            }
        }

        debug!(batch = texts.len(), model = %self.model, "Embedded batch");
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Deterministic SHA-256-derived vectors.
///
/// Not a semantic embedding; exists so the pipeline runs offline and so
/// tests get stable vectors without a model server.
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;
        while out.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(counter.to_be_bytes());
            hasher.update(text.as_bytes());
            for byte in hasher.finalize() {
                if out.len() == self.dimension {
                    break;
                }
                out.push(f32::from(byte) / 255.0 - 0.5);
            }
            counter += 1;
        }
        out
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedding {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedding_is_deterministic() {
        let client = HashEmbedding::new(16);
        let a = client.embed(&["hello".to_string()]).await.unwrap();
        let b = client.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 16);
    }

    #[tokio::test]
    async fn hash_embedding_differs_by_text() {
        let client = HashEmbedding::new(8);
        let vectors = client
            .embed(&["one".to_string(), "two".to_string()])
            .await
            .unwrap();
        assert_ne!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn hash_embedding_fills_large_dimensions() {
        let client = HashEmbedding::new(100);
        let vectors = client.embed(&["x".to_string()]).await.unwrap();
        assert_eq!(vectors[0].len(), 100);
    }
}
