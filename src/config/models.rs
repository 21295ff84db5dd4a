use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            artifacts: ArtifactsConfig::default(),
            vector: VectorConfig::default(),
            embedding: EmbeddingConfig::default(),
            worker: WorkerConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

/// HTTP front-end configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

/// Root directory for the embedded keyspaces (jobs, checksums, vectors).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/ingestbox")
}

/// Artifact store backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactBackend {
    Local,
    ObjectStore,
}

impl Default for ArtifactBackend {
    fn default() -> Self {
        ArtifactBackend::Local
    }
}

/// Manifest artifact storage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactsConfig {
    #[serde(default)]
    pub backend: ArtifactBackend,
    /// Root directory for the `local` backend.
    #[serde(default = "default_artifacts_dir")]
    pub dir: PathBuf,
    /// Bucket for the `object-store` backend.
    pub bucket: Option<String>,
    #[serde(default = "default_artifacts_prefix")]
    pub prefix: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// Credentials come from the environment, never from the TOML file.
    #[serde(skip)]
    pub access_key: Option<String>,
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            backend: ArtifactBackend::default(),
            dir: default_artifacts_dir(),
            bucket: None,
            prefix: default_artifacts_prefix(),
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("data/artifacts")
}

fn default_artifacts_prefix() -> String {
    "manifests".to_string()
}

/// Vector store gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorConfig {
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default = "default_embed_dim")]
    pub embed_dim: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            embed_dim: default_embed_dim(),
        }
    }
}

fn default_table_name() -> String {
    "rag_vectors".to_string()
}

fn default_embed_dim() -> usize {
    768
}

/// Embedding provider selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible `/embeddings` endpoint (OpenAI, Ollama, vLLM).
    OpenaiCompatible,
    /// Deterministic offline vectors; no model server required.
    Hash,
}

impl Default for EmbeddingProvider {
    fn default() -> Self {
        EmbeddingProvider::OpenaiCompatible
    }
}

/// Embedding client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_batch")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout")]
    pub request_timeout_secs: u64,
    /// From the environment, never from the TOML file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            batch_size: default_embedding_batch(),
            request_timeout_secs: default_embedding_timeout(),
            api_key: None,
        }
    }
}

fn default_embedding_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_batch() -> usize {
    64
}

fn default_embedding_timeout() -> u64 {
    60
}

/// Worker process configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Logical queue this worker serves: ingest | checksum_update | prune.
    #[serde(default = "default_worker_queue")]
    pub queue: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Concurrent runner loops in this process.
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: default_worker_queue(),
            poll_interval_ms: default_poll_interval_ms(),
            count: default_worker_count(),
        }
    }
}

fn default_worker_queue() -> String {
    "ingest".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_worker_count() -> usize {
    1
}

/// Source adapter defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Extension allowlist for file-scan adapters (leading dot included).
    #[serde(default = "default_exts")]
    pub default_exts: Vec<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Scratch space for local clones.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_github_api_base")]
    pub github_api_base: String,
    /// Fetch last-commit metadata per file through the REST API.
    #[serde(default = "default_github_commit_metadata")]
    pub github_commit_metadata: bool,
    /// From the environment (`GITHUB_TOKEN`), never from the TOML file.
    #[serde(skip)]
    pub github_token: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_exts: default_exts(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            staging_dir: default_staging_dir(),
            github_api_base: default_github_api_base(),
            github_commit_metadata: default_github_commit_metadata(),
            github_token: None,
        }
    }
}

fn default_exts() -> Vec<String> {
    [".md", ".py", ".yml", ".yaml", ".toml", ".json", ".txt"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_user_agent() -> String {
    format!("ingestbox/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> u64 {
    20
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from(".staging")
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_github_commit_metadata() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.vector.embed_dim, 768);
        assert_eq!(config.worker.queue, "ingest");
        assert_eq!(config.artifacts.backend, ArtifactBackend::Local);
        assert!(config.ingest.default_exts.contains(&".md".to_string()));
    }
}
