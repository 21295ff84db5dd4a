use thiserror::Error;

use super::models::{ArtifactBackend, Config, EmbeddingProvider};
use crate::jobs::JobType;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("vector.embed_dim must be greater than zero")]
    ZeroEmbedDim,

    #[error("artifacts.backend = \"object-store\" requires artifacts.bucket")]
    MissingBucket,

    #[error("worker.count must be at least 1")]
    ZeroWorkerCount,

    #[error("worker.queue '{0}' is not one of: ingest, checksum_update, prune")]
    UnknownQueue(String),

    #[error("embedding.endpoint must be set for the openai-compatible provider")]
    EmptyEmbeddingEndpoint,
}

pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if config.vector.embed_dim == 0 {
        return Err(ValidationError::ZeroEmbedDim);
    }
    if config.artifacts.backend == ArtifactBackend::ObjectStore
        && config.artifacts.bucket.as_deref().unwrap_or("").is_empty()
    {
        return Err(ValidationError::MissingBucket);
    }
    if config.worker.count == 0 {
        return Err(ValidationError::ZeroWorkerCount);
    }
    if config.worker.queue.parse::<JobType>().is_err() {
        return Err(ValidationError::UnknownQueue(config.worker.queue.clone()));
    }
    if config.embedding.provider == EmbeddingProvider::OpenaiCompatible
        && config.embedding.endpoint.trim().is_empty()
    {
        return Err(ValidationError::EmptyEmbeddingEndpoint);
    }
    Ok(())
}
