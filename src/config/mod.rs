//! Configuration management.
//!
//! Layered loading: struct defaults, then `config/ingestbox.toml` (path
//! overridable via `INGESTBOX_CONFIG`), then environment variables with the
//! pattern `INGESTBOX__<section>__<key>`, e.g.
//! `INGESTBOX__WORKER__QUEUE=prune` or `INGESTBOX__VECTOR__EMBED_DIM=1024`.
//! Secrets (`GITHUB_TOKEN`, `INGESTBOX_EMBED_API_KEY`, S3 credentials) are
//! only ever read from the environment.

mod models;
mod sources;
mod validation;

pub use models::{
    ArtifactBackend, ArtifactsConfig, Config, EmbeddingConfig, EmbeddingProvider, IngestConfig,
    ServerConfig, StoreConfig, VectorConfig, WorkerConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("configuration validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
