use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "INGESTBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/ingestbox.toml";
const ENV_PREFIX: &str = "INGESTBOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;

    load_secrets(&mut config);

    Ok(config)
}

/// Load secrets from environment variables into config.
/// Secrets are never stored in TOML files, only in environment.
fn load_secrets(config: &mut Config) {
    if let Ok(token) = env::var("GITHUB_TOKEN") {
        config.ingest.github_token = Some(token);
    }

    if let Ok(key) = env::var("INGESTBOX_EMBED_API_KEY") {
        config.embedding.api_key = Some(key);
    }
    if config.embedding.api_key.is_none() {
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            config.embedding.api_key = Some(key);
        }
    }

    // Object-store credentials, with AWS-style fallbacks.
    if let Ok(access_key) = env::var("S3_ACCESS_KEY") {
        config.artifacts.access_key = Some(access_key);
    }
    if let Ok(secret_key) = env::var("S3_SECRET_KEY") {
        config.artifacts.secret_key = Some(secret_key);
    }
    if config.artifacts.access_key.is_none() {
        if let Ok(access_key) = env::var("AWS_ACCESS_KEY_ID") {
            config.artifacts.access_key = Some(access_key);
        }
    }
    if config.artifacts.secret_key.is_none() {
        if let Ok(secret_key) = env::var("AWS_SECRET_ACCESS_KEY") {
            config.artifacts.secret_key = Some(secret_key);
        }
    }
}

/// Load configuration from a specific path and environment.
/// Useful for testing with custom config files.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    // Start with defaults (handled by struct Default implementations)
    // Add TOML file if it exists (optional)
    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // Add environment variable overrides
    // INGESTBOX__WORKER__QUEUE -> worker.queue
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.vector.table_name, "rag_vectors");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"

[vector]
table_name = "kb_vectors"
embed_dim = 1024

[worker]
queue = "prune"
poll_interval_ms = 250
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.vector.table_name, "kb_vectors");
        assert_eq!(config.vector.embed_dim, 1024);
        assert_eq!(config.worker.queue, "prune");
        assert_eq!(config.worker.poll_interval_ms, 250);
    }

    // Note: environment override tests are omitted here because env::set_var
    // is unsafe under parallel test execution; overrides are covered by
    // integration tests.

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"

[store]
path = "data/ingestbox"

[artifacts]
backend = "object-store"
bucket = "kb-staging"
prefix = "rag-artifacts"
region = "eu-central-1"

[vector]
table_name = "rag_vectors"
embed_dim = 768

[embedding]
provider = "openai-compatible"
endpoint = "http://localhost:11434/v1/embeddings"
model = "nomic-embed-text"
batch_size = 32

[worker]
queue = "ingest"
poll_interval_ms = 5000
count = 2

[ingest]
default_exts = [".md", ".rs"]
github_commit_metadata = false
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(
            config.artifacts.backend,
            crate::config::ArtifactBackend::ObjectStore
        );
        assert_eq!(config.artifacts.bucket.as_deref(), Some("kb-staging"));
        assert_eq!(
            config.embedding.provider,
            crate::config::EmbeddingProvider::OpenaiCompatible
        );
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.worker.count, 2);
        assert_eq!(config.ingest.default_exts, vec![".md", ".rs"]);
        assert!(!config.ingest.github_commit_metadata);
        // Secrets never come from TOML.
        assert!(config.artifacts.access_key.is_none());
        assert!(config.ingest.github_token.is_none());
    }
}
