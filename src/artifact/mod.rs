//! Artifact store for pre-materialized manifests.
//!
//! Manifests are immutable JSON blobs named `manifest-<key>.json` under a
//! configurable prefix. Backed by Apache Arrow `object_store`, so the same
//! contract covers a local directory, an S3-compatible bucket, and the
//! in-memory store used by tests. Keys are freshly generated per write;
//! a returned key always refers to a fully written blob (the local backend
//! writes via temp-file + rename, the object backend is a single PUT).

use std::path::Path;
use std::sync::Arc;

use object_store::{ObjectStore, path::Path as StoragePath};
use thiserror::Error;
use uuid::Uuid;

use crate::config::ArtifactBackend;
use crate::model::Manifest;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("manifest not found: {0}")]
    NotFound(String),

    #[error("manifest decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("artifact backend misconfigured: {0}")]
    Config(String),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Manifest blob store over any `object_store` backend.
#[derive(Clone)]
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ArtifactStore {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// In-memory store for tests and development.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), "manifests")
    }

    /// Local-filesystem store rooted at `dir`. Creates the directory.
    pub fn local(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| ArtifactError::Config(format!("cannot create {}: {e}", dir.display())))?;
        let fs = object_store::local::LocalFileSystem::new_with_prefix(dir)?;
        Ok(Self::new(Arc::new(fs), "manifests"))
    }

    /// Build a store from runtime configuration.
    pub fn from_config(cfg: &crate::config::ArtifactsConfig) -> Result<Self> {
        match cfg.backend {
            ArtifactBackend::Local => Self::local(&cfg.dir),
            ArtifactBackend::ObjectStore => {
                let bucket = cfg.bucket.as_deref().ok_or_else(|| {
                    ArtifactError::Config("object-store backend requires a bucket".into())
                })?;
                let mut builder =
                    object_store::aws::AmazonS3Builder::from_env().with_bucket_name(bucket);
                if let Some(region) = &cfg.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &cfg.endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                if let (Some(key), Some(secret)) = (&cfg.access_key, &cfg.secret_key) {
                    builder = builder
                        .with_access_key_id(key)
                        .with_secret_access_key(secret);
                }
                let store = builder.build()?;
                Ok(Self::new(Arc::new(store), cfg.prefix.clone()))
            }
        }
    }

    fn blob_path(&self, key: &str) -> StoragePath {
        StoragePath::from(format!("{}/manifest-{key}.json", self.prefix))
    }

    /// Write a manifest and return its opaque key.
    pub async fn put_manifest(&self, manifest: &Manifest) -> Result<String> {
        let key = Uuid::new_v4().simple().to_string();
        let bytes = serde_json::to_vec(manifest)?;
        let size = bytes.len();
        self.store.put(&self.blob_path(&key), bytes.into()).await?;
        tracing::info!(key = %key, size, count = manifest.count, "Manifest stored");
        Ok(key)
    }

    /// Load a manifest by key.
    pub async fn get_manifest(&self, key: &str) -> Result<Manifest> {
        let result = match self.store.get(&self.blob_path(key)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(ArtifactError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let bytes = result.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IngestItem, Metadata};

    fn sample_manifest() -> Manifest {
        Manifest::from_items(vec![
            IngestItem::new("https://host/o/r@a.md", "alpha", Metadata::new()),
            IngestItem::new("https://host/o/r@b.md", "beta", Metadata::new()),
        ])
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = ArtifactStore::in_memory();
        let manifest = sample_manifest();

        let key = store.put_manifest(&manifest).await.unwrap();
        let loaded = store.get_manifest(&key).await.unwrap();
        assert_eq!(loaded, manifest);
    }

    #[tokio::test]
    async fn distinct_writes_get_distinct_keys() {
        let store = ArtifactStore::in_memory();
        let manifest = sample_manifest();

        let k1 = store.put_manifest(&manifest).await.unwrap();
        let k2 = store.put_manifest(&manifest).await.unwrap();
        assert_ne!(k1, k2);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let store = ArtifactStore::in_memory();
        match store.get_manifest("nope").await {
            Err(ArtifactError::NotFound(key)) => assert_eq!(key, "nope"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_backend_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::local(dir.path()).unwrap();
        let manifest = sample_manifest();

        let key = store.put_manifest(&manifest).await.unwrap();
        assert_eq!(store.get_manifest(&key).await.unwrap(), manifest);
    }
}
