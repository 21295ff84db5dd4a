//! Local directory adapter.
//!
//! Walks a checkout on disk and emits one item per matching file. Doc ids
//! follow the `"{repo_url}@{relative_path}"` convention so the same logical
//! file keeps its identity across runs and across adapters.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{IngestSource, ItemStream, Result, SourceError, ext_allowed};
use crate::model::{IngestItem, Metadata};

pub struct FilesystemSource {
    root: PathBuf,
    repo_url: String,
    exts: Vec<String>,
}

impl FilesystemSource {
    pub fn new(root: PathBuf, repo_url: String, exts: Vec<String>) -> Self {
        Self {
            root,
            repo_url,
            exts,
        }
    }
}

#[async_trait]
impl IngestSource for FilesystemSource {
    fn describe(&self) -> String {
        format!("local_dir({})", self.root.display())
    }

    async fn stream(&self) -> Result<ItemStream> {
        let root = self.root.clone();
        let repo_url = self.repo_url.clone();
        let exts = self.exts.clone();

        let items = tokio::task::spawn_blocking(move || scan_directory(&root, &repo_url, &exts))
            .await
            .map_err(|e| SourceError::Task(e.to_string()))??;

        Ok(futures::stream::iter(items.into_iter().map(Ok)).boxed())
    }
}

/// Walk `root` and build items for files matching `exts`.
///
/// Unreadable files are skipped; a missing root is a structural failure.
pub(crate) fn scan_directory(
    root: &Path,
    repo_url: &str,
    exts: &[String],
) -> Result<Vec<IngestItem>> {
    if !root.is_dir() {
        return Err(SourceError::NotFound(format!(
            "directory {}",
            root.display()
        )));
    }
    info!(root = %root.display(), repo_url, "Scanning directory");

    let mut items = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.components().any(|c| c.as_os_str() == ".git") {
            continue;
        }
        let rel = match path.strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if !ext_allowed(&rel, exts) {
            continue;
        }
        let text = match std::fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                continue;
            }
        };

        items.push(file_item(repo_url, &rel, text));
    }

    debug!(root = %root.display(), files = items.len(), "Directory scan complete");
    Ok(items)
}

fn file_item(repo_url: &str, rel: &str, text: String) -> IngestItem {
    let mut metadata = Metadata::new();
    metadata.insert("repo".into(), Value::from(repo_url));
    metadata.insert("file_path".into(), Value::from(rel));
    metadata.insert(
        "source_url".into(),
        Value::from(format!("{repo_url}/blob/main/{rel}")),
    );
    IngestItem::new(format!("{repo_url}@{rel}"), text, metadata)
}
