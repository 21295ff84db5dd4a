//! Prune engine: scoped reconciliation of the vector store against a
//! manifest.
//!
//! Candidates are the union of rows matched by the active scope selectors;
//! everything in the candidate set that is absent from the manifest's
//! keep-set is deleted, in batches. Rows outside the candidate set are never
//! touched, and an empty scope refuses to delete anything at all.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::model::Manifest;
use crate::progress::{Canceled, ProgressSink, Stage};
use crate::vector::{VectorError, VectorStore};

/// Rows deleted per batch, one atomic write per batch.
pub const DELETE_BATCH: usize = 1000;

#[derive(Debug, Error)]
pub enum PruneError {
    #[error("prune scope is empty; refusing to delete without a scope")]
    EmptyScope,

    #[error("job canceled")]
    Canceled,

    #[error(transparent)]
    Vector(#[from] VectorError),
}

impl From<Canceled> for PruneError {
    fn from(_: Canceled) -> Self {
        PruneError::Canceled
    }
}

pub type Result<T> = std::result::Result<T, PruneError>;

/// Conjunction of selectors bounding the candidate rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PruneScope {
    #[serde(default)]
    pub metadata_repo_in: Vec<String>,
    #[serde(default)]
    pub metadata_repo_from_manifest: bool,
    #[serde(default)]
    pub doc_id_prefixes: Vec<String>,
    #[serde(default)]
    pub doc_id_in_from_manifest: bool,
}

impl PruneScope {
    pub fn is_empty(&self) -> bool {
        self.metadata_repo_in.is_empty()
            && !self.metadata_repo_from_manifest
            && self.doc_id_prefixes.is_empty()
            && !self.doc_id_in_from_manifest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneOutcome {
    pub candidates: usize,
    pub deleted: usize,
}

/// Delete candidate rows whose doc id is absent from the manifest.
pub fn run(
    manifest: &Manifest,
    scope: &PruneScope,
    vectors: &VectorStore,
    sink: &dyn ProgressSink,
) -> Result<PruneOutcome> {
    if scope.is_empty() {
        return Err(PruneError::EmptyScope);
    }

    let keep = manifest.doc_ids();

    let mut candidates: HashSet<String> = HashSet::new();
    if !scope.metadata_repo_in.is_empty() {
        let repos: HashSet<String> = scope.metadata_repo_in.iter().cloned().collect();
        candidates.extend(vectors.node_ids_where_repo_in(&repos)?);
    }
    if scope.metadata_repo_from_manifest {
        let repos: HashSet<String> = manifest.repos().into_iter().collect();
        candidates.extend(vectors.node_ids_where_repo_in(&repos)?);
    }
    for prefix in &scope.doc_id_prefixes {
        candidates.extend(vectors.node_ids_with_prefix(prefix)?);
    }
    if scope.doc_id_in_from_manifest {
        candidates.extend(keep.iter().cloned());
    }

    let mut to_delete: Vec<String> = candidates
        .iter()
        .filter(|id| !keep.contains(*id))
        .cloned()
        .collect();
    to_delete.sort();
    let total = to_delete.len() as u64;

    sink.update(
        Stage::Prune,
        Some(0),
        Some(total),
        Some(&format!("deleting {total}")),
    )?;

    let mut deleted = 0usize;
    for batch in to_delete.chunks(DELETE_BATCH) {
        vectors.delete_many(batch.iter())?;
        deleted += batch.len();
        sink.update(
            Stage::Prune,
            Some(deleted as u64),
            Some(total),
            Some(&format!("deleted {deleted}")),
        )?;
    }

    info!(
        candidates = candidates.len(),
        deleted, "Prune reconciliation complete"
    );
    sink.update(
        Stage::Done,
        Some(deleted as u64),
        Some(total),
        Some("prune completed"),
    )?;
    Ok(PruneOutcome {
        candidates: candidates.len(),
        deleted,
    })
}
