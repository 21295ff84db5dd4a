//! Job runner: claims one job at a time and drives it to a terminal state.
//!
//! Failures inside a job are caught and recorded via `fail`; only repository
//! errors bubble out, so a bad job can never crash the worker process. A
//! canceled job unwinds through the progress checkpoint and gets neither
//! `complete` nor `fail` (the repository already holds the terminal state).

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tracing::{info, warn};

use crate::artifact::{ArtifactError, ArtifactStore};
use crate::index::{IndexError, Indexer};
use crate::jobs::{self, Job, JobPayload, JobQueue, JobStatus, JobType};
use crate::model::Manifest;
use crate::observability::Metrics;
use crate::progress::{Canceled, ProgressSink, Stage};
use crate::prune::{self, PruneError};
use crate::sources::{
    self, ChunkingSource, IngestSource, ItemStream, SourceContext, SourceError,
};
use crate::vector::{VectorError, VectorStore};

/// Cap for the stored `error` column.
const MAX_ERROR_LEN: usize = 500;

const DEFAULT_CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Error)]
enum JobFailure {
    #[error("{0}")]
    Precondition(&'static str),

    #[error("job canceled")]
    Canceled,

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Vector(#[from] VectorError),
}

impl From<IndexError> for JobFailure {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Canceled => JobFailure::Canceled,
            IndexError::Source(e) => JobFailure::Source(e),
            IndexError::Vector(e) => JobFailure::Vector(e),
            other => JobFailure::Internal(other.to_string()),
        }
    }
}

impl From<PruneError> for JobFailure {
    fn from(err: PruneError) -> Self {
        match err {
            PruneError::Canceled => JobFailure::Canceled,
            PruneError::EmptyScope => {
                JobFailure::Precondition("prune scope is empty; refusing to delete without a scope")
            }
            PruneError::Vector(e) => JobFailure::Vector(e),
        }
    }
}

pub struct JobRunner {
    queue: JobQueue,
    artifacts: ArtifactStore,
    indexer: Indexer,
    vectors: VectorStore,
    sources_ctx: SourceContext,
    metrics: Arc<Metrics>,
}

impl JobRunner {
    pub fn new(
        queue: JobQueue,
        artifacts: ArtifactStore,
        indexer: Indexer,
        vectors: VectorStore,
        sources_ctx: SourceContext,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            queue,
            artifacts,
            indexer,
            vectors,
            sources_ctx,
            metrics,
        }
    }

    /// Claim and run one job. Returns `false` when the queue was empty.
    pub async fn run_once(&self) -> jobs::Result<bool> {
        let Some(job) = self.queue.fetch_and_start()? else {
            return Ok(false);
        };
        info!(
            id = job.id,
            queue = %job.job_type,
            attempts = job.attempts,
            "Processing job"
        );

        let sink = WorkerSink {
            queue: self.queue.clone(),
            job_id: job.id,
        };
        match self.execute(&job, &sink).await {
            Ok(()) => {
                self.queue.complete(job.id)?;
                self.metrics.job_completed();
                info!(id = job.id, "Job completed");
            }
            Err(JobFailure::Canceled) => {
                self.metrics.job_canceled();
                info!(id = job.id, "Job aborted after cancellation");
            }
            Err(failure) => {
                let message = truncate_error(&failure.to_string());
                self.queue.fail(job.id, &message)?;
                self.metrics.job_failed();
                warn!(id = job.id, error = %message, "Job failed");
            }
        }
        Ok(true)
    }

    async fn execute(&self, job: &Job, sink: &WorkerSink) -> Result<(), JobFailure> {
        match job.job_type {
            JobType::Ingest => {
                let items = self.resolve_items(&job.payload).await?;
                let outcome = self
                    .indexer
                    .index_items(items, job.payload.force, sink)
                    .await?;
                self.metrics.items_indexed(outcome.written);
            }
            JobType::ChecksumUpdate => {
                let items = self.resolve_items(&job.payload).await?;
                self.indexer.update_checksums(items, sink).await?;
            }
            JobType::Prune => {
                let scope = job
                    .payload
                    .prune_scope
                    .clone()
                    .ok_or(JobFailure::Precondition("prune job requires a prune_scope"))?;
                let manifest = self.resolve_manifest(&job.payload).await?;
                let outcome = prune::run(&manifest, &scope, &self.vectors, sink)?;
                self.metrics.rows_pruned(outcome.deleted as u64);
            }
        }
        Ok(())
    }

    /// Item stream from either a prebuilt manifest or inline sources.
    async fn resolve_items(&self, payload: &JobPayload) -> Result<ItemStream, JobFailure> {
        if let Some(key) = &payload.artifact_key {
            let manifest = self.artifacts.get_manifest(key).await?;
            return Ok(futures::stream::iter(manifest.items.into_iter().map(Ok)).boxed());
        }
        if payload.sources.is_empty() {
            return Err(JobFailure::Precondition(
                "job payload needs an artifact_key or inline sources",
            ));
        }
        let source = self.build_inline_source(payload)?;
        Ok(source.stream().await?)
    }

    /// Full manifest for prune reconciliation.
    async fn resolve_manifest(&self, payload: &JobPayload) -> Result<Manifest, JobFailure> {
        if let Some(key) = &payload.artifact_key {
            return Ok(self.artifacts.get_manifest(key).await?);
        }
        if payload.sources.is_empty() {
            return Err(JobFailure::Precondition(
                "job payload needs an artifact_key or inline sources",
            ));
        }
        let source = self.build_inline_source(payload)?;
        Ok(sources::materialize(source.as_ref()).await?)
    }

    fn build_inline_source(
        &self,
        payload: &JobPayload,
    ) -> Result<Arc<dyn IngestSource>, JobFailure> {
        let composite = sources::build_sources(&payload.sources, &self.sources_ctx)?;
        match payload.chunk_size.filter(|size| *size > 0) {
            Some(chunk_size) => Ok(Arc::new(ChunkingSource::new(
                Arc::new(composite),
                chunk_size,
                payload.chunk_overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP),
            ))),
            None => Ok(Arc::new(composite)),
        }
    }
}

fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let truncated: String = message.chars().take(MAX_ERROR_LEN).collect();
    format!("{truncated}…")
}

/// Progress sink bound to one claimed job.
///
/// Every update is also the cancellation checkpoint: after writing progress
/// it re-reads the job and aborts the pipeline if the status flipped to
/// `canceled` underneath the worker.
pub(crate) struct WorkerSink {
    pub(crate) queue: JobQueue,
    pub(crate) job_id: u64,
}

impl ProgressSink for WorkerSink {
    fn update(
        &self,
        stage: Stage,
        done: Option<u64>,
        total: Option<u64>,
        note: Option<&str>,
    ) -> Result<(), Canceled> {
        // Check first: once canceled, no further progress is written.
        if let Ok(Some(job)) = self.queue.get(self.job_id) {
            if job.status == JobStatus::Canceled {
                return Err(Canceled);
            }
        }
        let note = note.unwrap_or(stage.as_str());
        if let Err(e) = self
            .queue
            .update_progress(self.job_id, done, total, Some(note))
        {
            // Losing a progress update is not worth failing the job over.
            warn!(id = self.job_id, error = %e, "Progress update failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_truncated() {
        let long = "x".repeat(2000);
        assert!(truncate_error(&long).chars().count() <= MAX_ERROR_LEN + 1);
        assert_eq!(truncate_error("short"), "short");
    }
}
