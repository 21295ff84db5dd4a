//! End-to-end pipeline tests: enqueue -> worker -> vector/checksum stores.
//!
//! Builds the full stack over tempdir-backed stores with the deterministic
//! hash embedder, then drives jobs through the runner exactly as a worker
//! process would.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use ingestbox::artifact::ArtifactStore;
use ingestbox::checksum::ChecksumStore;
use ingestbox::embed::HashEmbedding;
use ingestbox::index::Indexer;
use ingestbox::jobs::{JobPayload, JobQueue, JobQueues, JobStatus, JobType};
use ingestbox::model::{IngestItem, Manifest, Metadata, sha256_hex};
use ingestbox::observability::Metrics;
use ingestbox::progress::{Canceled, ProgressSink, Stage};
use ingestbox::prune::PruneScope;
use ingestbox::sources::{SourceContext, SourceError, SourceSpec};
use ingestbox::vector::VectorStore;
use ingestbox::worker::JobRunner;

const DIM: usize = 8;
const REPO: &str = "https://host/ORG/REPO";

struct Harness {
    queues: JobQueues,
    artifacts: ArtifactStore,
    checksums: ChecksumStore,
    vectors: VectorStore,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let queues = JobQueues::open(dir.path().join("jobs")).unwrap();
        let artifacts = ArtifactStore::in_memory();
        let checksums = ChecksumStore::open(dir.path().join("checksums")).unwrap();
        let vectors = VectorStore::open(dir.path(), "vectors", DIM).unwrap();
        Self {
            queues,
            artifacts,
            checksums,
            vectors,
            _dir: dir,
        }
    }

    fn sources_ctx(&self) -> SourceContext {
        SourceContext {
            default_exts: vec![".md".to_string(), ".txt".to_string()],
            user_agent: "ingestbox-tests".to_string(),
            request_timeout: Duration::from_secs(5),
            github_api_base: "https://api.github.invalid".to_string(),
            github_token: None,
            github_commit_metadata: false,
            staging_dir: self._dir.path().join("staging"),
        }
    }

    fn runner(&self, queue: JobType) -> JobRunner {
        let indexer = Indexer::new(
            self.checksums.clone(),
            self.vectors.clone(),
            Arc::new(HashEmbedding::new(DIM)),
            16,
        );
        JobRunner::new(
            self.queues.queue(queue),
            self.artifacts.clone(),
            indexer,
            self.vectors.clone(),
            self.sources_ctx(),
            Arc::new(Metrics::new()),
        )
    }

    fn queue(&self, queue: JobType) -> JobQueue {
        self.queues.queue(queue)
    }

    async fn store_manifest(&self, items: Vec<IngestItem>) -> String {
        self.artifacts
            .put_manifest(&Manifest::from_items(items))
            .await
            .unwrap()
    }
}

fn readme_item() -> IngestItem {
    let mut metadata = Metadata::new();
    metadata.insert("repo".into(), Value::from(REPO));
    metadata.insert("file_path".into(), Value::from("README.md"));
    IngestItem::new(format!("{REPO}@README.md"), "hello\n", metadata)
}

fn repo_item(rel: &str, text: &str) -> IngestItem {
    let mut metadata = Metadata::new();
    metadata.insert("repo".into(), Value::from(REPO));
    metadata.insert("file_path".into(), Value::from(rel));
    IngestItem::new(format!("{REPO}@{rel}"), text, metadata)
}

fn ingest_payload(artifact_key: &str, force: bool) -> JobPayload {
    JobPayload {
        artifact_key: Some(artifact_key.to_string()),
        force,
        ..JobPayload::default()
    }
}

#[tokio::test]
async fn first_ingest_of_a_one_file_repo() {
    let harness = Harness::new();
    let key = harness.store_manifest(vec![readme_item()]).await;

    let queue = harness.queue(JobType::Ingest);
    let id = queue.enqueue(ingest_payload(&key, false)).unwrap();

    assert!(harness.runner(JobType::Ingest).run_once().await.unwrap());

    let job = queue.get(id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
    assert!(job.finished_at.is_some());
    assert_eq!(job.progress_done, Some(1));
    assert_eq!(job.progress_total, Some(1));

    let doc_id = format!("{REPO}@README.md");
    let row = harness.vectors.get(&doc_id).unwrap().unwrap();
    assert_eq!(row.text, "hello\n");
    assert_eq!(row.embedding.len(), DIM);
    assert_eq!(
        harness.checksums.get(&doc_id).unwrap().as_deref(),
        Some(sha256_hex("hello\n").as_str())
    );
}

#[tokio::test]
async fn re_ingest_without_changes_is_idempotent() {
    let harness = Harness::new();
    let key = harness.store_manifest(vec![readme_item()]).await;
    let queue = harness.queue(JobType::Ingest);
    let runner = harness.runner(JobType::Ingest);

    queue.enqueue(ingest_payload(&key, false)).unwrap();
    runner.run_once().await.unwrap();

    let second = queue.enqueue(ingest_payload(&key, false)).unwrap();
    runner.run_once().await.unwrap();

    let job = queue.get(second).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_done, Some(0));
    assert_eq!(job.progress_total, Some(1));
    assert_eq!(job.progress_note.as_deref(), Some("no changes"));
    assert_eq!(harness.vectors.count().unwrap(), 1);
}

#[tokio::test]
async fn forced_re_ingest_rewrites_the_row() {
    let harness = Harness::new();
    let key = harness.store_manifest(vec![readme_item()]).await;
    let queue = harness.queue(JobType::Ingest);
    let runner = harness.runner(JobType::Ingest);

    queue.enqueue(ingest_payload(&key, false)).unwrap();
    runner.run_once().await.unwrap();

    let forced = queue.enqueue(ingest_payload(&key, true)).unwrap();
    runner.run_once().await.unwrap();

    let job = queue.get(forced).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_done, Some(1));
    assert_eq!(job.progress_total, Some(1));
    assert_eq!(harness.vectors.count().unwrap(), 1);
}

#[tokio::test]
async fn prune_removes_rows_absent_from_the_new_manifest() {
    let harness = Harness::new();

    // Prior state: two files of repo R indexed.
    let full = harness
        .store_manifest(vec![repo_item("A.md", "aaa"), repo_item("B.md", "bbb")])
        .await;
    let ingest_queue = harness.queue(JobType::Ingest);
    ingest_queue.enqueue(ingest_payload(&full, false)).unwrap();
    harness.runner(JobType::Ingest).run_once().await.unwrap();
    assert_eq!(harness.vectors.count().unwrap(), 2);

    // New manifest only contains A.
    let shrunk = harness.store_manifest(vec![repo_item("A.md", "aaa")]).await;
    let prune_queue = harness.queue(JobType::Prune);
    let id = prune_queue
        .enqueue(JobPayload {
            artifact_key: Some(shrunk),
            prune_scope: Some(PruneScope {
                metadata_repo_in: vec![REPO.to_string()],
                ..PruneScope::default()
            }),
            ..JobPayload::default()
        })
        .unwrap();
    harness.runner(JobType::Prune).run_once().await.unwrap();

    let job = prune_queue.get(id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(harness.vectors.get(&format!("{REPO}@A.md")).unwrap().is_some());
    assert!(harness.vectors.get(&format!("{REPO}@B.md")).unwrap().is_none());
}

#[tokio::test]
async fn prune_with_empty_scope_fails_and_deletes_nothing() {
    let harness = Harness::new();
    let full = harness.store_manifest(vec![repo_item("A.md", "aaa")]).await;
    let ingest_queue = harness.queue(JobType::Ingest);
    ingest_queue.enqueue(ingest_payload(&full, false)).unwrap();
    harness.runner(JobType::Ingest).run_once().await.unwrap();

    let empty_keep = harness.store_manifest(vec![]).await;
    let prune_queue = harness.queue(JobType::Prune);
    let id = prune_queue
        .enqueue(JobPayload {
            artifact_key: Some(empty_keep),
            prune_scope: Some(PruneScope::default()),
            ..JobPayload::default()
        })
        .unwrap();
    harness.runner(JobType::Prune).run_once().await.unwrap();

    let job = prune_queue.get(id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("scope"));
    assert_eq!(harness.vectors.count().unwrap(), 1);
}

#[tokio::test]
async fn prune_without_scope_field_fails_as_precondition() {
    let harness = Harness::new();
    let key = harness.store_manifest(vec![]).await;
    let prune_queue = harness.queue(JobType::Prune);
    let id = prune_queue.enqueue(ingest_payload(&key, false)).unwrap();

    harness.runner(JobType::Prune).run_once().await.unwrap();
    let job = prune_queue.get(id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("prune_scope"));
}

#[tokio::test]
async fn empty_manifest_ingest_completes_without_writes() {
    let harness = Harness::new();
    let key = harness.store_manifest(vec![]).await;
    let queue = harness.queue(JobType::Ingest);
    let id = queue.enqueue(ingest_payload(&key, false)).unwrap();

    harness.runner(JobType::Ingest).run_once().await.unwrap();

    let job = queue.get(id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_total, Some(0));
    assert_eq!(harness.vectors.count().unwrap(), 0);
}

#[tokio::test]
async fn missing_manifest_fails_the_job_not_the_worker() {
    let harness = Harness::new();
    let queue = harness.queue(JobType::Ingest);
    let id = queue.enqueue(ingest_payload("no-such-key", false)).unwrap();

    // run_once returns Ok: the failure is recorded on the job.
    assert!(harness.runner(JobType::Ingest).run_once().await.unwrap());
    let job = queue.get(id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_some());
}

#[tokio::test]
async fn payload_without_inputs_fails_as_precondition() {
    let harness = Harness::new();
    let queue = harness.queue(JobType::Ingest);
    let id = queue.enqueue(JobPayload::default()).unwrap();

    harness.runner(JobType::Ingest).run_once().await.unwrap();
    let job = queue.get(id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("artifact_key"));
}

#[tokio::test]
async fn inline_local_dir_source_with_chunking() {
    let harness = Harness::new();
    let source_dir = TempDir::new().unwrap();
    let paragraphs: Vec<String> = (0..30)
        .map(|i| format!("paragraph {i} with some filler text to give it volume"))
        .collect();
    std::fs::write(source_dir.path().join("big.md"), paragraphs.join("\n\n")).unwrap();

    let queue = harness.queue(JobType::Ingest);
    let id = queue
        .enqueue(JobPayload {
            sources: vec![SourceSpec::LocalDir {
                path: PathBuf::from(source_dir.path()),
                repo_url: REPO.to_string(),
                exts: None,
            }],
            chunk_size: Some(200),
            chunk_overlap: Some(40),
            ..JobPayload::default()
        })
        .unwrap();

    harness.runner(JobType::Ingest).run_once().await.unwrap();

    let job = queue.get(id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let chunks = harness
        .vectors
        .node_ids_with_prefix(&format!("{REPO}@big.md#c"))
        .unwrap();
    assert!(chunks.len() > 1);
    let first = harness
        .vectors
        .get(&format!("{REPO}@big.md#c0"))
        .unwrap()
        .unwrap();
    assert_eq!(
        first.metadata.get("parent_id").and_then(Value::as_str),
        Some(format!("{REPO}@big.md").as_str())
    );
    assert_eq!(
        first
            .metadata
            .get("chunk_total")
            .and_then(Value::as_u64)
            .unwrap(),
        chunks.len() as u64
    );
}

#[tokio::test]
async fn checksum_update_baselines_without_vector_writes() {
    let harness = Harness::new();
    let key = harness.store_manifest(vec![readme_item()]).await;

    let refresh_queue = harness.queue(JobType::ChecksumUpdate);
    let id = refresh_queue.enqueue(ingest_payload(&key, false)).unwrap();
    harness
        .runner(JobType::ChecksumUpdate)
        .run_once()
        .await
        .unwrap();

    let job = refresh_queue.get(id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_note.as_deref(), Some("checksums updated"));
    assert_eq!(harness.vectors.count().unwrap(), 0);

    // A later ingest sees the baseline and skips everything.
    let ingest_queue = harness.queue(JobType::Ingest);
    let ingest_id = ingest_queue.enqueue(ingest_payload(&key, false)).unwrap();
    harness.runner(JobType::Ingest).run_once().await.unwrap();
    let job = ingest_queue.get(ingest_id).unwrap().unwrap();
    assert_eq!(job.progress_note.as_deref(), Some("no changes"));
    assert_eq!(harness.vectors.count().unwrap(), 0);
}

/// Progress sink with the worker's checkpoint semantics, for driving the
/// cancel-in-flight scenario without a live worker loop.
struct CheckpointSink {
    queue: JobQueue,
    job_id: u64,
}

impl ProgressSink for CheckpointSink {
    fn update(
        &self,
        stage: Stage,
        done: Option<u64>,
        total: Option<u64>,
        note: Option<&str>,
    ) -> Result<(), Canceled> {
        if let Ok(Some(job)) = self.queue.get(self.job_id) {
            if job.status == JobStatus::Canceled {
                return Err(Canceled);
            }
        }
        let note = note.unwrap_or(stage.as_str());
        self.queue
            .update_progress(self.job_id, done, total, Some(note))
            .map_err(|_| Canceled)?;
        Ok(())
    }
}

#[tokio::test]
async fn cancel_in_flight_aborts_at_the_next_checkpoint() {
    let harness = Harness::new();
    let queue = harness.queue(JobType::Ingest);
    let id = queue
        .enqueue(ingest_payload("unused-by-this-test", false))
        .unwrap();

    // Worker has claimed the job and is mid-pipeline.
    let claimed = queue.fetch_and_start().unwrap().unwrap();
    assert_eq!(claimed.id, id);

    // Front-end cancels while processing.
    assert!(queue.cancel(id).unwrap());

    // The very next progress checkpoint observes the cancellation.
    let sink = CheckpointSink {
        queue: queue.clone(),
        job_id: id,
    };
    let indexer = Indexer::new(
        harness.checksums.clone(),
        harness.vectors.clone(),
        Arc::new(HashEmbedding::new(DIM)),
        16,
    );
    let items = futures::stream::iter(vec![Ok::<_, SourceError>(readme_item())]);
    let err = indexer
        .index_items(Box::pin(items), false, &sink)
        .await
        .unwrap_err();
    assert!(matches!(err, ingestbox::index::IndexError::Canceled));

    let job = queue.get(id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Canceled);
    assert_eq!(job.error.as_deref(), Some("canceled"));
    assert!(job.finished_at.is_some());
    // No progress update landed after the cancellation.
    assert!(job.progress_note.is_none());
    // Nothing was written before the abort.
    assert_eq!(harness.vectors.count().unwrap(), 0);

    // Worker terminal calls after an abort are no-ops.
    queue.complete(id).unwrap();
    assert_eq!(queue.get(id).unwrap().unwrap().status, JobStatus::Canceled);
}

#[tokio::test]
async fn two_runners_drain_the_queue_without_double_work() {
    let harness = Harness::new();
    let key = harness.store_manifest(vec![readme_item()]).await;
    let queue = harness.queue(JobType::Ingest);
    for _ in 0..3 {
        queue.enqueue(ingest_payload(&key, false)).unwrap();
    }

    let runner_a = harness.runner(JobType::Ingest);
    let runner_b = harness.runner(JobType::Ingest);
    let (a, b) = tokio::join!(runner_a.run_once(), runner_b.run_once());
    assert!(a.unwrap());
    assert!(b.unwrap());

    // Two of three jobs reached a terminal state, one is still pending.
    let pending = queue.list(10, Some(JobStatus::Pending)).unwrap();
    assert_eq!(pending.len(), 1);
    let completed = queue.list(10, Some(JobStatus::Completed)).unwrap();
    assert_eq!(completed.len(), 2);
}
