//! Worker service: poll loops over the job queues.
//!
//! Each loop processes a single job at a time; scaling is a matter of
//! spawning more loops against the shared repository, whose claim semantics
//! prevent double delivery. The job repository is an embedded keyspace, so
//! worker loops live in the same process that owns it: the API service
//! spawns them via [`spawn_in_process`], while the standalone `worker`
//! command drains a queue when the service is not running.

pub mod runner;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

use crate::artifact::ArtifactStore;
use crate::checksum::ChecksumStore;
use crate::config::Config;
use crate::embed::{self, EmbeddingClient};
use crate::index::Indexer;
use crate::jobs::{JobQueues, JobType};
use crate::observability::Metrics;
use crate::sources::SourceContext;
use crate::vector::VectorStore;

pub use runner::JobRunner;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub queue: JobType,
    pub poll_interval: Duration,
    pub count: usize,
}

/// Stores and clients shared by every runner loop in this process.
struct Components {
    queues: Arc<JobQueues>,
    artifacts: ArtifactStore,
    checksums: ChecksumStore,
    vectors: VectorStore,
    embedder: Arc<dyn EmbeddingClient>,
    sources_ctx: SourceContext,
    metrics: Arc<Metrics>,
}

impl Components {
    /// Open every store once; runners share cloned handles.
    ///
    /// A dimension mismatch against an existing vector table is fatal here,
    /// before any job is claimed.
    fn open(config: &Config, queues: Arc<JobQueues>) -> Result<Self, AnyError> {
        Ok(Self {
            queues,
            artifacts: ArtifactStore::from_config(&config.artifacts)?,
            checksums: ChecksumStore::open(config.store.path.join("checksums"))?,
            vectors: VectorStore::open(
                &config.store.path,
                &config.vector.table_name,
                config.vector.embed_dim,
            )?,
            embedder: Arc::from(embed::client_from_config(
                &config.embedding,
                config.vector.embed_dim,
            )?),
            sources_ctx: SourceContext::from_config(config),
            metrics: Arc::new(Metrics::new()),
        })
    }

    fn runner(&self, config: &Config, queue: JobType) -> JobRunner {
        let indexer = Indexer::new(
            self.checksums.clone(),
            self.vectors.clone(),
            self.embedder.clone(),
            config.embedding.batch_size,
        );
        JobRunner::new(
            self.queues.queue(queue),
            self.artifacts.clone(),
            indexer,
            self.vectors.clone(),
            self.sources_ctx.clone(),
            self.metrics.clone(),
        )
    }
}

fn spawn_loop(runner: Arc<JobRunner>, poll_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match runner.run_once().await {
                Ok(true) => {}
                Ok(false) => sleep(poll_interval).await,
                Err(e) => {
                    error!(error = %e, "Job repository error");
                    sleep(poll_interval).await;
                }
            }
        }
    })
}

/// Spawn runner loops for every queue against an already-open repository.
///
/// Used by the API service so enqueue, polling, and execution share one
/// process. The ingest queue gets `worker.count` loops; the lighter
/// checksum-update and prune queues get one each.
pub fn spawn_in_process(
    config: &Config,
    queues: Arc<JobQueues>,
) -> Result<Vec<JoinHandle<()>>, AnyError> {
    let components = Components::open(config, queues)?;
    let poll_interval = Duration::from_millis(config.worker.poll_interval_ms);

    let mut handles = Vec::new();
    for job_type in JobType::ALL {
        let loops = if job_type == JobType::Ingest {
            config.worker.count
        } else {
            1
        };
        for _ in 0..loops {
            let runner = Arc::new(components.runner(config, job_type));
            handles.push(spawn_loop(runner, poll_interval));
        }
    }
    info!(loops = handles.len(), "Worker loops started");
    Ok(handles)
}

/// Process at most one job from `queue`. Returns whether one was processed.
pub async fn run_once(config: Config, queue: JobType) -> Result<bool, AnyError> {
    let queues = Arc::new(JobQueues::open(config.store.path.join("jobs"))?);
    let components = Components::open(&config, queues)?;
    let runner = components.runner(&config, queue);
    Ok(runner.run_once().await?)
}

/// Run `count` loops over one queue until shutdown.
pub async fn run(config: Config, opts: WorkerOptions) -> Result<(), AnyError> {
    let queues = Arc::new(JobQueues::open(config.store.path.join("jobs"))?);
    let components = Components::open(&config, queues)?;
    info!(
        queue = %opts.queue,
        loops = opts.count,
        poll_ms = opts.poll_interval.as_millis() as u64,
        "Starting worker"
    );

    let mut handles = Vec::with_capacity(opts.count);
    for _ in 0..opts.count {
        let runner = Arc::new(components.runner(&config, opts.queue));
        handles.push(spawn_loop(runner, opts.poll_interval));
    }

    shutdown_signal().await;
    info!("Shutdown signal received, stopping worker loops");
    for handle in &handles {
        handle.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
