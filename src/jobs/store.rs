//! Fjall-backed job queue.
//!
//! Pickup needs "select the oldest pending row, lock it, skip rows locked by
//! others" semantics. Over an embedded keyspace that becomes: a pending-index
//! partition for FIFO ordering plus compare-and-swap on `status` under the
//! repository's transition lock. Two workers can never receive the same job,
//! and ids are monotonic across all queues.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use tracing::{debug, info};

use super::keys::{decode_id, job_key, job_prefix, pending_key, pending_prefix};
use super::{Job, JobPayload, JobStatus, JobType, Result};

const META_LAST_ID: &str = "last_id";

/// Factory owning the job keyspace; hands out one queue handle per type.
pub struct JobQueues {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    pending: PartitionHandle,
    meta: PartitionHandle,
    last_id: Arc<AtomicU64>,
    /// One lock across all queues: status transitions stay consistent with
    /// the pending index, and the persisted id counter never goes backwards.
    transition: Arc<Mutex<()>>,
}

impl JobQueues {
    /// Open or create the repository at `path`. Idempotent.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let keyspace = Config::new(path.as_ref()).open()?;
        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let pending = keyspace.open_partition("pending", PartitionCreateOptions::default())?;
        let meta = keyspace.open_partition("meta", PartitionCreateOptions::default())?;

        let last_id = meta
            .get(META_LAST_ID)?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        info!(path = %path.as_ref().display(), last_id, "Job repository opened");
        Ok(Self {
            keyspace,
            jobs,
            pending,
            meta,
            last_id: Arc::new(AtomicU64::new(last_id)),
            transition: Arc::new(Mutex::new(())),
        })
    }

    /// Handle for the logical queue of `job_type`.
    pub fn queue(&self, job_type: JobType) -> JobQueue {
        JobQueue {
            keyspace: self.keyspace.clone(),
            jobs: self.jobs.clone(),
            pending: self.pending.clone(),
            meta: self.meta.clone(),
            last_id: self.last_id.clone(),
            job_type,
            transition: self.transition.clone(),
        }
    }

    /// Flush pending writes to disk.
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

/// One logical queue. Fetches only see jobs enqueued on this queue.
#[derive(Clone)]
pub struct JobQueue {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    pending: PartitionHandle,
    meta: PartitionHandle,
    last_id: Arc<AtomicU64>,
    job_type: JobType,
    transition: Arc<Mutex<()>>,
}

impl JobQueue {
    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    fn queue_name(&self) -> &'static str {
        self.job_type.queue_name()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.transition
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self, id: u64) -> Result<Option<Job>> {
        match self.jobs.get(job_key(self.queue_name(), id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn write(&self, job: &Job) -> Result<()> {
        self.jobs.insert(
            job_key(self.queue_name(), job.id),
            serde_json::to_vec(job)?,
        )?;
        Ok(())
    }

    /// Create a `pending` job and return its id.
    pub fn enqueue(&self, payload: JobPayload) -> Result<u64> {
        let _guard = self.lock();
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let job = Job {
            id,
            job_type: self.job_type,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            error: None,
            progress_done: None,
            progress_total: None,
            progress_note: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        let mut batch = self.keyspace.batch();
        batch.insert(&self.meta, META_LAST_ID, id.to_be_bytes().to_vec());
        batch.insert(
            &self.jobs,
            job_key(self.queue_name(), id),
            serde_json::to_vec(&job)?,
        );
        batch.insert(
            &self.pending,
            pending_key(self.queue_name(), id),
            Vec::new(),
        );
        batch.commit()?;

        debug!(id, queue = self.queue_name(), "Job enqueued");
        Ok(id)
    }

    /// Atomically claim the oldest pending job of this queue.
    ///
    /// Transitions it to `processing`, increments `attempts`, stamps
    /// `started_at`. Returns `None` when the queue is drained.
    pub fn fetch_and_start(&self) -> Result<Option<Job>> {
        let _guard = self.lock();
        let prefix = pending_prefix(self.queue_name());
        loop {
            let Some(entry) = self.pending.prefix(prefix.as_slice()).next() else {
                return Ok(None);
            };
            let (key, _) = entry?;

            let Some(id) = decode_id(&key) else {
                self.pending.remove(key)?;
                continue;
            };
            let Some(mut job) = self.load(id)? else {
                self.pending.remove(key)?;
                continue;
            };
            // Stale index entries (canceled while pending, already claimed)
            // are dropped and the scan continues.
            if job.status != JobStatus::Pending {
                self.pending.remove(key)?;
                continue;
            }

            job.status = JobStatus::Processing;
            job.attempts += 1;
            job.started_at = Some(Utc::now());

            let mut batch = self.keyspace.batch();
            batch.insert(
                &self.jobs,
                job_key(self.queue_name(), id),
                serde_json::to_vec(&job)?,
            );
            batch.remove(&self.pending, key);
            batch.commit()?;

            debug!(id, queue = self.queue_name(), attempts = job.attempts, "Job claimed");
            return Ok(Some(job));
        }
    }

    pub fn get(&self, id: u64) -> Result<Option<Job>> {
        self.load(id)
    }

    /// Newest-first listing, optionally filtered by status.
    pub fn list(&self, limit: usize, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let prefix = job_prefix(self.queue_name());
        let mut out = Vec::new();
        for entry in self.jobs.prefix(prefix.as_slice()).rev() {
            let (_, value) = entry?;
            let job: Job = serde_json::from_slice(&value)?;
            if let Some(wanted) = status {
                if job.status != wanted {
                    continue;
                }
            }
            out.push(job);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// `processing -> completed`. No-op in any other state.
    pub fn complete(&self, id: u64) -> Result<()> {
        let _guard = self.lock();
        if let Some(mut job) = self.load(id)? {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Completed;
                job.error = None;
                job.finished_at = Some(Utc::now());
                self.write(&job)?;
                debug!(id, queue = self.queue_name(), "Job completed");
            }
        }
        Ok(())
    }

    /// `processing -> failed`, storing the error. No-op otherwise.
    pub fn fail(&self, id: u64, error: &str) -> Result<()> {
        let _guard = self.lock();
        if let Some(mut job) = self.load(id)? {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Failed;
                job.error = Some(error.to_string());
                job.finished_at = Some(Utc::now());
                self.write(&job)?;
                debug!(id, queue = self.queue_name(), "Job failed");
            }
        }
        Ok(())
    }

    /// Return a `failed | canceled` job to `pending`.
    pub fn retry(&self, id: u64) -> Result<bool> {
        let _guard = self.lock();
        let Some(mut job) = self.load(id)? else {
            return Ok(false);
        };
        if !matches!(job.status, JobStatus::Failed | JobStatus::Canceled) {
            return Ok(false);
        }
        job.status = JobStatus::Pending;
        job.started_at = None;
        job.finished_at = None;
        job.error = None;

        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.jobs,
            job_key(self.queue_name(), id),
            serde_json::to_vec(&job)?,
        );
        batch.insert(
            &self.pending,
            pending_key(self.queue_name(), id),
            Vec::new(),
        );
        batch.commit()?;
        debug!(id, queue = self.queue_name(), "Job returned to pending");
        Ok(true)
    }

    /// Cancel a `pending | processing` job.
    ///
    /// A processing job is canceled cooperatively: the worker observes the
    /// status at its next progress checkpoint and aborts.
    pub fn cancel(&self, id: u64) -> Result<bool> {
        let _guard = self.lock();
        let Some(mut job) = self.load(id)? else {
            return Ok(false);
        };
        let was_pending = match job.status {
            JobStatus::Pending => true,
            JobStatus::Processing => false,
            _ => return Ok(false),
        };
        job.status = JobStatus::Canceled;
        job.finished_at = Some(Utc::now());
        if job.error.is_none() {
            job.error = Some("canceled".to_string());
        }

        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.jobs,
            job_key(self.queue_name(), id),
            serde_json::to_vec(&job)?,
        );
        if was_pending {
            batch.remove(&self.pending, pending_key(self.queue_name(), id));
        }
        batch.commit()?;
        debug!(id, queue = self.queue_name(), "Job canceled");
        Ok(true)
    }

    /// Partial progress update; absent fields keep their prior values.
    pub fn update_progress(
        &self,
        id: u64,
        done: Option<u64>,
        total: Option<u64>,
        note: Option<&str>,
    ) -> Result<()> {
        if done.is_none() && total.is_none() && note.is_none() {
            return Ok(());
        }
        let _guard = self.lock();
        if let Some(mut job) = self.load(id)? {
            if let Some(done) = done {
                job.progress_done = Some(done);
            }
            if let Some(total) = total {
                job.progress_total = Some(total);
            }
            if let Some(note) = note {
                job.progress_note = Some(note.to_string());
            }
            self.write(&job)?;
        }
        Ok(())
    }

    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}
