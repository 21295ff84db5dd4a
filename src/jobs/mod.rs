//! Persistent multi-queue job repository.
//!
//! Jobs are durable records with a strict lifecycle:
//!
//! ```text
//! pending --fetch--> processing --complete--> completed
//!    ^                  |
//!    |                  +--fail--> failed
//!    |                  +--cancel> canceled
//!    +---retry (from failed | canceled)
//! ```
//!
//! Each job type gets its own logical queue so worker pools can be dedicated
//! per type. Delivery is at-least-once: `fetch_and_start` hands a job to
//! exactly one worker, and a worker that dies mid-job leaves the row in
//! `processing` for an operator to retry.

pub mod keys;
pub mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prune::PruneScope;
use crate::sources::SourceSpec;

pub use store::{JobQueue, JobQueues};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("job decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, JobError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Ingest,
    ChecksumUpdate,
    Prune,
}

impl JobType {
    pub const ALL: [JobType; 3] = [JobType::Ingest, JobType::ChecksumUpdate, JobType::Prune];

    /// Logical queue this job type is enqueued on.
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobType::Ingest => "ingest",
            JobType::ChecksumUpdate => "checksum_update",
            JobType::Prune => "prune",
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ingest" => Ok(JobType::Ingest),
            "checksum_update" => Ok(JobType::ChecksumUpdate),
            "prune" => Ok(JobType::Prune),
            other => Err(format!("unknown queue type '{other}'")),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.queue_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

/// Shared payload envelope for all job types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Prebuilt manifest reference; takes precedence over `sources`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_key: Option<String>,
    /// Inline source specifications, materialized on the worker.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceSpec>,
    /// Enables chunking for inline sources when > 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_overlap: Option<usize>,
    /// Ingest only: reindex even when checksums match.
    #[serde(default)]
    pub force: bool,
    /// Required for prune jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune_scope: Option<PruneScope>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub progress_done: Option<u64>,
    pub progress_total: Option<u64>,
    pub progress_note: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_round_trips_through_queue_names() {
        for job_type in JobType::ALL {
            let parsed: JobType = job_type.queue_name().parse().unwrap();
            assert_eq!(parsed, job_type);
        }
        assert!("mystery".parse::<JobType>().is_err());
    }

    #[test]
    fn payload_defaults_are_lenient() {
        let payload: JobPayload = serde_json::from_str("{}").unwrap();
        assert!(payload.artifact_key.is_none());
        assert!(payload.sources.is_empty());
        assert!(!payload.force);
    }

    #[test]
    fn payload_rejects_unknown_source_types() {
        let result: std::result::Result<JobPayload, _> = serde_json::from_str(
            r#"{"sources": [{"type": "carrier_pigeon", "coop": "north"}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn status_terminality() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
    }
}
