//! API models for the operator/front-end surface.
//!
//! The enqueue endpoint accepts an [`EnqueueRequest`] whose payload is the
//! shared job envelope; unknown source types fail deserialization and are
//! rejected with 400 before any job row exists. Status endpoints return the
//! repository's `Job` records directly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::jobs::{JobPayload, JobStatus, JobType};
use crate::observability::MetricsSnapshot;
use crate::sources::SourceSpec;

#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueRequest {
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default)]
    pub payload: JobPayload,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobAcceptedResponse {
    pub id: u64,
    pub queue: String,
}

/// Result of a cancel or retry request. `ok = false` means the job was not
/// in a state that allows the transition.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ActionResponse {
    pub id: u64,
    pub ok: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaterializeRequest {
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub chunk_overlap: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MaterializeResponse {
    pub artifact_key: String,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub status: Option<JobStatus>,
    /// Restrict the listing to one queue.
    pub queue: Option<JobType>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub metrics: MetricsSnapshot,
    pub version: String,
}
