//! Core download job data types.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during job registry operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("snapshot store error: {0}")]
    Persistence(String),
}

/// What kind of artifact a job transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Model,
    Dataset,
    VoicePack,
}

impl SourceKind {
    /// Returns the string representation for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Model => "model",
            SourceKind::Dataset => "dataset",
            SourceKind::VoicePack => "voice_pack",
        }
    }
}

/// Lifecycle status of a download job.
///
/// Only the orchestrator moves jobs between statuses; the registry rejects
/// edges that are not listed in [`JobStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a concurrency slot.
    Pending,
    /// A fetch backend is actively transferring bytes.
    Downloading,
    /// All bytes arrived at the destination.
    Completed,
    /// Terminal failure after retries were exhausted (or a fatal error).
    Failed,
    /// Cancelled on request. Never reported as a failure.
    Cancelled,
}

impl JobStatus {
    /// Returns the string representation for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// A terminal job accepts no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the `self -> to` edge exists in the lifecycle state machine.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(to, JobStatus::Downloading | JobStatus::Cancelled),
            JobStatus::Downloading => matches!(
                to,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
            ),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested artifact transfer.
///
/// The serialized form is the snapshot schema persisted by the
/// [`SnapshotStore`](crate::job::SnapshotStore) and exposed over the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJob {
    /// Opaque unique identifier, assigned at creation.
    pub id: String,
    /// Artifact category.
    pub source_kind: SourceKind,
    /// URL or repository identifier of the remote artifact.
    pub source_ref: String,
    /// Where the bytes must land. Created if absent.
    pub destination_path: PathBuf,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Overall progress, 0-100. Non-decreasing within one attempt.
    pub progress_percent: f32,
    /// Bytes received so far in the current attempt.
    pub bytes_downloaded: u64,
    /// Total bytes, once the backend reports a content length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,
    /// Name of the file currently transferring (jobs may ship several files).
    #[serde(rename = "currentArtifactName", skip_serializing_if = "Option::is_none")]
    pub current_artifact: Option<String>,
    /// Transfer speed, recomputed each progress tick.
    #[serde(rename = "speedBytesPerSec", skip_serializing_if = "Option::is_none")]
    pub speed_bps: Option<u64>,
    /// Estimated seconds remaining, recomputed each progress tick.
    #[serde(rename = "etaSeconds", skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    /// Human-readable failure reason. Set only when `status == failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Which attempt produced the current progress figures (1-based).
    pub attempt: u32,
    /// SHA-256 hex digest of the transferred bytes, when the backend computed one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_sha256: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DownloadJob {
    /// Create a fresh pending job from a creation request.
    pub fn new(request: CreateJobRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_kind: request.source_kind,
            source_ref: request.source_ref,
            destination_path: request.destination_path,
            status: JobStatus::Pending,
            progress_percent: 0.0,
            bytes_downloaded: 0,
            bytes_total: None,
            current_artifact: None,
            speed_bps: None,
            eta_secs: None,
            error_message: None,
            attempt: 0,
            checksum_sha256: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Request to create a new download job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub source_kind: SourceKind,
    pub source_ref: String,
    pub destination_path: PathBuf,
}

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Filter by status.
    pub status: Option<JobStatus>,
    /// Filter by source kind.
    pub kind: Option<SourceKind>,
    /// Maximum number of results (0 = unlimited).
    pub limit: usize,
    /// Offset for pagination.
    pub offset: usize,
}

impl JobFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by status.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by source kind.
    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Whether the given job passes the filter.
    pub fn matches(&self, job: &DownloadJob) -> bool {
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if job.source_kind != kind {
                return false;
            }
        }
        true
    }
}
