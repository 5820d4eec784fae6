//! Types for the download orchestrator.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::job::JobStatus;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The job's current status does not permit the operation.
    #[error("cannot {operation} job {job_id}: status is {status}")]
    InvalidState {
        job_id: String,
        status: JobStatus,
        operation: String,
    },

    /// Registry error.
    #[error("registry error: {0}")]
    Registry(#[from] crate::job::JobError),

    /// Snapshot store error.
    #[error("snapshot store error: {0}")]
    Snapshot(#[from] crate::job::SnapshotError),
}

/// Bookkeeping for one job currently holding a concurrency slot.
pub(crate) struct ActiveTransfer {
    /// Fires to ask the backend to terminate.
    pub cancel_tx: broadcast::Sender<()>,
    /// Set alongside the send; the transfer task re-checks it after
    /// subscribing so a signal sent before any receiver existed is not lost.
    pub cancelled: Arc<AtomicBool>,
    pub started_at: DateTime<Utc>,
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the scheduler loop is running.
    pub running: bool,
    /// Jobs currently holding a concurrency slot.
    pub active_transfers: usize,
    pub pending_count: usize,
    pub downloading_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_default() {
        let status = OrchestratorStatus::default();
        assert!(!status.running);
        assert_eq!(status.active_transfers, 0);
        assert_eq!(status.pending_count, 0);
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::JobNotFound("j-456".to_string());
        assert_eq!(err.to_string(), "job not found: j-456");

        let err = OrchestratorError::InvalidState {
            job_id: "j-1".to_string(),
            status: JobStatus::Completed,
            operation: "cancel".to_string(),
        };
        assert_eq!(err.to_string(), "cannot cancel job j-1: status is completed");
    }
}
